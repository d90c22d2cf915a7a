use thiserror::Error;

/// Errors the recorder can surface to the host.
///
/// Every variant is recoverable: flush failures restore the enabled flag
/// before returning, invalid configuration is clamped or rejected, and
/// re-entrant calls are skipped. Nothing here ever panics into host code.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to open trace output: {0}")]
    IoOpen(#[source] std::io::Error),
    #[error("failed to write trace output: {0}")]
    IoWrite(#[source] std::io::Error),
    #[error("failed to publish trace file: {0}")]
    Rename(#[source] std::io::Error),
    #[error("failed to compress trace file: {0}")]
    Compress(#[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("re-entrant tracer call")]
    ReentryDetected,
}

pub type Result<T> = std::result::Result<T, TraceError>;
