//! JSON output: single-file and rotated modes.
//!
//! Events are converted into `chrome-trace-format` rows and encoded through
//! a 256 KiB buffered writer. Rotated mode stages into `<final>.tmp` and
//! publishes by rename (or gzip), so readers only ever see a previous
//! complete file or the new complete file.

use crate::error::{Result, TraceError};
use crate::event::{Arg, ArgValue, Event, Phase};
use crate::registry::{Registry, RotationConfig};
use chrome_trace_format::{
    number_value, InstantScope, TraceDocument, TraceEvent, TracePhase, META_PROCESS_NAME,
    META_THREAD_NAME, META_THREAD_SORT_INDEX,
};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::Write as _;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

const IO_BUFFER_SIZE: usize = 256 * 1024;

pub(crate) fn write(reg: &Registry, override_path: Option<&Path>, events: &[Event]) -> Result<()> {
    if let Some(path) = override_path {
        return write_single(path, events);
    }
    let output = reg.output.load();
    match &output.rotation {
        None => write_single(&output.path, events),
        Some(rotation) => write_rotated(reg, rotation, events),
    }
}

fn write_single(path: &Path, events: &[Event]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(TraceError::IoOpen)?;
    let mut writer = BufWriter::with_capacity(IO_BUFFER_SIZE, file);
    serde_json::to_writer(&mut writer, &to_document(events))
        .map_err(|e| TraceError::IoWrite(e.into()))?;
    writer.flush().map_err(TraceError::IoWrite)
}

fn write_rotated(reg: &Registry, rotation: &RotationConfig, events: &[Event]) -> Result<()> {
    let max_files = rotation.max_files.max(1);
    let index = reg.rotation_index.load(Ordering::Relaxed) % max_files;
    // Advance unconditionally so a permanently failing target cannot pin the
    // index on one file.
    reg.rotation_index
        .store((index + 1) % max_files, Ordering::Relaxed);

    let target = expand_pattern(&rotation.pattern, index);
    ensure_parent_dirs(&target.path)?;

    let tmp_path = staging_path(&target.path);
    if let Err(error) = write_single(&tmp_path, events) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    if target.gzip {
        #[cfg(feature = "gzip")]
        return finish_gzip(&tmp_path, &target.path);
    }
    finish_rename(&tmp_path, &target.path)
}

fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(TraceError::IoOpen)?;
        }
    }
    Ok(())
}

fn staging_path(final_path: &Path) -> PathBuf {
    let mut os = final_path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn finish_rename(tmp: &Path, final_path: &Path) -> Result<()> {
    match fs::rename(tmp, final_path) {
        Ok(()) => Ok(()),
        // Rename can fail across filesystems or on targets that refuse to
        // replace; fall back to copy + delete and never leave a partial final.
        Err(_) => match fs::copy(tmp, final_path) {
            Ok(_) => {
                let _ = fs::remove_file(tmp);
                Ok(())
            }
            Err(error) => {
                let _ = fs::remove_file(final_path);
                let _ = fs::remove_file(tmp);
                Err(TraceError::Rename(error))
            }
        },
    }
}

#[cfg(feature = "gzip")]
fn finish_gzip(tmp: &Path, final_path: &Path) -> Result<()> {
    let result = gzip_file(tmp, final_path);
    if result.is_err() {
        let _ = fs::remove_file(final_path);
    }
    let _ = fs::remove_file(tmp);
    result
}

#[cfg(feature = "gzip")]
fn gzip_file(tmp: &Path, final_path: &Path) -> Result<()> {
    use flate2::{write::GzEncoder, Compression};

    let mut input = File::open(tmp).map_err(TraceError::Compress)?;
    let output = File::create(final_path).map_err(TraceError::Compress)?;
    let mut encoder = GzEncoder::new(
        BufWriter::with_capacity(IO_BUFFER_SIZE, output),
        Compression::default(),
    );
    std::io::copy(&mut input, &mut encoder).map_err(TraceError::Compress)?;
    encoder
        .finish()
        .map_err(TraceError::Compress)?
        .flush()
        .map_err(TraceError::Compress)
}

pub(crate) struct RotationTarget {
    pub path: PathBuf,
    pub gzip: bool,
}

/// Expand the rotation pattern for one index. A `.gz` suffix requests gzip
/// when compiled in (stripped otherwise); one printf-style `%u`/`%d`
/// placeholder takes the index, and a pattern without one gets `-NNNNNN`
/// appended.
pub(crate) fn expand_pattern(pattern: &str, index: u32) -> RotationTarget {
    let gzip_requested = pattern.ends_with(".gz");
    let base = if gzip_requested {
        &pattern[..pattern.len() - 3]
    } else {
        pattern
    };
    let gzip = gzip_requested && cfg!(feature = "gzip");

    let expanded = match find_placeholder(base) {
        Some((start, end, width)) => {
            format!("{}{index:0width$}{}", &base[..start], &base[end..])
        }
        None => format!("{base}-{index:06}"),
    };

    let path = if gzip {
        PathBuf::from(format!("{expanded}.gz"))
    } else {
        PathBuf::from(expanded)
    };
    RotationTarget { path, gzip }
}

/// First `%[0-9]*[ud]` placeholder as (start, end, zero-pad width).
fn find_placeholder(s: &str) -> Option<(usize, usize, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let mut j = i + 1;
            let mut width = 0usize;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                width = width * 10 + (bytes[j] - b'0') as usize;
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == b'u' || bytes[j] == b'd') {
                return Some((i, j + 1, width.min(16)));
            }
        }
        i += 1;
    }
    None
}

pub(crate) fn placeholder_count(s: &str) -> usize {
    let mut count = 0;
    let mut offset = 0;
    while let Some((_, end, _)) = find_placeholder(&s[offset..]) {
        count += 1;
        offset += end;
    }
    count
}

fn to_document(events: &[Event]) -> TraceDocument {
    TraceDocument::new(events.iter().map(to_trace_event).collect())
}

fn to_trace_event(ev: &Event) -> TraceEvent {
    let ph = match ev.ph {
        Phase::Begin => TracePhase::Begin,
        Phase::End => TracePhase::End,
        Phase::Complete => TracePhase::Complete,
        Phase::Instant => TracePhase::Instant,
        Phase::Counter => TracePhase::Counter,
        Phase::ThreadName | Phase::ProcessName | Phase::ThreadSortIndex => TracePhase::Metadata,
        Phase::FlowStart => TracePhase::FlowStart,
        Phase::FlowStep => TracePhase::FlowStep,
        Phase::FlowEnd => TracePhase::FlowEnd,
    };

    let name = match ev.ph {
        Phase::ThreadName => META_THREAD_NAME,
        Phase::ProcessName => META_PROCESS_NAME,
        Phase::ThreadSortIndex => META_THREAD_SORT_INDEX,
        _ => ev.name.as_str(),
    };

    let mut row = TraceEvent::new(name, ph, ev.ts_us, ev.pid, ev.tid)
        .with_category(ev.cat.as_str());

    match ev.ph {
        Phase::Instant => row.s = Some(InstantScope::Thread),
        Phase::Complete => row.dur = Some(ev.dur_us),
        p if p.is_flow() => row.id = Some(ev.flow_id),
        _ => {}
    }

    if !ev.cname.is_empty() {
        row.cname = Some(ev.cname.as_str().to_string());
    }

    row.args = match ev.ph {
        Phase::ThreadName | Phase::ProcessName => {
            let mut map = Map::new();
            map.insert(
                "name".to_string(),
                Value::String(ev.name.as_str().to_string()),
            );
            Some(map)
        }
        Phase::ThreadSortIndex => {
            let index = match ev.arg_slice().first() {
                Some(Arg {
                    value: ArgValue::Number(n),
                    ..
                }) => *n,
                _ => 0.0,
            };
            let mut map = Map::new();
            map.insert("sort_index".to_string(), number_value(index));
            Some(map)
        }
        _ if ev.argc > 0 => Some(args_map(ev.arg_slice())),
        _ => None,
    };

    row
}

fn args_map(args: &[Arg]) -> Map<String, Value> {
    let mut map = Map::new();
    for arg in args {
        let value = match arg.value {
            ArgValue::None => Value::Null,
            ArgValue::Number(n) => number_value(n),
            ArgValue::String(s) => Value::String(s.as_str().to_string()),
        };
        map.insert(arg.key.as_str().to_string(), value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("run-%03u.json", 7, "run-007.json")]
    #[case("run-%03u.json", 123, "run-123.json")]
    #[case("run-%u.json", 7, "run-7.json")]
    #[case("run-%d.json", 12, "run-12.json")]
    fn pattern_placeholder_expansion(#[case] pattern: &str, #[case] index: u32, #[case] expected: &str) {
        let target = expand_pattern(pattern, index);
        assert_eq!(target.path, PathBuf::from(expected));
        assert!(!target.gzip);
    }

    #[test]
    fn pattern_without_placeholder_appends_index() {
        let target = expand_pattern("trace.json", 42);
        assert_eq!(target.path, PathBuf::from("trace.json-000042"));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gz_suffix_requests_gzip() {
        let target = expand_pattern("run-%03u.json.gz", 1);
        assert_eq!(target.path, PathBuf::from("run-001.json.gz"));
        assert!(target.gzip);
    }

    #[cfg(not(feature = "gzip"))]
    #[test]
    fn gz_suffix_is_stripped_without_backend() {
        let target = expand_pattern("run-%03u.json.gz", 1);
        assert_eq!(target.path, PathBuf::from("run-001.json"));
        assert!(!target.gzip);
    }

    #[test]
    fn placeholder_counting() {
        assert_eq!(placeholder_count("plain.json"), 0);
        assert_eq!(placeholder_count("a-%03u.json"), 1);
        assert_eq!(placeholder_count("a-%u-%u.json"), 2);
        assert_eq!(placeholder_count("100%.json"), 0);
    }

    #[test]
    fn staging_path_appends_tmp() {
        assert_eq!(
            staging_path(Path::new("dir/run-000.json")),
            PathBuf::from("dir/run-000.json.tmp")
        );
    }

    #[test]
    fn instant_row_has_thread_scope() {
        let mut ev = Event::default();
        ev.ph = Phase::Instant;
        ev.name = "tick".into();
        let row = to_trace_event(&ev);
        assert_eq!(row.ph, TracePhase::Instant);
        assert_eq!(row.s, Some(InstantScope::Thread));
        assert!(row.dur.is_none());
    }

    #[test]
    fn complete_and_flow_rows_carry_their_fields() {
        let mut ev = Event::default();
        ev.ph = Phase::Complete;
        ev.dur_us = 123;
        assert_eq!(to_trace_event(&ev).dur, Some(123));

        let mut ev = Event::default();
        ev.ph = Phase::FlowStep;
        ev.flow_id = 0xC0FFEE;
        let row = to_trace_event(&ev);
        assert_eq!(row.ph, TracePhase::FlowStep);
        assert_eq!(row.id, Some(0xC0FFEE));
    }

    #[test]
    fn metadata_rows_use_fixed_names() {
        let mut ev = Event::default();
        ev.ph = Phase::ThreadName;
        ev.name = "worker-1".into();
        let row = to_trace_event(&ev);
        assert_eq!(row.name, "thread_name");
        assert_eq!(
            row.args.unwrap().get("name").unwrap(),
            &Value::String("worker-1".to_string())
        );

        let mut ev = Event::default();
        ev.ph = Phase::ThreadSortIndex;
        ev.push_number("sort_index", 10.0);
        let row = to_trace_event(&ev);
        assert_eq!(row.name, "thread_sort_index");
        assert_eq!(row.args.unwrap().get("sort_index").unwrap().as_i64(), Some(10));
    }

    #[test]
    fn color_hint_appears_as_cname() {
        let mut ev = Event::default();
        ev.ph = Phase::Instant;
        ev.cname = "good".into();
        assert_eq!(to_trace_event(&ev).cname.as_deref(), Some("good"));
    }

    #[test]
    fn counter_args_survive_with_number_collapsing() {
        let mut ev = Event::default();
        ev.ph = Phase::Counter;
        ev.name = "queue_len".into();
        ev.push_number("queue_len", 5.0);
        ev.push_number("ratio", 0.5);
        let row = to_trace_event(&ev);
        let args = row.args.unwrap();
        assert_eq!(args.get("queue_len").unwrap().as_i64(), Some(5));
        assert_eq!(args.get("ratio").unwrap().as_f64(), Some(0.5));
    }

    #[test]
    fn single_file_write_roundtrips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/out/trace.json");

        let mut ev = Event::default();
        ev.ph = Phase::Instant;
        ev.name = "tick".into();
        ev.ts_us = 10;
        write_single(&path, &[ev]).unwrap();

        let data = fs::read_to_string(&path).unwrap();
        let doc: TraceDocument = serde_json::from_str(&data).unwrap();
        assert_eq!(doc.display_time_unit, "ms");
        assert_eq!(doc.trace_events.len(), 1);
        assert_eq!(doc.trace_events[0].name, "tick");
    }
}
