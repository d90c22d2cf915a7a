//! Derived tracks: FPS from frame marks, a counter derivative, and latency
//! percentiles for a scope.

use std::time::Duration;

fn main() {
    otrace::set_process_name("ex-synth");
    otrace::set_output_path("synth.json");
    otrace::enable_synthesis(true);

    // FPS from frames.
    for f in 0..60u64 {
        otrace::mark_frame(f);
        std::thread::sleep(Duration::from_millis(16));
    }

    // Derivative of a counter.
    let mut acc = 0.0;
    for _ in 0..40 {
        acc += 1024.0;
        otrace::counter("bytes_uploaded", acc);
        std::thread::sleep(Duration::from_millis(10));
    }

    // Latency percentiles for a scope.
    for i in 0..30u64 {
        let _scope = otrace::scope("tile");
        std::thread::sleep(Duration::from_micros(300 + i * 50));
    }

    otrace::flush().unwrap();
    println!("wrote synth.json");
}
