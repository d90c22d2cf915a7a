//! Rotated output, plain and gzipped.

use std::time::Duration;

fn main() {
    otrace::set_process_name("ex-rotation");

    // Rotating plain JSON files: ~1MB advisory, 4 files.
    otrace::set_output_pattern("traces_json/run-%03u.json", 1, 4).unwrap();
    for i in 0..600u64 {
        otrace::instant_with_args("emit", "io", &[("i", i.into())]);
        if i % 50 == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    otrace::flush().unwrap();

    // Rotating gzip (with the gzip feature; otherwise plain .json).
    otrace::set_output_pattern("traces_gz/run-%03u.json.gz", 1, 3).unwrap();
    for i in 0..600u64 {
        otrace::instant_with_args("emit_gz", "io", &[("i", i.into())]);
        if i % 50 == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    otrace::flush().unwrap();

    // Back to single-file mode.
    otrace::set_output_pattern("", 0, 0).unwrap();
    otrace::set_output_path("rotation_tail.json");
    otrace::instant("done");
    otrace::flush().unwrap();
}
