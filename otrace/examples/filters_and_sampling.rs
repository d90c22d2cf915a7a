//! Category gates, sampling, and a user predicate.

fn main() {
    otrace::set_output_path("ex_filters.json");
    otrace::enable();

    otrace::set_allowed_categories("net,frame");
    otrace::set_denied_categories("noise");
    otrace::set_sampling(0.5);

    otrace::instant_with_category("tick", "net"); // kept (half the time)
    otrace::instant_with_category("dbg", "noise"); // dropped
    otrace::instant_with_category("paint", "frame"); // kept (half the time)

    // Reset the gates.
    otrace::set_allowed_categories("");
    otrace::set_denied_categories("");
    otrace::set_sampling(1.0);

    // Custom predicate: keep only names containing "hot".
    otrace::set_filter(|name, _cat| name.contains("hot"));
    otrace::instant("hot_path");
    otrace::instant("cold_path");
    otrace::clear_filter();

    otrace::flush().unwrap();
    println!("wrote ex_filters.json");
}
