fn main() {
    if let Err(err) = worktime_lib::run() {
        eprintln!("worktime-tray: {err:#}");
        std::process::exit(1);
    }
}
