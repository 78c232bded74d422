fn main() {
    if let Err(e) = accolade::run() {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
