//! testrig CLI entry point

fn main() {
    testrig::cli::run();
}
