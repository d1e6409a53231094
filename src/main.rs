//! crboost-server binary entrypoint.
//!
//! All logic lives in the library; main only invokes cli::run() and maps
//! the result to a process exit code.

fn main() {
    if let Err(code) = crboost_server::cli::run() {
        std::process::exit(code);
    }
}
