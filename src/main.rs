//! Converse server binary.
//! Run with: cargo run --bin converse-server

use std::process::ExitCode;

use converse::start_converse_server;

fn main() -> ExitCode {
    start_converse_server::run()
}
