//! corofy command-line tool
//!
//! Analyzes, instruments and runs programs written in the corofy assembly format.

use corofy_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
