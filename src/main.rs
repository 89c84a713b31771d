//! `resocks` binary.
//!
//! - `resocks listen` - wait for a relay and serve SOCKS5 through it
//! - `resocks <address>` - run the relay, connecting back to a listener
//! - `resocks generate` - print a new connection key

use std::process::ExitCode;

use clap::Parser;
use resocks::cli::{Cli, run};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
