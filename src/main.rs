// src/main.rs

use std::process::ExitCode;

use deploygraph::{cli, logging, run};

/// Exit status when logging cannot be set up, before any graph is read.
const EXIT_SETUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("deploygraph: cannot initialise logging: {err:#}");
        return ExitCode::from(EXIT_SETUP);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("deploygraph: {err:?}");
            ExitCode::FAILURE
        }
    }
}
