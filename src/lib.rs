pub mod app;
pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;

use clap::Parser;
use error::AppError;

fn report_error(err: &AppError, json: bool) {
    if json {
        match serde_json::to_string(&err.to_serde()) {
            Ok(s) => eprintln!("{}", s),
            Err(_) => eprintln!("error[{}]: {}", err.code(), err),
        }
        return;
    }
    eprintln!("error[{}]: {}", err.code(), err);
    if let Some(rev) = err.revision() {
        eprintln!("  revision: {}", rev);
    }
    if err.is_retryable() {
        eprintln!("  safe to retry");
    }
}

/// CLI entry point. Returns the process exit code.
pub fn run() -> i32 {
    let cli = commands::Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    match commands::execute(&cli) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("Command failed: {}", e);
            report_error(&e, cli.json);
            e.exit_code()
        }
    }
}
