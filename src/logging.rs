// src/logging.rs

//! Logging setup for `deploygraph` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `DEPLOYGRAPH_LOG` environment variable, either a bare level ("debug")
//!    or a full filter directive ("deploygraph::engine=debug,info")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout carries only the plan and the
//! final status table.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when no `--log-level` is given.
pub const LOG_ENV: &str = "DEPLOYGRAPH_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(level_directive(lvl)),
        None => std::env::var(LOG_ENV)
            .ok()
            .and_then(|s| filter_from_str(&s))
            .unwrap_or_else(|| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialising logging: {err}"))?;

    Ok(())
}

fn level_directive(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

fn filter_from_str(s: &str) -> Option<EnvFilter> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let normalised = if s.eq_ignore_ascii_case("warning") {
        "warn".to_string()
    } else {
        s.to_lowercase()
    };
    EnvFilter::try_new(normalised).ok()
}
