// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `deploygraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "deploygraph",
    version,
    about = "Resolve a deployment task graph and execute it across node groups.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the graph definition (YAML or TOML, by extension).
    ///
    /// Default: `deploy_graph.yaml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "deploy_graph.yaml")]
    pub graph: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEPLOYGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the definition and print the execution plan, without
    /// running any task.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the final per-node status table to this file, as YAML.
    #[arg(long, value_name = "PATH")]
    pub report: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_yaml_graph_in_cwd() {
        let args = CliArgs::try_parse_from(["deploygraph"]).unwrap();
        assert_eq!(args.graph, "deploy_graph.yaml");
        assert!(!args.dry_run);
        assert!(args.report.is_none());
    }

    #[test]
    fn parses_all_flags() {
        let args = CliArgs::try_parse_from([
            "deploygraph",
            "--graph",
            "env/prod.toml",
            "--log-level",
            "debug",
            "--dry-run",
            "--report",
            "out.yaml",
        ])
        .unwrap();
        assert_eq!(args.graph, "env/prod.toml");
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(args.dry_run);
        assert_eq!(args.report.as_deref(), Some("out.yaml"));
    }
}
