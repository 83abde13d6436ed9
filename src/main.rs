//! GxP Audit Validator - Main Entry Point
//!
//! Anomaly review of audit-trail exports from the command line.

use clap::Parser;
use gxp_audit_validator::cli::{cmd_inspect, cmd_run, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gxp_audit_validator=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { data, rows } => {
            cmd_inspect(&data, rows)?;
        }
        Commands::Run(args) => {
            cmd_run(&args)?;
        }
    }

    Ok(())
}
