// workbridge-cli/src/main.rs
// ============================================================================
// Module: Workbridge CLI
// Description: Server binary entry point.
// Purpose: Load configuration, build the server, and serve until shutdown.
// Dependencies: workbridge-config, workbridge-mcp, clap, tokio
// ============================================================================

//! ## Overview
//! The binary loads configuration (explicit `--config`, then the
//! `WORKBRIDGE_CONFIG` environment variable, then `workbridge.toml`), builds
//! the server, and serves on the configured transport. Exit codes: 0 on
//! clean shutdown, 1 on configuration errors, 2 on unrecoverable startup or
//! transport failures.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use workbridge_config::WorkbridgeConfig;
use workbridge_mcp::McpServer;
use workbridge_mcp::McpServerError;

/// Workbridge: JSON-RPC tool adapter for upstream project and file APIs.
#[derive(Debug, Parser)]
#[command(name = "workbridge", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match WorkbridgeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("workbridge: {err}");
            return ExitCode::from(1);
        }
    };

    let server = match McpServer::from_config(config) {
        Ok(server) => server,
        Err(McpServerError::Config(message)) => {
            eprintln!("workbridge: config error: {message}");
            return ExitCode::from(1);
        }
        Err(err) => {
            eprintln!("workbridge: {err}");
            return ExitCode::from(2);
        }
    };

    match run(server) {
        Ok(()) => ExitCode::SUCCESS,
        Err(McpServerError::Config(message)) => {
            eprintln!("workbridge: config error: {message}");
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("workbridge: {err}");
            ExitCode::from(2)
        }
    }
}

#[tokio::main]
async fn run(server: McpServer) -> Result<(), McpServerError> {
    tokio::select! {
        outcome = server.serve() => outcome,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}
