//! Cromwell on Azure cluster deployer - Entry Point
//!
//! Connects to the managed cluster, synchronizes the helm values document
//! and installs or upgrades the chart.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use coadeploy::app::options::DeployerOptions;
use coadeploy::app::run::run;
use coadeploy::logs::{init_logging, LogOptions};
use coadeploy::storage::layout::StorageLayout;
use coadeploy::storage::settings::DeployerConfig;
use coadeploy::utils::version_info;

use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.remove("version").is_some() {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to print version: {}", e),
        }
        return ExitCode::SUCCESS;
    }

    let mut layout = StorageLayout::default();
    if let Some(dir) = cli_args.remove("working_dir") {
        layout.working_dir = dir.into();
    }

    let config = match DeployerConfig::load(&layout.config_file(), &cli_args).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Invalid configuration:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: config.log_level.clone(),
        stdout: config.log_stdout,
        log_dir: config.log_dir.clone(),
        json_format: config.json_logs,
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    info!("coa-deployer {} ({})", version.version, version.git_hash);

    let options = DeployerOptions {
        layout,
        ..Default::default()
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        await_shutdown_signal().await;
        signal_cancel.cancel();
    });

    match run(config, options, cancel).await {
        Ok(()) => {
            println!("{}", "Deployment succeeded".green().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Deployment failed: {e}");
            eprintln!("{} {}", "Deployment failed:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, cancelling...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Ctrl+C received, cancelling...");
    }
}
