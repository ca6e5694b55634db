// src/main.rs

//! The main entry point for the coldstored server application.

use coldstored::config::Config;
use coldstored::server;
use std::env;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

/// Exit codes shared by every bundled command: 0 success, 1 usage,
/// 2 runtime failure, 3 unmet precondition.
const EXIT_USAGE: u8 = 1;
const EXIT_RUNTIME: u8 = 2;
const EXIT_PRECONDITION: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("coldstored version {VERSION}");
        return ExitCode::SUCCESS;
    }

    // Determine the configuration path. It can be provided via a --config
    // flag; otherwise, it defaults to "coldstored.toml".
    let config_path = match flag_value(&args, "--config") {
        Ok(path) => path.unwrap_or_else(|| "coldstored.toml".to_string()),
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let mut config = match Config::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            return ExitCode::from(EXIT_PRECONDITION);
        }
    };

    // Override port if provided as a command-line argument.
    match flag_value(&args, "--port") {
        Ok(Some(port_str)) => match port_str.parse::<u16>() {
            Ok(port) => config.port = port,
            Err(_) => {
                eprintln!("Invalid port number: {port_str}");
                return ExitCode::from(EXIT_USAGE);
            }
        },
        Ok(None) => {}
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(EXIT_USAGE);
        }
    }

    // Setup logging. Level comes from RUST_LOG, falling back to the config.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {:#}", e);
        return ExitCode::from(EXIT_RUNTIME);
    }

    ExitCode::SUCCESS
}

/// Reads `--flag value` from the argument list. A flag present without a
/// value is a usage error.
fn flag_value(args: &[String], flag: &str) -> Result<Option<String>, String> {
    match args.iter().position(|arg| arg == flag) {
        Some(i) => match args.get(i + 1) {
            Some(value) => Ok(Some(value.clone())),
            None => Err(format!("{flag} flag requires a value")),
        },
        None => Ok(None),
    }
}
