//! tpcdm CLI
//!
//! Command-line interface for tpcdm

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tpcdm_core::logging_facility::{self, Profile};
use tpcdm_core::{ExError, TpcConfig, TpcError};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "tpcdm")]
#[command(about = "tpcdm - atomic transactions across snapshot files and SQLite", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format, overrides `log_profile` from the configuration
    #[arg(long, global = true, value_enum)]
    log: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Dev,
    Prod,
}

impl From<LogFormat> for Profile {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Dev => Profile::Development,
            LogFormat::Prod => Profile::Production,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Commit, savepoint and abort walkthrough over three SQLite databases
    Demo(commands::demo::DemoArgs),
    /// Task list stored in a snapshot file
    Todo(commands::todo::TodoArgs),
}

fn load_config(path: Option<&Path>) -> Result<TpcConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => TpcConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => TpcConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let profile = cli.log.map(Profile::from).unwrap_or(config.log_profile);
    logging_facility::init(profile);

    let result = match cli.command {
        Commands::Demo(args) => commands::demo::execute(args),
        Commands::Todo(args) => commands::todo::execute(args, &config),
    };

    if let Err(e) = result {
        std::process::exit(report(e.as_ref()));
    }
}

/// Print the user-facing message, log the detail, and pick the exit code
fn report(err: &(dyn std::error::Error + 'static)) -> i32 {
    let Some(tpc_err) = err.downcast_ref::<TpcError>() else {
        eprintln!("Error: {}", err);
        return 1;
    };

    let ex_err = ExError::from(tpc_err.clone());
    tracing::error!(
        err_code = ex_err.code(),
        error = %tpc_err,
        fatal = tpc_err.is_fatal(),
        "Command failed"
    );
    eprintln!("Error: {}", tpc_err.user_message());

    if tpc_err.is_fatal() {
        2
    } else {
        1
    }
}
