#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use claimsight::cli::app::{Cli, Command, RuntimeArgs};
use claimsight::cli::commands;
use claimsight::config::{EngineConfig, RuntimePaths, load_engine_config};
use claimsight::models::QueryEnvelopeCommandFailure;
use clap::Parser;
use clap::error::ErrorKind;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_INTENT_REJECTED: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

const LOG_ENV_VAR: &str = "CLAIMSIGHT_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing();

    let command_name = command_name(&cli.command);
    debug!(command = command_name, "starting");

    match execute(cli) {
        Ok(()) => {
            debug!(command = command_name, exit_code = EXIT_SUCCESS, "completed");
            EXIT_SUCCESS
        }
        Err(failure) => {
            let exit_code = classify_runtime_error(&failure);
            error!(command = command_name, exit_code, "failed");
            eprintln!("{failure:#}");
            exit_code
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
    match cli.command {
        Command::Db(args) => commands::db::run(&args, &runtime_paths),
        Command::Catalog(args) => {
            let config = load_config(&cli.runtime, &runtime_paths)?;
            commands::catalog::run(&args, &runtime_paths, &config)
        }
        Command::Intent(args) => {
            let config = load_config(&cli.runtime, &runtime_paths)?;
            commands::intent::run(&args, &runtime_paths, &config)
        }
        Command::Query(args) => {
            let config = load_config(&cli.runtime, &runtime_paths)?;
            commands::query::run(&args, &runtime_paths, &config)
        }
        Command::Anomaly(args) => {
            let config = load_config(&cli.runtime, &runtime_paths)?;
            commands::anomaly::run(&args, &runtime_paths, &config)
        }
    }
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    if error
        .downcast_ref::<QueryEnvelopeCommandFailure>()
        .is_some_and(QueryEnvelopeCommandFailure::is_intent_rejection)
    {
        EXIT_INTENT_REJECTED
    } else {
        EXIT_RUNTIME_FAILURE
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Db(_) => "db",
        Command::Catalog(_) => "catalog",
        Command::Intent(_) => "intent",
        Command::Query(_) => "query",
        Command::Anomaly(_) => "anomaly",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    claimsight::config::resolve_runtime_paths(&home_dir, &cwd, args.data_dir.as_deref())
}

fn load_config(args: &RuntimeArgs, runtime_paths: &RuntimePaths) -> Result<EngineConfig> {
    let explicit = args
        .config
        .as_deref()
        .map(|path| runtime_paths.resolve(path))
        .transpose()?;
    load_engine_config(
        explicit.as_deref(),
        Some(&runtime_paths.default_config_path()),
    )
}
