use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    anomaly::AnomalyArgs, catalog::CatalogArgs, db::DbArgs, intent::IntentArgs, query::QueryArgs,
};

#[derive(Debug, Parser)]
#[command(
    name = "claimsight",
    version,
    about = "Validated natural-language analytics over a claims mart"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    /// Directory holding the SQLite database; defaults to `~/.claimsight`.
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Engine config JSON; defaults to `config.json` in the data dir when present.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Db(DbArgs),
    Catalog(CatalogArgs),
    Intent(IntentArgs),
    Query(QueryArgs),
    Anomaly(AnomalyArgs),
}
