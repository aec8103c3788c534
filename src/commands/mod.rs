//! Operator CLI command handlers (DTO boundary).

pub mod inspect;
pub mod migrate;
pub mod revision;

use crate::app::{SchemaVersionManager, StepOptions};
use crate::config::Config;
use crate::error::AppError;
use crate::infra::{open_db, RevisionStore};
use clap::{Parser, Subcommand};
use std::fmt::Display;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "affairs-migrate",
    version,
    about = "Schema revision manager for the wedding-site database"
)]
pub struct Cli {
    /// JSON config file
    #[clap(long, env = "MIGRATE_CONFIG")]
    pub config: Option<PathBuf>,
    /// SQLite database file, or :memory:
    #[clap(long, env = "DB_PATH")]
    pub database: Option<String>,
    /// Directory holding revision files
    #[clap(long, env = "MIGRATIONS_DIR")]
    pub migrations_dir: Option<PathBuf>,
    /// JSON model of the desired schema
    #[clap(long, env = "MODEL_PATH")]
    pub model: Option<PathBuf>,
    /// Per-step timeout in seconds
    #[clap(long, env = "MIGRATE_STEP_TIMEOUT")]
    pub step_timeout: Option<u64>,
    /// Print results and errors as JSON
    #[clap(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a revision from the model (if a message is given), then upgrade
    Upgrade {
        message: Option<String>,
        #[clap(long, default_value = "head")]
        to: String,
    },
    /// Revert the given number of revisions
    Downgrade {
        #[clap(default_value_t = 1)]
        steps: usize,
        /// Revert down to this revision instead (`base` reverts everything)
        #[clap(long)]
        to: Option<String>,
    },
    /// Show the applied revision
    Current,
    /// List revisions from root to head
    History,
    /// Show the head revision
    Heads,
    /// Generate a revision from the model without applying it
    Revision { message: String },
    /// Set the applied revision without running anything
    Stamp { target: String },
    /// Verify round trips and model drift
    Check,
}

impl Cli {
    /// File config first, then environment / flags on top.
    pub fn resolve_config(&self) -> Result<Config, AppError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations_dir = dir.clone();
        }
        if let Some(model) = &self.model {
            config.model_path = Some(model.clone());
        }
        if let Some(secs) = self.step_timeout {
            config.step_timeout_secs = Some(secs);
        }
        Ok(config)
    }
}

pub struct Output {
    pub json: bool,
}

impl Output {
    pub fn emit(&self, text: impl Display, value: serde_json::Value) {
        if self.json {
            println!("{}", value);
        } else {
            println!("{}", text);
        }
    }
}

pub(crate) fn open_manager(config: &Config) -> Result<SchemaVersionManager, AppError> {
    let db = open_db(&config.location(), config.busy_timeout())?;
    let store = RevisionStore::new(&config.migrations_dir);
    let options = StepOptions {
        timeout: config.step_timeout(),
        abort: None,
    };
    Ok(SchemaVersionManager::open(db, store)?.with_options(options))
}

pub fn execute(cli: &Cli) -> Result<(), AppError> {
    let config = cli.resolve_config()?;
    let out = Output { json: cli.json };
    match &cli.command {
        Command::Upgrade { message, to } => migrate::upgrade(&config, message.as_deref(), to, &out),
        Command::Downgrade { steps, to } => migrate::downgrade(&config, *steps, to.as_deref(), &out),
        Command::Stamp { target } => migrate::stamp(&config, target, &out),
        Command::Current => inspect::current(&config, &out),
        Command::History => inspect::history(&config, &out),
        Command::Heads => inspect::heads(&config, &out),
        Command::Check => inspect::check(&config, &out),
        Command::Revision { message } => revision::generate(&config, message, &out),
    }
}
