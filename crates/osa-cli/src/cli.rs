use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "osa", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an online security assessment on a scripted case
    Run {
        /// Case file (YAML or JSON) describing the network, contingencies and engine answers
        #[arg(long, value_hint = ValueHint::FilePath)]
        case: PathBuf,
        /// Workflow parameters (TOML); defaults are used when omitted
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// Directory receiving the stored run
        #[arg(long, value_hint = ValueHint::DirPath)]
        out: PathBuf,
        /// Identifier of the run (a random one when omitted)
        #[arg(long)]
        run_id: Option<String>,
        /// Number of sampled states, overriding the config file
        #[arg(long)]
        states: Option<u32>,
        /// Worker threads (0 = all CPUs), overriding the config file
        #[arg(long)]
        threads: Option<usize>,
        /// Analyze every contingency on every state regardless of verdicts
        #[arg(long)]
        validation: bool,
        /// Persist the variant of every analyzed state
        #[arg(long)]
        store_states: bool,
    },
    /// Write the failures and violations of a stored run as CSV
    Summary {
        /// Directory holding stored runs
        #[arg(long, value_hint = ValueHint::DirPath)]
        store: PathBuf,
        /// Run to summarize
        #[arg(long)]
        run: String,
        /// Output CSV file
        #[arg(long, value_hint = ValueHint::FilePath)]
        out: PathBuf,
    },
}
