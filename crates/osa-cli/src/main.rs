use clap::Parser;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

use osa_cli::cli::{Cli, Commands};

mod commands;

use commands::run::RunArgs;

fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("could not install log subscriber: {err}");
    }

    let result = match &cli.command {
        Commands::Run {
            case,
            config,
            out,
            run_id,
            states,
            threads,
            validation,
            store_states,
        } => commands::run::handle(RunArgs {
            case,
            config: config.as_deref(),
            out,
            run_id: run_id.as_deref(),
            states: *states,
            threads: *threads,
            validation: *validation,
            store_states: *store_states,
        })
        .and_then(|summary| match summary.failure {
            Some(failure) => Err(anyhow::anyhow!("run {} failed: {}", summary.run_id, failure)),
            None => Ok(()),
        }),
        Commands::Summary { store, run, out } => commands::summary::handle(store, run, out),
    };

    if let Err(err) = result {
        error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
