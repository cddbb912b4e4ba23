//! kaboom: fire chaos weapons at a local PostgreSQL cluster

use anyhow::{Context, Result};
use clap::Parser;
use pg_kaboom::cluster::PgCluster;
use pg_kaboom::config::{
    load_settings, store_saved_archive_command, Cli, Commands, OutputFormat,
};
use pg_kaboom::launcher::ProcessLauncher;
use pg_kaboom::reporter::{HumanReporter, JsonReporter, Reporter};
use pg_kaboom::{arsenal, Kaboom, KaboomError};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status when a weapon hit an unrecoverable condition
const FATAL_EXIT: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut reporter: Box<dyn Reporter> = match cli.format {
        OutputFormat::Human => Box::new(HumanReporter),
        OutputFormat::Json => Box::new(JsonReporter),
    };

    match run(&cli, reporter.as_mut()) {
        Ok(code) => code,
        Err(e) => {
            let kaboom_err = e.downcast_ref::<KaboomError>();
            let hint = kaboom_err.and_then(KaboomError::hint);
            reporter.on_error(&format!("{:#}", e), hint);
            if kaboom_err.is_some_and(KaboomError::is_fatal) {
                ExitCode::from(FATAL_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli, reporter: &mut dyn Reporter) -> Result<ExitCode> {
    match &cli.command {
        Commands::Arsenal => {
            for (name, description) in arsenal() {
                reporter.on_weapon(name, description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fire { operation, payload } => {
            let mut settings = load_settings(&cli.config)
                .with_context(|| format!("failed to load {}", cli.config.display()))?;
            cli.apply_overrides(&mut settings);

            // Unknown names are a soft failure, so their payload is never read
            let payload: Option<serde_json::Value> = match arsenal::lookup(operation) {
                Some(_) => payload
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .context("payload is not valid JSON")?,
                None => None,
            };

            let pgdata = cli
                .pgdata
                .as_ref()
                .context("no data directory given; pass -D or set PGDATA")?;
            let cluster = PgCluster::new(pgdata);
            tracing::debug!(data_dir = %cluster.data_dir().display(), "attached to cluster");

            let launcher = ProcessLauncher;
            let kaboom = Kaboom::new(&cluster, &launcher);
            let saved_before = settings.saved_archive_command.clone();
            let outcome = kaboom.kaboom(&mut settings, reporter, operation, payload);

            // break-archive may save the old command before a later step fails
            if settings.saved_archive_command != saved_before {
                store_saved_archive_command(&cli.config, &settings.saved_archive_command)
                    .with_context(|| format!("failed to update {}", cli.config.display()))?;
            }

            let handled = outcome?;
            reporter.on_fired(operation, handled);

            // An unknown weapon is reported, not failed
            Ok(ExitCode::SUCCESS)
        }
    }
}
