//! oxide-sync CLI
//!
//! Command-line tool for synchronising a SQLite schema with a reference.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use oxide_sync::prelude::*;

/// Data-preserving schema synchronisation for SQLite.
#[derive(Parser)]
#[command(name = "oxide-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Databases {
    /// Database to migrate.
    #[arg(long, visible_alias = "prod", env = "OXIDE_SYNC_TARGET")]
    target: PathBuf,

    /// Database holding the desired schema. Opened read-only.
    #[arg(long, visible_alias = "pre", env = "OXIDE_SYNC_REFERENCE")]
    reference: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the migration on a copy, then apply it to the target.
    Sync {
        #[command(flatten)]
        databases: Databases,

        /// Validate on a copy only; never touch the target.
        #[arg(long)]
        dry_run: bool,

        /// Drop tables that are not in the reference.
        #[arg(long)]
        allow_drop: bool,

        /// Backup directory (defaults to `versions` next to the target).
        #[arg(long, env = "OXIDE_SYNC_VERSIONS_DIR")]
        versions_dir: Option<PathBuf>,

        /// Where generated SQL is saved.
        #[arg(long, env = "OXIDE_SYNC_ARTIFACT_DIR", default_value_os_t = std::env::temp_dir())]
        artifact_dir: PathBuf,

        /// Clear an integrity hold left by an earlier run.
        #[arg(long)]
        acknowledge_integrity_hold: bool,
    },

    /// Print the migration plan without validating or applying it.
    Plan {
        #[command(flatten)]
        databases: Databases,

        /// Include drops of tables that are not in the reference.
        #[arg(long)]
        allow_drop: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = PlanFormat::Sql)]
        format: PlanFormat,
    },

    /// Write a compact, consistent copy of a database.
    Clone {
        /// Database to copy.
        source: PathBuf,

        /// Destination file, replaced if present.
        destination: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanFormat {
    Sql,
    Json,
}

const EXIT_APPLY_FAILURE: u8 = 3;
const EXIT_INTEGRITY_WARNING: u8 = 4;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
        return ExitCode::FAILURE;
    }

    let interrupt = Interrupt::new();
    let listener = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping before the next stage");
            listener.trigger();
        }
    });

    match run(cli.command, interrupt).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            exit_code(&e)
        }
    }
}

async fn run(command: Commands, interrupt: Interrupt) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Sync {
            databases,
            dry_run,
            allow_drop,
            versions_dir,
            artifact_dir,
            acknowledge_integrity_hold,
        } => {
            let options = SyncOptions {
                dry_run,
                allow_drop,
                artifact_dir,
                versions_dir,
                acknowledge_hold: acknowledge_integrity_hold,
            };
            let pipeline = SyncPipeline::new(databases.target, databases.reference, options)
                .with_interrupt(interrupt);

            match pipeline.run().await? {
                SyncOutcome::NoChanges { .. } => {}
                SyncOutcome::Validated { artifact, plan } => {
                    info!(
                        "Dry run complete: {} statement(s) validated. SQL: {}",
                        plan.change_count(),
                        artifact.display()
                    );
                }
                SyncOutcome::Applied {
                    artifact, backup, ..
                } => {
                    info!("Migration applied to target.");
                    info!("Backup: {}", backup.path.display());
                    info!("SQL: {}", artifact.display());
                }
                SyncOutcome::AppliedWithIntegrityWarning {
                    backup,
                    integrity,
                    hold,
                    ..
                } => {
                    warn!("Migration applied but integrity_check failed: {}", integrity.summary());
                    warn!("Backup available: {}", backup.path.display());
                    warn!(
                        "Further runs are blocked until the hold is acknowledged: {}",
                        hold.display()
                    );
                    return Ok(ExitCode::from(EXIT_INTEGRITY_WARNING));
                }
            }
        }

        Commands::Plan {
            databases,
            allow_drop,
            format,
        } => {
            let options = SyncOptions {
                allow_drop,
                ..SyncOptions::default()
            };
            let plan = SyncPipeline::new(databases.target, databases.reference, options)
                .with_interrupt(interrupt)
                .plan()
                .await?;

            match format {
                PlanFormat::Sql => print!("{}", plan.render()),
                PlanFormat::Json => println!("{}", plan.to_json()?),
            }
            if plan.is_empty() {
                info!("No schema changes detected.");
            }
        }

        Commands::Clone {
            source,
            destination,
        } => {
            interrupt.check()?;
            let report = clone_snapshot(&source, &destination).await?;
            info!(
                "Cloned {} -> {} ({:?}, {} bytes)",
                report.source.display(),
                report.destination.display(),
                report.method,
                report.bytes
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Some(SyncError::ApplyFailure { .. }) => ExitCode::from(EXIT_APPLY_FAILURE),
        _ => ExitCode::FAILURE,
    }
}
