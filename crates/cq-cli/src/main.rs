use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cq_storage::{PgRecordStore, RecordStore};
use cq_sync::{JobKind, SyncConfig, SyncPipeline, SyncRunSummary};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "cq-cli")]
#[command(about = "Congress member and legislation sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Members, then legislation.
    Sync,
    Members,
    Legislation,
    Migrate,
    /// Run jobs on their cron schedules until interrupted.
    Schedule,
    /// Print a random sample of current members as JSON.
    Sample {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn print_summary(summary: &SyncRunSummary) {
    println!(
        "{} sync complete: run_id={} pages={} records={} sponsorships={} details_missing={}",
        summary.job,
        summary.run_id,
        summary.pages_fetched,
        summary.records_upserted,
        summary.sponsorships_upserted,
        summary.details_missing
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    cq_sync::init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let pipeline = SyncPipeline::connect(config).await?;
            for summary in pipeline.run_all().await? {
                print_summary(&summary);
            }
        }
        Commands::Members => {
            let pipeline = SyncPipeline::connect(config).await?;
            print_summary(&pipeline.run_job(JobKind::Members).await?);
        }
        Commands::Legislation => {
            let pipeline = SyncPipeline::connect(config).await?;
            print_summary(&pipeline.run_job(JobKind::Legislation).await?);
        }
        Commands::Migrate => {
            let store = PgRecordStore::connect(&config.store_config()).await?;
            store.migrate(&config.migrations_dir).await?;
            println!("migrations applied from {}", config.migrations_dir.display());
        }
        Commands::Schedule => {
            let pipeline = SyncPipeline::connect(config).await?;
            let (tx, rx) = mpsc::channel(JobKind::ALL.len());
            let Some(mut sched) = pipeline.maybe_build_scheduler(tx).await? else {
                bail!("scheduler disabled; set CQ_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; ctrl-c to stop");
            tokio::select! {
                _ = pipeline.drain_triggers(rx) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("waiting for ctrl-c")?;
                    info!("shutting down scheduler");
                }
            }
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Sample { limit } => {
            let store = PgRecordStore::connect(&config.store_config()).await?;
            let members = store.sample_current_members(limit).await?;
            println!("{}", serde_json::to_string_pretty(&members)?);
        }
    }

    Ok(())
}
