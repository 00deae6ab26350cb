use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use portico_core::PropertyId;
use portico_store::{PgUnifiedStore, StoreConfig};
use portico_sync::{maybe_build_scheduler, SyncConfig, SyncRunner};

#[derive(Debug, Parser)]
#[command(name = "portico")]
#[command(about = "Portfolio analytics for apartment owners")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull raw PMS reports and rebuild the unified tables.
    Sync {
        /// Sync one registered property instead of the whole registry.
        #[arg(long)]
        property: Option<String>,
        /// Snapshot date for as-of reports, YYYY-MM-DD. Defaults to today.
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Create the unified store schema.
    Migrate,
    /// Serve the read API, with the cron sync if enabled.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync {
        property: None,
        as_of: None,
    }) {
        Commands::Sync { property, as_of } => {
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let runner = SyncRunner::from_env().await?;
            match property {
                Some(id) => {
                    let property_id = PropertyId::new(id);
                    let report = runner.sync_registered(&property_id, as_of).await?;
                    println!(
                        "sync complete: property={} rows_written={} rows_skipped={} warnings={}",
                        property_id,
                        report.rows_written,
                        report.rows_skipped,
                        report.warnings.len()
                    );
                }
                None => {
                    let summary = runner.sync_all(as_of).await?;
                    println!(
                        "sync complete: run_id={} synced={} failed={} rows_written={} reports={}",
                        summary.run_id,
                        summary.properties_synced,
                        summary.properties_failed,
                        summary.rows_written,
                        summary.reports_dir
                    );
                }
            }
        }
        Commands::Migrate => {
            let store = PgUnifiedStore::connect(&StoreConfig::from_env()).await?;
            store.init_schema().await?;
            println!("migrate complete: unified tables are in place");
        }
        Commands::Serve => {
            let sync_config = SyncConfig::from_env();
            let scheduler = if sync_config.scheduler_enabled {
                let runner = Arc::new(SyncRunner::from_env().await?);
                maybe_build_scheduler(Arc::clone(&runner)).await?
            } else {
                None
            };
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting sync scheduler")?;
                println!("sync scheduler running: cron {}", sync_config.sync_cron);
            }
            portico_web::serve_from_env().await?;
        }
    }

    Ok(())
}
