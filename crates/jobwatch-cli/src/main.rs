use anyhow::Result;
use clap::{Parser, Subcommand};
use jobwatch_core::RunMode;
use jobwatch_notify::{Notifier, NotifierConfig};
use jobwatch_sync::SyncConfig;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "jobwatch=info,jobwatch_core=info,jobwatch_storage=info,\
     jobwatch_adapters=info,jobwatch_sync=info,jobwatch_notify=info";

#[derive(Debug, Parser)]
#[command(name = "jobwatch")]
#[command(about = "Watch pracuj.pl for new offers and mail the daily delta")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl, merge into the corpus, write the daily files and notify.
    Run {
        /// Deep pagination; implied when no corpus exists yet.
        #[arg(long)]
        full: bool,
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Corpus size and newest first-seen timestamp.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        full: false,
        json: false,
    }) {
        Commands::Run { full, json } => {
            let notifier_config = NotifierConfig::from_env();
            debug!(config = ?notifier_config, "notifier configuration");
            let notifier = Notifier::from_config(&notifier_config)?;
            let mode = if full { RunMode::Full } else { RunMode::Incremental };

            let run = jobwatch_sync::run_sync_once_from_env(mode, Some(notifier)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run.summary)?);
            } else {
                println!("{}", run.summary.summary_line());
            }
        }
        Commands::Stats => {
            let stats = jobwatch_sync::corpus_stats(&SyncConfig::from_env()).await?;
            let newest = stats
                .newest_first_seen
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "corpus: {} | exists: {} | offers: {} | newest first_seen: {}",
                stats.path, stats.exists, stats.offers, newest
            );
        }
    }

    Ok(())
}
