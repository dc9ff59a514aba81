use anyhow::Context;
use clap::{Parser, Subcommand};
use kpi_ingest::analysis::{generate_global_analysis, ChatCompletionClient};
use kpi_ingest::analytics::{run_outliers, run_ranking};
use kpi_ingest::config::Config;
use kpi_ingest::infra::ReqwestHttp;
use kpi_ingest::logging;
use kpi_ingest::pipeline::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kpi_ingest")]
#[command(about = "Country KPI ingestion, outlier detection and ranking")]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch KPI datasets from their sources
    Fetch {
        /// Only these KPI identifiers (comma-separated)
        #[arg(long, value_delimiter = ',')]
        kpis: Option<Vec<String>>,
    },
    /// Compute outlier statistics over the stored datasets
    Outliers,
    /// Compute the overall country ranking
    Rank,
    /// Generate the global prose analysis (needs an API key)
    Analyze,
    /// Fetch, then rank, then compute outliers
    Run {
        /// Only these KPI identifiers (comma-separated)
        #[arg(long, value_delimiter = ',')]
        kpis: Option<Vec<String>>,
    },
}

async fn fetch(config: &Config, kpis: Option<Vec<String>>) -> anyhow::Result<()> {
    let http = ReqwestHttp::new(&config.http.user_agent).context("building HTTP client")?;
    let orchestrator = Orchestrator::with_http(config.clone(), Arc::new(http));
    let report = orchestrator.run(kpis.as_deref()).await?;
    println!("{report}");
    Ok(())
}

fn outliers(config: &Config) -> anyhow::Result<()> {
    let report = run_outliers(config)?;
    println!("Outlier statistics written for {} KPIs", report.summary.len());
    Ok(())
}

fn rank(config: &Config) -> anyhow::Result<()> {
    let entries = run_ranking(config)?;
    println!("Overall ranking written for {} countries", entries.len());
    Ok(())
}

async fn analyze(config: &Config) -> anyhow::Result<()> {
    let client = ChatCompletionClient::from_config(&config.completion, config.http.completion_timeout())?;
    match generate_global_analysis(config, &client).await? {
        Some(_) => println!("Global analysis written"),
        None => println!("No KPI data found; run `fetch` first"),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let _log_guard = logging::init_logging(&config.paths.log_dir);
    info!(data_dir = %config.paths.data_dir.display(), "Configuration loaded");

    match cli.command {
        Commands::Fetch { kpis } => fetch(&config, kpis).await?,
        Commands::Outliers => outliers(&config)?,
        Commands::Rank => rank(&config)?,
        Commands::Analyze => analyze(&config).await?,
        Commands::Run { kpis } => {
            fetch(&config, kpis).await?;
            // Ranking and outliers read whatever datasets are on disk.
            if let Err(e) = rank(&config) {
                error!(error = ?e, "Ranking failed");
            }
            if let Err(e) = outliers(&config) {
                error!(error = ?e, "Outlier detection failed");
            }
        }
    }
    Ok(())
}
