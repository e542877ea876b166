use anyhow::Context;
use clap::Parser;
use randomuser_etl::apis::RandomUserApi;
use randomuser_etl::config::{Config, DEFAULT_CONFIG_PATH};
use randomuser_etl::logging;
use randomuser_etl::metrics;
use randomuser_etl::pipeline::Pipeline;
use randomuser_etl::storage;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "randomuser_etl")]
#[command(about = "Partition randomuser.me records into SQL tables and export unions as JSON")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of users to request, overriding the config file
    #[arg(long)]
    results: Option<u32>,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(results) = cli.results {
        config.api.results = results;
        config.validate()?;
    }

    let api = RandomUserApi::new(
        config.api.base_url.clone(),
        config.api.timeout_seconds.map(Duration::from_secs),
    )?;
    let pipeline = Pipeline::from_config(&config)?;
    let metrics_handle = if config.metrics.enabled {
        metrics::init_metrics()
    } else {
        None
    };
    let mut store = storage::connect(&config.store)
        .await
        .context("connecting to the store")?;

    let result = pipeline.run(&api, store.as_mut()).await?;

    info!("Pipeline finished");
    println!("\n📊 Pipeline results:");
    println!("   Fetched users: {} (from {})", result.fetched_rows, result.source);
    for table in result.gender_tables.iter().chain(&result.age_tables) {
        println!("   {}: {} rows", table.name, table.rows);
    }
    println!("   Combined table: {}", result.top_table);
    for export in &result.exports {
        let dedup = if export.deduplicated { ", duplicates dropped" } else { "" };
        println!("   Created {} ({} rows{})", export.path.display(), export.rows, dedup);
    }
    match &metrics_handle {
        Some(handle) => {
            metrics::write_snapshot(handle, &config.metrics.snapshot_path)?;
            println!("   Metrics snapshot: {}", config.metrics.snapshot_path.display());
        }
        None => println!("   Metrics: disabled"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Pipeline failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}
