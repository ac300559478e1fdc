use clap::{Parser, Subcommand};
use propline::auth::TokenManager;
use propline::constants::user_friendly_dataset_name;
use propline::config::Config;
use propline::fetch::downloaders::HttpDownloader;
use propline::geocode::client::OneMapClient;
use propline::logging;
use propline::pipeline::PipelineContext;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "propline")]
#[command(about = "Singapore property data pipeline: fetch, geocode, features, unify, impute")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "propline.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh external datasets that are past their freshness threshold
    Fetch {
        /// Re-download even when the cached artifact is fresh
        #[arg(long)]
        force: bool,
        /// Report what would be downloaded without touching network or disk
        #[arg(long)]
        dry_run: bool,
        /// Specific dataset ids to refresh (comma-separated)
        #[arg(long)]
        datasets: Option<String>,
    },
    /// Resolve transaction addresses to coordinates via the geocode cache
    Geocode {
        /// Re-attempt addresses previously marked failed
        #[arg(long)]
        retry_failed: bool,
    },
    /// Compute amenity proximity features for geocoded properties
    Features,
    /// Merge all sources and amenity features into the unified dataset
    Unify,
    /// Impute rental yields over the transaction universe
    Impute,
    /// Run all stages sequentially
    Run {
        /// Force dataset re-download in the fetch stage
        #[arg(long)]
        force: bool,
    },
}

async fn geocode_client(ctx: &PipelineContext) -> anyhow::Result<OneMapClient> {
    let manager = TokenManager::new(&ctx.config.onemap, &ctx.config.data_root)?;
    let token = manager.valid_token().await?;
    Ok(OneMapClient::new(token, ctx.config.onemap.timeout_seconds)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;
    let ctx = PipelineContext::new(config);

    match cli.command {
        Commands::Fetch { force, dry_run, datasets } => {
            println!("🔄 Refreshing datasets...");
            let only: Option<Vec<String>> =
                datasets.map(|list| list.split(',').map(|s| s.trim().to_string()).collect());
            let downloader = HttpDownloader::new(ctx.config.onemap.timeout_seconds)?;
            let report = ctx
                .run_fetch(Box::new(downloader), force, dry_run, only.as_deref())
                .await;
            for outcome in &report.outcomes {
                println!(
                    "   {}: {:?} ({})",
                    user_friendly_dataset_name(&outcome.dataset_id),
                    outcome.status,
                    outcome.reason
                );
            }
        }
        Commands::Geocode { retry_failed } => {
            println!("📍 Geocoding addresses...");
            let client = geocode_client(&ctx).await?;
            match ctx.run_geocode(&client, retry_failed).await {
                Ok(report) => println!(
                    "✅ {} addresses resolved, {} failed ({} in cache)",
                    report.resolved,
                    report.failed,
                    report.total()
                ),
                Err(e) => {
                    error!("Geocoding failed: {}", e);
                    println!("❌ Geocoding failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Features => {
            println!("🗺️  Computing amenity features...");
            let rows = ctx.run_features()?;
            println!("✅ Features computed for {} properties", rows);
        }
        Commands::Unify => {
            println!("🔗 Merging sources...");
            let dataset = ctx.run_unify()?;
            println!("✅ Unified {} records", dataset.records.len());
            for (group, pct) in &dataset.coverage_pct {
                println!("   coverage[{}]: {:.1}%", group, pct);
            }
        }
        Commands::Impute => {
            println!("📈 Imputing rental yields...");
            let records = ctx.run_impute()?;
            println!("✅ {} yield records written", records);
        }
        Commands::Run { force } => {
            println!("🚀 Running full pipeline...");
            let downloader = HttpDownloader::new(ctx.config.onemap.timeout_seconds)?;
            let client = geocode_client(&ctx).await?;
            match ctx.run_all(Box::new(downloader), &client, force).await {
                Ok(()) => {
                    info!("pipeline finished");
                    println!("✅ Full pipeline completed successfully!");
                }
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    println!("❌ Pipeline failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
