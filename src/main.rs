use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use freight_dispatch::boards::catalog::default_boards;
use freight_dispatch::boards::BoardOptimizer;
use freight_dispatch::config::{self, EngineConfig};
use freight_dispatch::engine::scheduler;
use freight_dispatch::{AutonomousEngine, EngineBuilder};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the market, decision and strategic loops until Ctrl-C
    Start {
        /// Seed for reproducible load generation
        #[arg(long)]
        seed: Option<u64>,
        /// Region to source loads from (defaults to DISPATCH_DEFAULT_REGION)
        #[arg(long)]
        region: Option<String>,
    },
    /// Drive ticks back to back without timers and print the final status as JSON
    Simulate {
        #[arg(long, default_value_t = 20)]
        ticks: u64,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the board ranking for a region
    Boards { region: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let level = env::var("DISPATCH_LOG_LEVEL")
        .ok()
        .and_then(|raw| Level::from_str(raw.trim()).ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Start { seed, region }) => {
            let mut config = config::load_config().await?;
            if seed.is_some() {
                config.rng_seed = seed;
            }
            run_dispatch(config, region).await?;
        }
        Some(Commands::Simulate { ticks, seed }) => {
            let mut config = config::load_config().await?;
            config.rng_seed = seed.or(config.rng_seed);
            run_simulation(config, ticks).await?;
        }
        Some(Commands::Boards { region }) => {
            let config = config::load_config().await?;
            let optimizer = BoardOptimizer::new(default_boards(), config.region_profiles());
            let ranked = optimizer
                .optimize(&region)
                .with_context(|| format!("cannot rank boards for {}", region))?;
            println!("{}", serde_json::to_string_pretty(&ranked)?);
        }
        None => {
            info!("No command specified. Use --help for available commands.");
        }
    }

    Ok(())
}

async fn run_dispatch(config: EngineConfig, region: Option<String>) -> Result<()> {
    let region = region.unwrap_or_else(|| config.default_region.clone());
    let engine = EngineBuilder::new(config).build().context("failed to build dispatch engine")?;

    engine
        .switch_region(&region)
        .await
        .with_context(|| format!("cannot start sourcing in {}", region))?;

    let handle = scheduler::spawn(Arc::clone(&engine));
    info!("Dispatch engine running in {}. Press Ctrl-C to stop.", region);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    handle.shutdown().await;
    print_status(&engine).await
}

async fn run_simulation(config: EngineConfig, ticks: u64) -> Result<()> {
    let strategic_every = (config.strategic_interval_secs / config.decision_tick_interval_secs).max(1);
    let market_every = (config.market_tick_interval_secs / config.decision_tick_interval_secs).max(1);
    let region = config.default_region.clone();
    let engine = EngineBuilder::new(config).build().context("failed to build dispatch engine")?;

    engine.optimize_region(&region, true).await?;

    for tick in 1..=ticks {
        if tick % market_every == 0 {
            engine.run_market_tick().await?;
        }
        engine.run_decision_tick().await?;
        if tick % strategic_every == 0 {
            engine.run_strategic_tick().await?;
        }
    }

    print_status(&engine).await
}

async fn print_status(engine: &AutonomousEngine) -> Result<()> {
    let report = serde_json::json!({
        "status": engine.get_autonomous_status().await,
        "metrics": engine.get_optimization_metrics().await,
        "recent_decisions": engine.get_recent_decisions(10).await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
