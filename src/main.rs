mod client;
mod config;
mod limiter;
mod models;
mod pipeline;
mod query;
mod rank;
mod resource;
mod response;
mod server;
mod store;
mod worker;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use client::{Client, ClientConfig};
use config::{Config, TimestampStore};
use limiter::Limiter;
use server::AppState;
use store::mongo::MongoStore;
use worker::owner::OwnerWorker;
use worker::repository::RepositoryWorker;
use worker::{Context, Worker};

#[derive(Parser)]
#[command(name = "gh-ranks")]
#[command(about = "Harvests public GitHub metadata and serves ranked leaderboards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the harvest workers and the read API until interrupted
    Serve,
    /// Run one collect cycle for an entity kind, then exit
    Collect {
        #[arg(value_enum)]
        kind: Kind,
    },
    /// Run one rank cycle for an entity kind, then exit
    Rank {
        #[arg(value_enum)]
        kind: Kind,
    },
    /// Probe the upstream rate budget
    RateLimit,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Owners,
    Repositories,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Collect { kind } => {
            let worker = worker_for(kind, build_context(&config).await?);
            worker.init().await?;
            worker.collect().await
        }
        Commands::Rank { kind } => {
            let worker = worker_for(kind, build_context(&config).await?);
            worker.init().await?;
            worker.rank().await
        }
        Commands::RateLimit => rate_limit(&config).await,
    }
}

async fn build_context(config: &Config) -> Result<Arc<Context>> {
    let store = MongoStore::connect(&config.mongo_url, &config.mongo_database).await?;
    let client = Client::new(ClientConfig::new(
        config.api_url.clone(),
        config.api_token.clone(),
    ))?;
    let timestamps = Arc::new(TimestampStore::load(config.timestamp_path.clone())?);
    Ok(Arc::new(Context {
        store: Arc::new(store),
        client,
        limiter: Limiter::new(),
        timestamps,
    }))
}

fn worker_for(kind: Kind, ctx: Arc<Context>) -> Arc<dyn Worker> {
    match kind {
        Kind::Owners => Arc::new(OwnerWorker::new(ctx)),
        Kind::Repositories => Arc::new(RepositoryWorker::new(ctx)),
    }
}

/// Run both supervisors and the read API; ctrl-c stops everything.
async fn serve(config: Config) -> Result<()> {
    let ctx = build_context(&config).await?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for kind in [Kind::Owners, Kind::Repositories] {
        let worker = worker_for(kind, Arc::clone(&ctx));
        handles.push(tokio::spawn(worker::run(worker, Arc::clone(&shutdown))));
    }

    let state = AppState {
        store: Arc::clone(&ctx.store),
        timestamps: Arc::clone(&ctx.timestamps),
    };
    let api = tokio::spawn(server::serve(state, config.web_port));

    tokio::signal::ctrl_c().await?;
    eprintln!("\n\x1b[33m!\x1b[0m Shutting down workers...");
    shutdown.store(true, Ordering::SeqCst);
    for handle in handles {
        handle.abort();
        let _ = handle.await;
    }
    api.abort();
    eprintln!("\x1b[32mok\x1b[0m Server stopped");
    Ok(())
}

async fn rate_limit(config: &Config) -> Result<()> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RateLimitData {
        #[serde(default)]
        rate_limit: limiter::RateBudget,
    }

    let client = Client::new(ClientConfig::new(
        config.api_url.clone(),
        config.api_token.clone(),
    ))?;
    let res = client
        .search::<RateLimitData>(
            "query {\n  rateLimit {\n    cost\n    limit\n    nodeCount\n    remaining\n    resetAt\n    used\n  }\n}",
        )
        .await?;
    let budget = res
        .data
        .context("Rate limit response carried no data")?
        .rate_limit;
    let reset = budget
        .reset_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{}/{} points remaining (used {}), resets at {}",
        budget.remaining, budget.limit, budget.used, reset
    );
    Ok(())
}
