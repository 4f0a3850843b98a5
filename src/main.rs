use clap::Parser;
use std::path::PathBuf;

mod client;
mod config;
mod env;
mod logger;
mod path;
mod projection;
mod storage;
mod sync;
mod template;
mod throttle;

use client::GarminClient;
use config::Config;
use logger::Logger;

#[derive(Parser)]
#[command(name = "fitsync")]
#[command(version)]
#[command(about = "Incrementally syncs fitness activities to local JSON files", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Username to login (overrides config)
    #[arg(long, short)]
    username: Option<String>,

    /// Password to login (overrides config)
    #[arg(long, short)]
    password: Option<String>,

    /// Suppress progress messages
    #[arg(long, short)]
    silent: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let logger = Logger::new(cli.silent);
    let config = Config::load(cli.config, cli.username, cli.password)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_sync(&config, logger))
}

async fn run_sync(config: &Config, logger: Logger) -> Result<(), Box<dyn std::error::Error>> {
    let environment = env::create_env(config.general.base_dir.as_ref());
    let client = GarminClient::new(config.general.request_delay, logger)?;

    client.sign_in(&config.credentials, false).await?;

    let result = sync::update_activities(
        &client,
        &config.search,
        &config.fetches,
        &environment,
        logger,
    )
    .await;

    // discard any still-queued requests before shutting down
    client.throttle().cancel();

    result?;
    Ok(())
}
