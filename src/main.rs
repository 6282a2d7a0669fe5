//! # trendscope
//!
//! Collects trending items from JSON APIs, RSS feeds and rendered pages,
//! stores them as one Markdown file per day and serves them over HTTP.
//!
//! ## Usage
//!
//! ```sh
//! trendscope --config-dir ./config serve
//! trendscope collect --source hackernews --source github
//! trendscope sources --profile tech
//! trendscope test-source hackernews
//! ```

use clap::Parser;
use itertools::Itertools;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};
use trendscope::collectors::CollectorRegistry;
use trendscope::config::{AppConfig, ConfigDir};
use trendscope::orchestrator::CollectionService;
use trendscope::server::{self, AppState};
use trendscope::store::TrendStore;
use trendscope::utils::ensure_writable_dir;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    let config_dir = ConfigDir::new(args.config_dir.clone());
    let config = config_dir.load_app_config().await?;

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(config_dir = %args.config_dir.display(), "trendscope starting up");
    debug!(command = ?args.command(), "Parsed CLI arguments");

    match args.command() {
        Command::Serve => serve(config_dir, &config).await?,
        Command::Collect { sources, profile } => {
            let profile = profile.unwrap_or_else(|| config.active_profile.clone());
            collect(&config_dir, &config, &profile, &sources).await?
        }
        Command::Sources { profile } => {
            let profile = profile.unwrap_or_else(|| config.active_profile.clone());
            list_sources(&config_dir, &profile).await?
        }
        Command::TestSource { id } => test_source(&config_dir, &config, &id).await?,
    }

    let elapsed = start_time.elapsed();
    info!(?elapsed, "Execution complete");
    Ok(())
}

async fn serve(config_dir: ConfigDir, config: &AppConfig) -> Result<(), Box<dyn Error>> {
    if let Err(e) = ensure_writable_dir(&config.storage.base_path).await {
        error!(
            path = %config.storage.base_path.display(),
            error = %e,
            "Storage directory is not writable (fix perms or choose a different base_path)"
        );
        return Err(e.into());
    }
    if !config.llm.is_configured() {
        warn!("llm.api_key is empty; agent endpoints will answer 503");
    }
    let state = AppState::from_config(config_dir, config);
    server::serve(state, &config.server.addr()).await?;
    Ok(())
}

async fn collect(
    config_dir: &ConfigDir,
    config: &AppConfig,
    profile: &str,
    source_ids: &[String],
) -> Result<(), Box<dyn Error>> {
    ensure_writable_dir(&config.storage.base_path).await?;
    let sources = config_dir.load_sources(profile).await?;
    let store = Arc::new(TrendStore::new(&config.storage.base_path, profile));
    let service = CollectionService::new(store, CollectorRegistry::with_defaults(config));

    let result = if source_ids.is_empty() {
        service.collect_all(profile, &sources).await
    } else {
        service.collect(profile, source_ids, &sources).await
    };

    let by_source = result.trends.iter().counts_by(|t| t.source_id.as_str());
    for (source, count) in by_source.iter().sorted() {
        println!("{source:<24} {count:>5}");
    }
    println!("collected {} trends", result.trends.len());
    if !result.errors.is_empty() {
        eprintln!("{} errors:\n  {}", result.errors.len(), result.errors.iter().join("\n  "));
    }
    Ok(())
}

async fn list_sources(config_dir: &ConfigDir, profile: &str) -> Result<(), Box<dyn Error>> {
    let sources = config_dir.load_sources(profile).await?;
    if sources.is_empty() {
        println!("no sources configured for profile {profile}");
        return Ok(());
    }
    for source in &sources {
        let state = if source.enabled { "" } else { " (disabled)" };
        println!("{:<20} {:<7} {}{state}", source.id, source.kind, source.name);
    }
    Ok(())
}

async fn test_source(
    config_dir: &ConfigDir,
    config: &AppConfig,
    id: &str,
) -> Result<(), Box<dyn Error>> {
    let sources = config_dir.load_sources(&config.active_profile).await?;
    let source = sources
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| trendscope::Error::not_found("source", id))?;
    let registry = CollectorRegistry::with_defaults(config);
    let collector = registry.get(&source.kind).ok_or_else(|| {
        trendscope::Error::Validation(format!(
            "no collector for type {} (available: {})",
            source.kind,
            registry.kinds().iter().join(", ")
        ))
    })?;

    collector.validate(source)?;
    collector.test(source).await?;
    println!("{id}: ok");
    Ok(())
}
