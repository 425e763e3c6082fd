use std::env;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use mmotcw::{config::AppConfig, state::AppState, CacheWarmer, CalendarWeek};

/// Fills the preview cache once and exits. An optional argument overrides the
/// year to start from.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let year = match env::args().nth(1) {
        Some(arg) => arg
            .parse::<i32>()
            .with_context(|| format!("invalid year argument: {arg}"))?,
        None => CalendarWeek::current().year,
    };

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "warm_cache",
        source_dir = %config.source_dir.display(),
        cache_dir = %config.cache_dir.display(),
        years = config.warmup_years,
        "loaded configuration"
    );
    let state = AppState::from_config(config)?;

    let mut warmer = CacheWarmer::new(state.store.clone(), state.previews.clone())
        .with_years(state.config.warmup_years);
    if let Some(workers) = state.config.warmup_workers {
        warmer = warmer.with_workers(workers);
    }

    let report = warmer.run(year).await;
    println!(
        "Queued {} previews: {} ready, {} failed.",
        report.queued, report.succeeded, report.failed
    );

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
