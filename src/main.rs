use std::net::SocketAddr;

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use mmotcw::{config::AppConfig, routes, state::AppState, CacheWarmer, CalendarWeek};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        source_dir = %config.source_dir.display(),
        cache_dir = %config.cache_dir.display(),
        warm_cache = config.warm_cache,
        "loaded configuration"
    );

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST and SERVER_PORT must form a socket address")?;

    let state = AppState::from_config(config)?;

    if state.config.warm_cache {
        let mut warmer = CacheWarmer::new(state.store.clone(), state.previews.clone())
            .with_years(state.config.warmup_years);
        if let Some(workers) = state.config.warmup_workers {
            warmer = warmer.with_workers(workers);
        }
        tokio::spawn(async move {
            let report = warmer.run(CalendarWeek::current().year).await;
            tracing::info!(
                queued = report.queued,
                succeeded = report.succeeded,
                failed = report.failed,
                "preview cache warmed"
            );
        });
    }

    let app = routes::create_router(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("server received shutdown signal");
        })
        .await?;

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
