use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use swapstats::{
    api::{self, AppState},
    sources::{SourceAdapter, SqlSource, AGGREGATOR_REVENUE, NATIVE_SWAPS},
    AnalyticsEngine, Database, Settings,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new()
        .context("Failed to load configuration. Provide config.yaml or SWAPSTATS__* variables")?;

    SimpleLogger::new()
        .with_level(
            settings
                .log_level
                .parse::<LevelFilter>()
                .unwrap_or(LevelFilter::Info),
        )
        .init()
        .context("Failed to initialize logger")?;

    let db = Database::new(&settings.postgres)
        .await
        .context("Failed to initialize database connection")?;

    let sources: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(SqlSource::new(&NATIVE_SWAPS, db.pool())),
        Arc::new(SqlSource::new(&AGGREGATOR_REVENUE, db.pool())),
    ];
    let engine = AnalyticsEngine::new(&settings.engine, sources);
    info!("Engine ready with sources: {}", engine.source_names().join(", "));

    let server = api::run_server(
        &settings.server,
        AppState {
            engine: Arc::new(engine),
            database: Some(db),
        },
    )
    .context("Failed to start HTTP server")?;

    let handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Serving analytics. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    info!("Draining in-flight requests...");
    handle.stop(true).await;
    let _ = server_task.await;

    info!("Server stopped");
    Ok(())
}
