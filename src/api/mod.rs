//! Read-only HTTP surface over the engine.

use std::sync::Arc;

use actix_web::{
    dev::Server, error::InternalError, middleware::Logger, web, App, HttpResponse, HttpServer,
};
use log::info;

use crate::{config::ServerSettings, db::Database, engine::AnalyticsEngine};

pub mod handlers;
pub mod types;

pub use types::{AnalyticsQuery, ApiError, ErrorBody};

/// Shared by every worker.
pub struct AppState {
    pub engine: Arc<AnalyticsEngine>,
    /// `None` when the engine runs without PostgreSQL (in-memory sources).
    pub database: Option<Database>,
}

pub fn configure_router(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(|err, _req| {
        let body = ErrorBody {
            error: err.to_string(),
        };
        InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    }))
    .service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/analytics", web::get().to(handlers::analytics))
            .route("/analytics/breakdown", web::get().to(handlers::breakdown))
            .route("/analytics/stacked", web::get().to(handlers::stacked))
            .route("/analytics/summary", web::get().to(handlers::summary))
            .route("/analytics/top-paths", web::get().to(handlers::top_paths)),
    );
}

/// Bind and start the server. Signals are left to the caller.
pub fn run_server(settings: &ServerSettings, state: AppState) -> std::io::Result<Server> {
    info!("HTTP server listening on {}:{}", settings.host, settings.port);

    let state = web::Data::new(state);
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(configure_router)
    })
    .disable_signals();

    if let Some(workers) = settings.workers {
        server = server.workers(workers);
    }

    Ok(server.bind((settings.host.as_str(), settings.port))?.run())
}
