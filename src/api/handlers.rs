use actix_web::{web, HttpResponse};
use log::error;

use super::{
    types::{AnalyticsQuery, ApiError, HealthResponse},
    AppState,
};
use crate::engine::AnalyticsRequest;

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let Some(database) = &state.database else {
        return HttpResponse::Ok().json(HealthResponse {
            status: "ok",
            database: "disabled",
        });
    };

    match database.postgres.health_check().await {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            status: "ok",
            database: "ok",
        }),
        Err(e) => {
            error!("Health check failed: {:#}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "degraded",
                database: "unavailable",
            })
        },
    }
}

/// `GET /api/analytics`
pub async fn analytics(
    state: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, ApiError> {
    let request = AnalyticsRequest::from(query.into_inner());
    let response = state.engine.analytics(&request).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// `GET /api/analytics/breakdown`
pub async fn breakdown(
    state: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let dimension = query.dimension()?;
    let response = state
        .engine
        .breakdown(&AnalyticsRequest::from(query), dimension)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// `GET /api/analytics/stacked`
pub async fn stacked(
    state: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let dimension = query.dimension()?;
    let response = state
        .engine
        .stacked(&AnalyticsRequest::from(query), dimension)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// `GET /api/analytics/summary`
pub async fn summary(
    state: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, ApiError> {
    let request = AnalyticsRequest::from(query.into_inner());
    let response = state.engine.summary(&request).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// `GET /api/analytics/top-paths`
pub async fn top_paths(
    state: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let metric = query.metric()?;
    let limit = query.limit;
    let response = state
        .engine
        .top_paths(&AnalyticsRequest::from(query), metric, limit)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}
