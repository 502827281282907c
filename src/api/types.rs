use std::fmt;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};

use crate::{
    engine::{split_list, AnalyticsRequest, EngineError, RankMetric},
    sources::Dimension,
};

/// Query string shared by the analytics routes.
///
/// `r` and `g` are accepted as short forms of `range` and `granularity`.
/// `providers` (or `chains`) is a comma-separated provider list.
#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(alias = "r")]
    pub range: Option<String>,
    #[serde(alias = "g")]
    pub granularity: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    pub provider: Option<String>,
    #[serde(alias = "chains")]
    pub providers: Option<String>,
    pub dimension: Option<String>,
    pub metric: Option<String>,
    pub limit: Option<usize>,
}

impl AnalyticsQuery {
    /// Requested dimension, `provider` when absent.
    pub fn dimension(&self) -> Result<Dimension, EngineError> {
        match self.dimension.as_deref() {
            Some(token) if !token.trim().is_empty() => token.parse(),
            _ => Ok(Dimension::Provider),
        }
    }

    /// Ranking metric, `volume` when absent.
    pub fn metric(&self) -> Result<RankMetric, EngineError> {
        match self.metric.as_deref() {
            Some(token) if !token.trim().is_empty() => token.parse(),
            _ => Ok(RankMetric::default()),
        }
    }
}

impl From<AnalyticsQuery> for AnalyticsRequest {
    fn from(query: AnalyticsQuery) -> Self {
        AnalyticsRequest {
            range: query.range,
            start_date: query.start_date,
            end_date: query.end_date,
            granularity: query.granularity,
            provider: query.provider,
            providers: query.providers.as_deref().map(split_list).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// HTTP view of an [`EngineError`].
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.0.to_string(),
        })
    }
}
