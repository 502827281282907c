use thiserror::Error;

/// Errors surfaced by the aggregation engine.
///
/// Validation variants are raised before any data access happens.
/// `DataUnavailable` comes from a source adapter and fails the whole request:
/// a partial merge would understate totals without any indication.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid granularity: {0}")]
    InvalidGranularity(String),

    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    #[error("data unavailable from {source_name}: {reason}")]
    DataUnavailable { source_name: String, reason: String },
}

impl EngineError {
    pub fn data_unavailable(source_name: &str, reason: impl ToString) -> Self {
        Self::DataUnavailable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange(_)
                | Self::InvalidGranularity(_)
                | Self::InvalidDimension(_)
                | Self::InvalidMetric(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
