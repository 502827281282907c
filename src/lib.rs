pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod sources;
pub mod utils;

pub use config::Settings;
pub use db::Database;
pub use engine::{AnalyticsEngine, EngineError};
