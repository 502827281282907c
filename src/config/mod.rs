#[allow(clippy::module_inception)]
mod config;

pub use config::{EngineSettings, PostgresSettings, ServerSettings, Settings};
