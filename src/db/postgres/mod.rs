pub mod client;

pub use client::PostgresClient;
