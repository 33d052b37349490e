pub mod config;
pub mod db;
pub mod dimension;
pub mod error;
pub mod filters;
pub mod models;
pub mod normalize;
pub mod query;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod time;
pub mod vehicle;

use crate::{config::AppConfig, error::ServiceError, server::Server};

/// Bootstraps the metrics service using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config =
        AppConfig::from_env().map_err(|err| ServiceError::Config(format!("{err:#}")))?;
    Server::new(config).await?.run().await
}
