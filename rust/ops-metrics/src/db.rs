use crate::{
    config::ClickHouseConfig,
    error::{Result, ServiceError},
};
use anyhow::Context;
use clickhouse::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Shared handle to the analytics warehouse.
///
/// Built once by the composition root and handed to every report through the
/// router state. The underlying HTTP client is stateless, so requests share it
/// without coordination; `close` only stops new acquisitions.
pub struct AnalyticsClient {
    client: Client,
    closed: AtomicBool,
}

impl AnalyticsClient {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let mut client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user);

        if !config.password.is_empty() {
            client = client.with_password(&config.password);
        }

        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    /// Builds the client and runs a one-time connectivity check.
    ///
    /// A failed check is logged rather than returned so the service can start
    /// before the warehouse does; `/health` keeps reporting the real state.
    pub async fn connect(config: &ClickHouseConfig) -> Self {
        let client = Self::new(config);
        match client.ping().await {
            Ok(()) => info!(url = %config.url, "analytics store connectivity check succeeded"),
            Err(err) => {
                error!(url = %config.url, error = ?err, "initial analytics store connectivity check failed")
            }
        }
        client
    }

    pub fn acquire(&self) -> Result<&Client> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "analytics client has been closed"
            )));
        }
        Ok(&self.client)
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let client = self.acquire().map_err(|err| anyhow::anyhow!(err.to_string()))?;
        client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .context("analytics store health check failed")?;
        Ok(())
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("analytics client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
