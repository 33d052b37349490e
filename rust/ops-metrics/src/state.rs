use crate::{config::AppConfig, db::AnalyticsClient, query::AnalyticsEngine};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub client: Arc<AnalyticsClient>,
    pub engine: AnalyticsEngine,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, client: Arc<AnalyticsClient>) -> Self {
        let engine = AnalyticsEngine::new(Arc::clone(&client), Arc::clone(&config));
        Self {
            config,
            client,
            engine,
        }
    }
}
