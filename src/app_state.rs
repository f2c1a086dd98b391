use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::engine::Engine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<AppConfig>,
    pub prometheus: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(engine: Engine, config: AppConfig) -> Self {
        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(Arc::new(handle));
        self
    }
}
