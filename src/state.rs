use axum::extract::FromRef;
use std::sync::Arc;

use crate::config::{BasicCredentials, GatewayConfig};
use crate::services::influx::TimeSeriesStore;
use crate::services::metadata::MetadataStore;
use crate::services::metadata_updater::MetadataQueue;
use crate::units::UnitTable;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub credentials: Arc<BasicCredentials>,
    pub units: Arc<UnitTable>,
    pub metadata: Arc<dyn MetadataStore>,
    pub store: Arc<dyn TimeSeriesStore>,
    /// Present on update listeners only.
    pub metadata_queue: Option<MetadataQueue>,
}

impl AppState {
    pub fn new(
        config: Arc<GatewayConfig>,
        metadata: Arc<dyn MetadataStore>,
        store: Arc<dyn TimeSeriesStore>,
    ) -> Self {
        Self {
            credentials: Arc::new(config.auth.clone()),
            config,
            units: Arc::new(UnitTable::standard()),
            metadata,
            store,
            metadata_queue: None,
        }
    }

    pub fn with_metadata_queue(mut self, queue: MetadataQueue) -> Self {
        self.metadata_queue = Some(queue);
        self
    }

    /// Seconds to add to timestamps when a query asks for local time.
    pub fn tz_offset(&self) -> i64 {
        self.config
            .tz_offset_seconds
            .unwrap_or_else(|| i64::from(chrono::Local::now().offset().local_minus_utc()))
    }
}

impl FromRef<AppState> for Arc<BasicCredentials> {
    fn from_ref(state: &AppState) -> Arc<BasicCredentials> {
        state.credentials.clone()
    }
}
