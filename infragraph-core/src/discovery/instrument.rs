//! Timing decorator for resource fetchers.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::ResourceFetcher;
use crate::error::FetchError;
use crate::events::{EventBus, GraphEvent};

/// Wraps a fetcher, timing every list call and publishing
/// [`GraphEvent::FetchCompleted`] on the bus.
pub struct InstrumentedFetcher {
    provider: String,
    inner: Arc<dyn ResourceFetcher>,
    bus: EventBus,
}

impl InstrumentedFetcher {
    pub fn new(provider: impl Into<String>, inner: Arc<dyn ResourceFetcher>, bus: EventBus) -> Self {
        Self {
            provider: provider.into(),
            inner,
            bus,
        }
    }
}

#[async_trait]
impl ResourceFetcher for InstrumentedFetcher {
    fn service(&self) -> &str {
        self.inner.service()
    }

    async fn list(&self, resource_type: &str, region: &str) -> Result<Vec<Value>, FetchError> {
        let start = Instant::now();
        let result = self.inner.list(resource_type, region).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let items = result.as_ref().map(Vec::len).unwrap_or(0);
        match &result {
            Ok(_) => debug!(
                provider = %self.provider,
                service = self.inner.service(),
                resource_type,
                region,
                items,
                duration_ms,
                "Fetch completed"
            ),
            Err(e) => warn!(
                provider = %self.provider,
                service = self.inner.service(),
                resource_type,
                region,
                duration_ms,
                error = %e,
                "Fetch failed"
            ),
        }

        self.bus.publish(GraphEvent::FetchCompleted {
            provider: self.provider.clone(),
            service: self.inner.service().to_string(),
            resource_type: resource_type.to_string(),
            region: region.to_string(),
            duration_ms,
            success: result.is_ok(),
            items,
        });
        result
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}
