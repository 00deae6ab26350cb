//! Bounded concurrent fan-out: fetch slices, compute bundles per property.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portico_core::{DateWindow, PropertyId};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::warn;

use crate::{calculator, MetricBundle, MetricsConfig, MetricsError, PropertyResult, PropertySlice};

/// Where unified rows come from. The store implements this against
/// Postgres; tests implement it in memory.
#[async_trait]
pub trait SliceSource: Send + Sync {
    async fn fetch_slice(
        &self,
        property_id: &PropertyId,
        window: DateWindow,
    ) -> Result<PropertySlice, MetricsError>;
}

#[derive(Debug, Clone)]
pub struct GatherConfig {
    /// Properties fetched concurrently.
    pub max_concurrency: usize,
    /// Budget for a single property's slice fetch.
    pub per_source_timeout: Duration,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            per_source_timeout: Duration::from_secs(10),
        }
    }
}

impl GatherConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: std::env::var("PORTICO_GATHER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrency),
            per_source_timeout: std::env::var("PORTICO_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.per_source_timeout),
        }
    }
}

/// Cooperative cancellation shared across a gather run. Cancelling stops
/// new fetches and discards results for fetches already in flight; it does
/// not interrupt the fetch itself.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fetch and compute bundles for every requested property. Results come
/// back in request order; per-property failures are carried as `Err`
/// entries for the aggregation layer to skip or surface.
pub async fn gather_bundles(
    source: Arc<dyn SliceSource>,
    property_ids: &[PropertyId],
    window: DateWindow,
    metrics_cfg: MetricsConfig,
    gather_cfg: &GatherConfig,
    cancel: CancelHandle,
) -> Vec<PropertyResult> {
    let semaphore = Arc::new(Semaphore::new(gather_cfg.max_concurrency.max(1)));
    let per_source_timeout = gather_cfg.per_source_timeout;

    let mut handles: Vec<(PropertyId, JoinHandle<Result<MetricBundle, MetricsError>>)> =
        Vec::with_capacity(property_ids.len());
    for property_id in property_ids {
        let id = property_id.clone();
        let source = Arc::clone(&source);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let cfg = metrics_cfg.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| MetricsError::FetchFailed {
                    message: "gather pool closed".to_string(),
                })?;
            if cancel.is_cancelled() {
                return Err(MetricsError::Cancelled);
            }
            let slice = match timeout(per_source_timeout, source.fetch_slice(&id, window)).await {
                Err(_) => {
                    return Err(MetricsError::FetchTimeout {
                        waited_ms: per_source_timeout.as_millis() as u64,
                    })
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(slice)) => slice,
            };
            if cancel.is_cancelled() {
                return Err(MetricsError::Cancelled);
            }
            calculator::compute_bundle(&slice, window, &cfg)
        });
        handles.push((property_id.clone(), handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (property_id, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(err) => {
                warn!(property = %property_id, %err, "gather task failed");
                Err(MetricsError::FetchFailed {
                    message: err.to_string(),
                })
            }
        };
        results.push((property_id, result));
    }
    results
}
