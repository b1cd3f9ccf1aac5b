//! The `ResourceManager` itself: periodic refresh, single-flight guard, weighted
//! random selection (§4.4).

use crate::endpoint::{Endpoint, EndpointKind};
use async_trait::async_trait;
use kusto_core::error::{KustoError, Operation, Result};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Issues the two management commands the manager needs: the resource listing and
/// the impersonation identity token. The concrete implementation (building the
/// command text, running it through the query path, and pulling rows back out of
/// the resulting dataset) lives with whoever bundles a full client together, which
/// keeps this crate decoupled from `kusto-data`/`kusto-core`'s transport wiring.
#[async_trait]
pub trait ManagementExecutor: Send + Sync {
    /// Runs `.show <kind> resources` or equivalent and returns its two-column
    /// `(ResourceTypeName, StorageRoot)` rows verbatim.
    async fn resources(&self, cancel: CancellationToken) -> Result<Vec<(String, String)>>;

    /// Runs `.get kusto identity token` or equivalent and returns the token string.
    async fn identity_token(&self, cancel: CancellationToken) -> Result<String>;
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceManagerOptions {
    pub refresh_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for ResourceManagerOptions {
    fn default() -> Self {
        ResourceManagerOptions { refresh_interval: Duration::from_secs(3600), retry_interval: Duration::from_secs(60) }
    }
}

struct Snapshot {
    containers: Vec<Arc<Endpoint>>,
    queues: Vec<Arc<Endpoint>>,
    tables: Vec<Arc<Endpoint>>,
    fetched_at: Instant,
}

impl Snapshot {
    fn list(&self, kind: EndpointKind) -> &[Arc<Endpoint>] {
        match kind {
            EndpointKind::BlobContainer => &self.containers,
            EndpointKind::Queue => &self.queues,
            EndpointKind::StatusTable => &self.tables,
        }
    }
}

struct TokenCache {
    token: String,
    fetched_at: Instant,
}

pub struct ResourceManager {
    executor: Arc<dyn ManagementExecutor>,
    opts: ResourceManagerOptions,
    snapshot: RwLock<Option<Snapshot>>,
    snapshot_refreshing: tokio::sync::Mutex<()>,
    snapshot_last_attempt_failed: AtomicBool,
    token_cache: RwLock<Option<TokenCache>>,
    token_refreshing: tokio::sync::Mutex<()>,
    token_last_attempt_failed: AtomicBool,
}

/// Classifies a `ResourceTypeName` into one of the three lists, by the substrings
/// the real service's resource names are known to carry.
fn classify(resource_type_name: &str) -> Option<EndpointKind> {
    let lower = resource_type_name.to_ascii_lowercase();
    if lower.contains("queue") {
        Some(EndpointKind::Queue)
    } else if lower.contains("statustable") || lower.contains("ingestionsstatustable") {
        Some(EndpointKind::StatusTable)
    } else if lower.contains("storage") {
        Some(EndpointKind::BlobContainer)
    } else {
        None
    }
}

/// Splits a `StorageRoot` of the form `https://host/container?sas` into
/// `(url, sas_token)`.
fn split_storage_root(storage_root: &str) -> (String, String) {
    match storage_root.split_once('?') {
        Some((url, sas)) => (url.to_string(), sas.to_string()),
        None => (storage_root.to_string(), String::new()),
    }
}

impl ResourceManager {
    pub fn new(executor: Arc<dyn ManagementExecutor>, opts: ResourceManagerOptions) -> Self {
        ResourceManager {
            executor,
            opts,
            snapshot: RwLock::new(None),
            snapshot_refreshing: tokio::sync::Mutex::new(()),
            snapshot_last_attempt_failed: AtomicBool::new(false),
            token_cache: RwLock::new(None),
            token_refreshing: tokio::sync::Mutex::new(()),
            token_last_attempt_failed: AtomicBool::new(false),
        }
    }

    fn interval_for(&self, last_attempt_failed: bool) -> Duration {
        if last_attempt_failed {
            self.opts.retry_interval
        } else {
            self.opts.refresh_interval
        }
    }

    async fn ensure_fresh(&self, cancel: &CancellationToken) -> Result<()> {
        let stale = {
            let guard = self.snapshot.read().await;
            match &*guard {
                None => true,
                Some(s) => {
                    s.fetched_at.elapsed() >= self.interval_for(self.snapshot_last_attempt_failed.load(Ordering::Relaxed))
                }
            }
        };
        if !stale {
            return Ok(());
        }

        let is_first_use = self.snapshot.read().await.is_none();
        if is_first_use {
            // First use: block until a refresh completes, there is nothing to fall
            // back to (§4.4 "Concurrency").
            let _guard = self.snapshot_refreshing.lock().await;
            if self.snapshot.read().await.is_none() {
                self.refresh(cancel).await?;
            }
            Ok(())
        } else {
            match self.snapshot_refreshing.try_lock() {
                Ok(_guard) => {
                    // Background refresh; a stale snapshot is still usable, so a
                    // failure here is logged, not propagated.
                    if let Err(e) = self.refresh(cancel).await {
                        tracing::warn!(error = %e, "resource manager refresh failed, keeping stale snapshot");
                    }
                    Ok(())
                }
                Err(_) => Ok(()), // another task is already refreshing; use the stale snapshot.
            }
        }
    }

    async fn refresh(&self, cancel: &CancellationToken) -> Result<()> {
        let rows = self.executor.resources(cancel.clone()).await;
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                self.snapshot_last_attempt_failed.store(true, Ordering::Relaxed);
                return Err(e);
            }
        };

        let mut containers = Vec::new();
        let mut queues = Vec::new();
        let mut tables = Vec::new();
        for (resource_type_name, storage_root) in rows {
            let Some(kind) = classify(&resource_type_name) else { continue };
            let (url, sas) = split_storage_root(&storage_root);
            let endpoint = Arc::new(Endpoint::new(kind, url, sas));
            match kind {
                EndpointKind::BlobContainer => containers.push(endpoint),
                EndpointKind::Queue => queues.push(endpoint),
                EndpointKind::StatusTable => tables.push(endpoint),
            }
        }

        *self.snapshot.write().await = Some(Snapshot { containers, queues, tables, fetched_at: Instant::now() });
        self.snapshot_last_attempt_failed.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Returns an endpoint of the given kind, chosen by weighted random among the
    /// top-ranked subset of the current snapshot (§4.4 "Ranking").
    pub async fn next(&self, kind: EndpointKind, cancel: CancellationToken) -> Result<Arc<Endpoint>> {
        self.ensure_fresh(&cancel).await?;

        let guard = self.snapshot.read().await;
        let snapshot = guard
            .as_ref()
            .ok_or_else(|| KustoError::internal(Operation::ResourceRefresh, "no resource snapshot available"))?;
        let list = snapshot.list(kind);
        if list.is_empty() {
            return Err(KustoError::internal(
                Operation::ResourceRefresh,
                format!("service advertised no {kind:?} endpoints"),
            ));
        }

        let max_score = list.iter().map(|e| e.score()).max().unwrap_or(0);
        let top: Vec<&Arc<Endpoint>> = list.iter().filter(|e| e.score() == max_score).collect();
        let mut rng = rand::thread_rng();
        // Ties within the top-ranked group are uniform (§3 "ranking is stable under
        // ties"): every candidate here carries the identical score.
        let chosen = top.choose(&mut rng).expect("top is non-empty because list is non-empty");
        Ok(Arc::clone(chosen))
    }

    /// The cached impersonation identity token (§4.4 "second management command"),
    /// refreshed under the same single-flight + TTL policy as the resource lists.
    pub async fn identity_token(&self, cancel: CancellationToken) -> Result<String> {
        let stale = {
            let guard = self.token_cache.read().await;
            match &*guard {
                None => true,
                Some(t) => {
                    t.fetched_at.elapsed() >= self.interval_for(self.token_last_attempt_failed.load(Ordering::Relaxed))
                }
            }
        };

        if stale {
            let is_first_use = self.token_cache.read().await.is_none();
            if is_first_use {
                let _guard = self.token_refreshing.lock().await;
                if self.token_cache.read().await.is_none() {
                    self.refresh_token(&cancel).await?;
                }
            } else if let Ok(_guard) = self.token_refreshing.try_lock() {
                if let Err(e) = self.refresh_token(&cancel).await {
                    tracing::warn!(error = %e, "identity token refresh failed, keeping stale token");
                }
            }
        }

        let guard = self.token_cache.read().await;
        guard
            .as_ref()
            .map(|t| t.token.clone())
            .ok_or_else(|| KustoError::internal(Operation::ResourceRefresh, "no identity token available"))
    }

    async fn refresh_token(&self, cancel: &CancellationToken) -> Result<()> {
        match self.executor.identity_token(cancel.clone()).await {
            Ok(token) => {
                *self.token_cache.write().await = Some(TokenCache { token, fetched_at: Instant::now() });
                self.token_last_attempt_failed.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.token_last_attempt_failed.store(true, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedExecutor {
        rows: Vec<(String, String)>,
    }

    #[async_trait]
    impl ManagementExecutor for FixedExecutor {
        async fn resources(&self, _cancel: CancellationToken) -> Result<Vec<(String, String)>> {
            Ok(self.rows.clone())
        }

        async fn identity_token(&self, _cancel: CancellationToken) -> Result<String> {
            Ok("token-123".to_string())
        }
    }

    fn manager_with(rows: Vec<(&str, &str)>) -> ResourceManager {
        let rows = rows.into_iter().map(|(a, b)| (a.to_string(), b.to_string())).collect();
        ResourceManager::new(Arc::new(FixedExecutor { rows }), ResourceManagerOptions::default())
    }

    #[tokio::test]
    async fn next_always_returns_an_advertised_endpoint() {
        let mgr = manager_with(vec![
            ("TempStorage", "https://a.blob.core.windows.net/c1?sv=1"),
            ("TempStorage", "https://a.blob.core.windows.net/c2?sv=1"),
            ("SecuredReadyForAggregationQueue", "https://a.queue.core.windows.net/q1?sv=1"),
            ("IngestionsStatusTable", "https://a.table.core.windows.net/t1?sv=1"),
        ]);

        let endpoint = mgr.next(EndpointKind::BlobContainer, CancellationToken::new()).await.unwrap();
        assert!(endpoint.url.contains("blob.core.windows.net"));

        let queue = mgr.next(EndpointKind::Queue, CancellationToken::new()).await.unwrap();
        assert!(queue.url.ends_with("/q1"));

        let table = mgr.next(EndpointKind::StatusTable, CancellationToken::new()).await.unwrap();
        assert!(table.url.ends_with("/t1"));
    }

    #[tokio::test]
    async fn report_demotes_without_removing() {
        let mgr = manager_with(vec![
            ("TempStorage", "https://a/c1?sv=1"),
            ("TempStorage", "https://a/c2?sv=1"),
        ]);

        let first = mgr.next(EndpointKind::BlobContainer, CancellationToken::new()).await.unwrap();
        first.report(false);
        first.report(false);

        // The other container now strictly outranks it, so repeated `next()` calls
        // should settle on it deterministically.
        for _ in 0..10 {
            let picked = mgr.next(EndpointKind::BlobContainer, CancellationToken::new()).await.unwrap();
            assert_ne!(picked.url, first.url);
        }

        let snapshot_len = {
            let guard = mgr.snapshot.read().await;
            guard.as_ref().unwrap().containers.len()
        };
        assert_eq!(snapshot_len, 2, "demoted endpoint must still be present in the list");
    }
}
