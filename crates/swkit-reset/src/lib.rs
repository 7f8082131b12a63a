//! # swkit Cache Reset
//!
//! Service worker `install` handler that deletes every cache store of the
//! origin before the new worker finishes installing.
//!
//! ```text
//! install ──→ wait_until(reset)
//!                 │
//!                 ├── keys()
//!                 └── JoinSet: delete(k1) │ delete(k2) │ ... │ delete(kN)
//!                         └── all settled ──→ Ok(report) / first error
//! ```

use std::sync::Arc;
use swkit_sw::{CacheStore, ExtendableEvent, InstallHandler, ServiceWorkerError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of a successful reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// Stores that were deleted.
    pub deleted: Vec<String>,
    /// Stores that were listed but already gone at delete time.
    pub missing: Vec<String>,
}

impl ResetReport {
    /// Number of delete calls issued.
    pub fn deletes_issued(&self) -> usize {
        self.deleted.len() + self.missing.len()
    }
}

/// Clears all cache storage on install. No filtering: every store goes.
#[derive(Clone)]
pub struct CacheResetHandler {
    store: Arc<dyn CacheStore>,
}

impl CacheResetHandler {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Delete every cache store now.
    pub async fn reset(&self) -> Result<ResetReport, ServiceWorkerError> {
        reset_all(self.store.clone()).await
    }
}

impl InstallHandler for CacheResetHandler {
    fn on_install(&self, event: &mut ExtendableEvent) {
        let store = self.store.clone();
        event.wait_until(async move {
            let report = reset_all(store).await?;
            info!(
                deleted = report.deleted.len(),
                missing = report.missing.len(),
                "Cleared cache storage"
            );
            Ok(())
        });
    }
}

/// Enumerate every cache store and delete them all concurrently.
///
/// Waits for every deletion to settle; reports the first failure observed.
pub async fn reset_all(store: Arc<dyn CacheStore>) -> Result<ResetReport, ServiceWorkerError> {
    let names = store.keys().await?;
    debug!(stores = names.len(), "Resetting cache storage");

    let mut deletions = JoinSet::new();
    for name in names {
        let store = store.clone();
        deletions.spawn(async move {
            let existed = store.delete(&name).await?;
            Ok::<_, ServiceWorkerError>((name, existed))
        });
    }

    let mut report = ResetReport::default();
    let mut first_error = None;

    while let Some(joined) = deletions.join_next().await {
        match joined {
            Ok(Ok((name, true))) => report.deleted.push(name),
            Ok(Ok((name, false))) => report.missing.push(name),
            Ok(Err(err)) => {
                warn!(error = %err, "Cache delete failed");
                first_error.get_or_insert(err);
            }
            Err(join_err) => {
                warn!(error = %join_err, "Cache delete task did not complete");
                first_error.get_or_insert(ServiceWorkerError::CacheError(format!(
                    "delete task failed: {join_err}"
                )));
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            report.deleted.sort();
            report.missing.sort();
            Ok(report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use swkit_sw::{CacheEntry, MemoryCacheStorage, MemoryRegistration, ServiceWorkerState};
    use url::Url;

    /// Cache store that records deletes and fails the configured names.
    #[derive(Default)]
    struct ScriptedStore {
        names: Vec<String>,
        failing: Vec<String>,
        deleted: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn new(names: &[&str]) -> Self {
            Self {
                names: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }

        fn failing(mut self, name: &str) -> Self {
            self.failing.push(name.to_string());
            self
        }

        fn delete_calls(&self) -> Vec<String> {
            let mut calls = self.deleted.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl CacheStore for ScriptedStore {
        async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
            Ok(self.names.clone())
        }

        async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
            // Let the other deletions interleave.
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.deleted.lock().unwrap().push(name.to_string());
            if self.failing.iter().any(|f| f == name) {
                Err(ServiceWorkerError::CacheError(format!("cannot delete {name}")))
            } else {
                Ok(true)
            }
        }
    }

    struct BrokenKeys;

    #[async_trait]
    impl CacheStore for BrokenKeys {
        async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
            Err(ServiceWorkerError::CacheError("storage unavailable".to_string()))
        }

        async fn delete(&self, _name: &str) -> Result<bool, ServiceWorkerError> {
            unreachable!("keys failed")
        }
    }

    #[tokio::test]
    async fn test_deletes_every_store() {
        let store = Arc::new(ScriptedStore::new(&["v1", "v2", "v3"]));
        let handler = CacheResetHandler::new(store.clone());

        let report = handler.reset().await.unwrap();
        assert_eq!(report.deleted, vec!["v1", "v2", "v3"]);
        assert_eq!(report.deletes_issued(), 3);
        assert_eq!(store.delete_calls(), vec!["v1", "v2", "v3"]);
    }

    #[tokio::test]
    async fn test_one_failure_fails_reset_after_all_settle() {
        let store = Arc::new(ScriptedStore::new(&["v1", "v2", "v3"]).failing("v2"));
        let handler = CacheResetHandler::new(store.clone());

        let err = handler.reset().await.unwrap_err();
        assert_eq!(err, ServiceWorkerError::CacheError("cannot delete v2".into()));
        // Every delete was still issued and awaited.
        assert_eq!(store.delete_calls(), vec!["v1", "v2", "v3"]);
    }

    #[tokio::test]
    async fn test_no_stores_issues_no_deletes() {
        let store = Arc::new(ScriptedStore::new(&[]));
        let handler = CacheResetHandler::new(store.clone());

        let report = handler.reset().await.unwrap();
        assert_eq!(report, ResetReport::default());
        assert!(store.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn test_enumeration_failure_propagates() {
        let handler = CacheResetHandler::new(Arc::new(BrokenKeys));
        assert!(matches!(
            handler.reset().await,
            Err(ServiceWorkerError::CacheError(_))
        ));
    }

    #[tokio::test]
    async fn test_install_latch_succeeds() {
        let store = Arc::new(ScriptedStore::new(&["v1", "v2", "v3"]));
        let handler = CacheResetHandler::new(store.clone());

        let mut event = ExtendableEvent::install();
        handler.on_install(&mut event);
        assert_eq!(event.pending(), 1);
        // Nothing happens until the platform settles the event.
        assert!(store.delete_calls().is_empty());

        assert!(event.settle().await.is_ok());
        assert_eq!(store.delete_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_install_latch_fails_on_delete_failure() {
        let store = Arc::new(ScriptedStore::new(&["v1", "v2", "v3"]).failing("v3"));
        let handler = CacheResetHandler::new(store);

        let mut event = ExtendableEvent::install();
        handler.on_install(&mut event);
        assert!(event.settle().await.is_err());
    }

    #[tokio::test]
    async fn test_install_clears_memory_storage() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("v1").await;
        storage
            .put("v2", CacheEntry::new("https://example.com/index.html", 200, "<html>"))
            .await;
        let handler = CacheResetHandler::new(storage.clone());

        let registration = MemoryRegistration::new(Url::parse("https://example.com/").unwrap());
        let worker = registration
            .install_with(Url::parse("https://example.com/sw.js").unwrap(), &handler)
            .await
            .unwrap();

        assert_eq!(worker.state(), ServiceWorkerState::Installed);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_reset_makes_worker_redundant() {
        let store = Arc::new(ScriptedStore::new(&["v1"]).failing("v1"));
        let handler = CacheResetHandler::new(store);

        let registration = MemoryRegistration::new(Url::parse("https://example.com/").unwrap());
        let result = registration
            .install_with(Url::parse("https://example.com/sw.js").unwrap(), &handler)
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::InstallFailed(_))));
    }
}
