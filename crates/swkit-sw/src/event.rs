//! Extendable lifecycle events (`install`, `activate`).
//!
//! Handlers extend the event's lifetime with `wait_until`; the platform calls
//! `settle` and does not move the worker on until every extension finished.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use tracing::{debug, warn};

use crate::ServiceWorkerError;

/// Which lifecycle step the event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendableEventKind {
    Install,
    Activate,
}

impl ExtendableEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtendableEventKind::Install => "install",
            ExtendableEventKind::Activate => "activate",
        }
    }
}

/// An event whose completion can be extended by handlers.
pub struct ExtendableEvent {
    kind: ExtendableEventKind,
    extensions: Vec<BoxFuture<'static, Result<(), ServiceWorkerError>>>,
}

impl ExtendableEvent {
    pub fn new(kind: ExtendableEventKind) -> Self {
        Self {
            kind,
            extensions: Vec::new(),
        }
    }

    /// Create an `install` event.
    pub fn install() -> Self {
        Self::new(ExtendableEventKind::Install)
    }

    pub fn kind(&self) -> ExtendableEventKind {
        self.kind
    }

    /// Extend the event until `work` completes. A failed extension fails the
    /// whole lifecycle step.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        self.extensions.push(work.boxed());
    }

    /// Number of extensions registered so far.
    pub fn pending(&self) -> usize {
        self.extensions.len()
    }

    /// Await every extension. Returns the first failure in registration order.
    pub async fn settle(self) -> Result<(), ServiceWorkerError> {
        let kind = self.kind.as_str();
        let count = self.extensions.len();
        debug!(kind, extensions = count, "Settling extendable event");

        let results = join_all(self.extensions).await;
        match results.into_iter().find_map(Result::err) {
            Some(err) => {
                warn!(kind, error = %err, "Extendable event failed");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.kind)
            .field("pending", &self.extensions.len())
            .finish()
    }
}

/// Service worker `install` listener (`self.addEventListener('install', ...)`).
pub trait InstallHandler: Send + Sync {
    fn on_install(&self, event: &mut ExtendableEvent);
}
