//! # swkit Service Workers
//!
//! Platform model for the swkit lifecycle observer and cache reset handler.
//!
//! ## Features
//!
//! - **Lifecycle states**: `installing`, `installed`, `activated`, `redundant`, ...
//! - **Capabilities**: narrow traits for the container, the registration,
//!   cache storage and the console, so logic can run against fakes
//! - **Extendable events**: `event.waitUntil()` completion latch
//! - **In-memory platform**: registration, workers and cache storage
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (navigator.serviceWorker)
//!     │
//!     ├── controller (ServiceWorkerHandle)
//!     └── RegistrationLifecycle
//!             ├── waiting (ServiceWorkerHandle)
//!             └── subscribe() ── UpdateFound / StateChange ──→ observer
//!
//! CacheStore (caches)
//!     ├── keys()
//!     └── delete(name)
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use url::Url;

pub mod console;
pub mod event;
pub mod memory;

pub use console::{Console, RecordingConsole, TracingConsole};
pub use event::{ExtendableEvent, ExtendableEventKind, InstallHandler};
pub use memory::{Cache, CacheEntry, MemoryCacheStorage, MemoryContainer, MemoryRegistration};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Convert to JavaScript string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        }
    }

    /// Redundant is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceWorkerState::Redundant)
    }

    /// Whether the platform may move a worker from `self` to `next`.
    pub fn can_transition_to(&self, next: ServiceWorkerState) -> bool {
        use ServiceWorkerState::*;
        match (self, next) {
            (Redundant, _) => false,
            (_, Redundant) => true,
            (Parsed, Installing)
            | (Installing, Installed)
            | (Installed, Activating)
            | (Activating, Activated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Service Worker Handle ====================

/// Read-only view of a worker owned by the platform.
///
/// Clones share the same underlying state; `state()` always reports the
/// platform's current value.
#[derive(Debug, Clone)]
pub struct ServiceWorkerHandle {
    id: ServiceWorkerId,
    script_url: Url,
    state: watch::Receiver<ServiceWorkerState>,
}

impl ServiceWorkerHandle {
    /// Create a handle over a platform-owned state channel.
    pub fn new(
        id: ServiceWorkerId,
        script_url: Url,
        state: watch::Receiver<ServiceWorkerState>,
    ) -> Self {
        Self {
            id,
            script_url,
            state,
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    /// Current state.
    pub fn state(&self) -> ServiceWorkerState {
        *self.state.borrow()
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Activated
    }
}

// ==================== Registration Events ====================

/// Lifecycle notifications delivered to registration subscribers.
#[derive(Debug, Clone)]
pub enum RegistrationEvent {
    /// A new worker started installing (`updatefound`).
    UpdateFound { worker: ServiceWorkerHandle },
    /// A worker changed state (`statechange`).
    StateChange {
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
    },
}

// ==================== Capabilities ====================

/// `navigator.serviceWorker` as seen from a page.
#[async_trait]
pub trait ServiceWorkerContainer: Send + Sync {
    /// The worker currently controlling the page, if any.
    async fn controller(&self) -> Option<ServiceWorkerHandle>;

    /// The registration covering the page, if any.
    async fn get_registration(&self) -> Option<Arc<dyn RegistrationLifecycle>>;
}

/// Observe a registration's lifecycle.
#[async_trait]
pub trait RegistrationLifecycle: Send + Sync {
    fn scope(&self) -> Url;

    /// Worker installed and waiting to activate.
    async fn waiting(&self) -> Option<ServiceWorkerHandle>;

    /// Subscribe to lifecycle events. Events are delivered in platform order
    /// until the registration goes away.
    async fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistrationEvent>;
}

/// Enumerate and delete named caches.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Names of all cache stores.
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError>;

    /// Delete a named cache store. `Ok(false)` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError>;
}
