//! In-memory service worker platform.
//!
//! Stands in for the browser: owns registrations, worker state and cache
//! storage, and emits the lifecycle events the observer listens to.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::event::{ExtendableEvent, InstallHandler};
use crate::{
    CacheStore, RegistrationEvent, RegistrationLifecycle, ServiceWorkerContainer,
    ServiceWorkerError, ServiceWorkerHandle, ServiceWorkerId, ServiceWorkerState,
};

// ==================== Workers ====================

/// Platform side of a worker: the handle plus the state writer.
#[derive(Debug)]
struct WorkerSlot {
    handle: ServiceWorkerHandle,
    state: watch::Sender<ServiceWorkerState>,
}

impl WorkerSlot {
    fn installing(script_url: Url) -> Self {
        let (state, rx) = watch::channel(ServiceWorkerState::Installing);
        Self {
            handle: ServiceWorkerHandle::new(ServiceWorkerId::new(), script_url, rx),
            state,
        }
    }

    fn id(&self) -> ServiceWorkerId {
        self.handle.id()
    }
}

#[derive(Debug, Default)]
struct Slots {
    installing: Option<WorkerSlot>,
    waiting: Option<WorkerSlot>,
    active: Option<WorkerSlot>,
    subscribers: Vec<mpsc::UnboundedSender<RegistrationEvent>>,
}

impl Slots {
    fn broadcast(&mut self, event: RegistrationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn find(&self, id: ServiceWorkerId) -> Option<&WorkerSlot> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|slot| slot.id() == id)
    }

    fn take(&mut self, id: ServiceWorkerId) -> Option<WorkerSlot> {
        [&mut self.installing, &mut self.waiting, &mut self.active]
            .into_iter()
            .find(|slot| matches!(slot, Some(s) if s.id() == id))
            .and_then(Option::take)
    }

    /// Publish the new state, then move the worker into the slot that state
    /// belongs to. A displaced occupant becomes redundant.
    fn apply(&mut self, slot: WorkerSlot, next: ServiceWorkerState) {
        slot.state.send_replace(next);
        debug!(worker = %slot.id(), state = %next, "Worker state changed");
        self.broadcast(RegistrationEvent::StateChange {
            worker_id: slot.id(),
            state: next,
        });

        let target = match next {
            ServiceWorkerState::Parsed | ServiceWorkerState::Installing => &mut self.installing,
            ServiceWorkerState::Installed => &mut self.waiting,
            ServiceWorkerState::Activating | ServiceWorkerState::Activated => &mut self.active,
            ServiceWorkerState::Redundant => return,
        };

        if let Some(previous) = target.replace(slot) {
            self.apply(previous, ServiceWorkerState::Redundant);
        }
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct MemoryRegistration {
    scope: Url,
    slots: RwLock<Slots>,
}

impl MemoryRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            slots: RwLock::new(Slots::default()),
        }
    }

    /// Worker currently installing.
    pub async fn installing(&self) -> Option<ServiceWorkerHandle> {
        self.slots
            .read()
            .await
            .installing
            .as_ref()
            .map(|slot| slot.handle.clone())
    }

    /// Active worker.
    pub async fn active(&self) -> Option<ServiceWorkerHandle> {
        self.slots
            .read()
            .await
            .active
            .as_ref()
            .map(|slot| slot.handle.clone())
    }

    /// Start installing a new worker and fire `updatefound`.
    ///
    /// A worker that was still installing is made redundant.
    pub async fn begin_install(&self, script_url: Url) -> ServiceWorkerHandle {
        let slot = WorkerSlot::installing(script_url);
        let handle = slot.handle.clone();

        let mut slots = self.slots.write().await;
        if let Some(previous) = slots.installing.replace(slot) {
            slots.apply(previous, ServiceWorkerState::Redundant);
        }
        info!(scope = %self.scope, worker = %handle.id(), "Update found");
        slots.broadcast(RegistrationEvent::UpdateFound {
            worker: handle.clone(),
        });

        handle
    }

    /// Move a worker to `next` and fire `statechange`.
    pub async fn set_worker_state(
        &self,
        id: ServiceWorkerId,
        next: ServiceWorkerState,
    ) -> Result<(), ServiceWorkerError> {
        let mut slots = self.slots.write().await;

        let current = slots
            .find(id)
            .map(|slot| slot.handle.state())
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?;

        if !current.can_transition_to(next) {
            return Err(ServiceWorkerError::StateError(format!(
                "{id} cannot go from {current} to {next}"
            )));
        }

        if let Some(slot) = slots.take(id) {
            slots.apply(slot, next);
        }
        Ok(())
    }

    /// Run the full install step: fire `updatefound`, dispatch `install` to
    /// `handler`, wait for its extensions, then move the worker to
    /// `installed` or `redundant`.
    pub async fn install_with(
        &self,
        script_url: Url,
        handler: &dyn InstallHandler,
    ) -> Result<ServiceWorkerHandle, ServiceWorkerError> {
        let worker = self.begin_install(script_url).await;

        let mut event = ExtendableEvent::install();
        handler.on_install(&mut event);

        match event.settle().await {
            Ok(()) => {
                self.set_worker_state(worker.id(), ServiceWorkerState::Installed)
                    .await?;
                Ok(worker)
            }
            Err(err) => {
                warn!(worker = %worker.id(), error = %err, "Install failed");
                self.set_worker_state(worker.id(), ServiceWorkerState::Redundant)
                    .await?;
                Err(ServiceWorkerError::InstallFailed(err.to_string()))
            }
        }
    }

    /// Activate the waiting worker (`skipWaiting`, or the last controlled
    /// page going away).
    pub async fn activate(&self) -> Result<ServiceWorkerHandle, ServiceWorkerError> {
        let waiting = self
            .waiting()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("no waiting worker".to_string()))?;

        self.set_worker_state(waiting.id(), ServiceWorkerState::Activating)
            .await?;
        self.set_worker_state(waiting.id(), ServiceWorkerState::Activated)
            .await?;
        Ok(waiting)
    }

    /// Make every worker redundant and close all subscriptions.
    pub async fn unregister(&self) {
        let mut slots = self.slots.write().await;
        let workers: Vec<WorkerSlot> = [
            slots.installing.take(),
            slots.waiting.take(),
            slots.active.take(),
        ]
        .into_iter()
        .flatten()
        .collect();

        for worker in workers {
            slots.apply(worker, ServiceWorkerState::Redundant);
        }
        slots.subscribers.clear();
    }
}

#[async_trait]
impl RegistrationLifecycle for MemoryRegistration {
    fn scope(&self) -> Url {
        self.scope.clone()
    }

    async fn waiting(&self) -> Option<ServiceWorkerHandle> {
        self.slots
            .read()
            .await
            .waiting
            .as_ref()
            .map(|slot| slot.handle.clone())
    }

    async fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistrationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.slots.write().await.subscribers.push(tx);
        rx
    }
}

// ==================== Container ====================

/// Service worker container (navigator.serviceWorker) for a single page.
#[derive(Debug, Default)]
pub struct MemoryContainer {
    registration: RwLock<Option<Arc<MemoryRegistration>>>,
    controller: RwLock<Option<ServiceWorkerHandle>>,
}

impl MemoryContainer {
    /// Create a new container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or return the existing registration for) `scope`.
    pub async fn register(&self, scope: &str) -> Result<Arc<MemoryRegistration>, ServiceWorkerError> {
        let scope =
            Url::parse(scope).map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        let mut current = self.registration.write().await;
        if let Some(existing) = current.as_ref().filter(|r| r.scope == scope) {
            return Ok(existing.clone());
        }

        let registration = Arc::new(MemoryRegistration::new(scope));
        *current = Some(registration.clone());
        Ok(registration)
    }

    /// Set (or clear) the worker controlling the page.
    pub async fn set_controller(&self, worker: Option<ServiceWorkerHandle>) {
        *self.controller.write().await = worker;
    }

    /// Unregister. Returns whether a registration existed.
    pub async fn unregister(&self) -> bool {
        let removed = self.registration.write().await.take();
        match removed {
            Some(registration) => {
                registration.unregister().await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ServiceWorkerContainer for MemoryContainer {
    async fn controller(&self) -> Option<ServiceWorkerHandle> {
        self.controller.read().await.clone()
    }

    async fn get_registration(&self) -> Option<Arc<dyn RegistrationLifecycle>> {
        self.registration
            .read()
            .await
            .clone()
            .map(|r| r as Arc<dyn RegistrationLifecycle>)
    }
}

// ==================== Cache ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// A `GET` response cached now.
    pub fn new(url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            status,
            headers: HashMap::new(),
            body: body.into(),
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// A cache instance.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Add entry.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (caches global).
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
    }

    /// Store an entry in `cache`, creating the cache if needed.
    pub async fn put(&self, cache: &str, entry: CacheEntry) {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_insert_with(|| Cache::new(cache))
            .put(entry);
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Number of cache stores.
    pub async fn len(&self) -> usize {
        self.caches.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.caches.read().await.is_empty()
    }

    /// Match across all caches.
    pub async fn match_request(&self, url: &str) -> Option<CacheEntry> {
        self.caches
            .read()
            .await
            .values()
            .find_map(|cache| cache.match_request(url).cloned())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}
