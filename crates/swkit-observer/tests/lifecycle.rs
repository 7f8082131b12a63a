//! End-to-end lifecycle tests against the in-memory platform

use std::sync::Arc;
use std::time::Duration;
use swkit_common::ObserverConfig;
use swkit_observer::{LifecycleMessage, LifecycleObserver};
use swkit_reset::CacheResetHandler;
use swkit_sw::{
    ExtendableEvent, InstallHandler, MemoryCacheStorage, MemoryContainer, RecordingConsole,
    ServiceWorkerError, ServiceWorkerState,
};
use url::Url;

use LifecycleMessage::*;

const SCOPE: &str = "https://example.com/";

fn script() -> Url {
    Url::parse("https://example.com/sw.js").unwrap()
}

fn observer(container: &Arc<MemoryContainer>, console: &RecordingConsole) -> LifecycleObserver {
    LifecycleObserver::new(
        container.clone(),
        Arc::new(console.clone()),
        ObserverConfig::default(),
    )
}

struct FailingInstall;

impl InstallHandler for FailingInstall {
    fn on_install(&self, event: &mut ExtendableEvent) {
        event.wait_until(async { Err(ServiceWorkerError::CacheError("disk full".to_string())) });
    }
}

#[tokio::test(start_paused = true)]
async fn fresh_install_activates_and_clears_caches() {
    let container = Arc::new(MemoryContainer::new());
    let registration = container.register(SCOPE).await.unwrap();
    let storage = Arc::new(MemoryCacheStorage::new());
    for name in ["v1", "v2", "v3"] {
        storage.open(name).await;
    }

    let console = RecordingConsole::new();
    let mut handle = observer(&container, &console).spawn();
    handle.ready().await;

    let reset = CacheResetHandler::new(storage.clone());
    let worker = registration.install_with(script(), &reset).await.unwrap();
    registration.activate().await.unwrap();
    assert!(worker.is_active());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let report = handle.shutdown().await.unwrap();

    assert_eq!(
        report.messages,
        vec![NotControlled, UpdateFound, Installed, Activated]
    );
    assert_eq!(console.lines().len(), 4);
    assert!(storage.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn update_behind_controlled_page_waits() {
    let container = Arc::new(MemoryContainer::new());
    let registration = container.register(SCOPE).await.unwrap();
    let reset = CacheResetHandler::new(Arc::new(MemoryCacheStorage::new()));

    let old = registration.install_with(script(), &reset).await.unwrap();
    registration.activate().await.unwrap();
    container.set_controller(Some(old.clone())).await;

    let console = RecordingConsole::new();
    let mut handle = observer(&container, &console).spawn();
    handle.ready().await;

    let fresh = registration.install_with(script(), &reset).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let report = handle.shutdown().await.unwrap();

    assert_eq!(fresh.state(), ServiceWorkerState::Installed);
    assert!(old.is_active());
    assert_eq!(
        report.messages,
        vec![Controlled, UpdateFound, Installed, Waiting]
    );

    // A reload sees the waiting worker straight away.
    let reloaded = RecordingConsole::new();
    let mut handle = observer(&container, &reloaded).spawn();
    handle.ready().await;
    let report = handle.shutdown().await.unwrap();

    assert_eq!(report.messages, vec![Controlled, Waiting]);
    assert_eq!(reloaded.count(Waiting.as_str()), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_install_is_reported() {
    let container = Arc::new(MemoryContainer::new());
    let registration = container.register(SCOPE).await.unwrap();

    let console = RecordingConsole::new();
    let mut handle = observer(&container, &console).spawn();
    handle.ready().await;

    let result = registration.install_with(script(), &FailingInstall).await;
    assert!(matches!(result, Err(ServiceWorkerError::InstallFailed(_))));

    // Unregistering closes the event stream; nothing is pending, so the
    // observer finishes on its own.
    container.unregister().await;
    let report = handle.join().await.unwrap();

    assert_eq!(report.messages, vec![NotControlled, UpdateFound, InstallFailed]);
    assert_eq!(console.count(Waiting.as_str()), 0);
}

#[tokio::test(start_paused = true)]
async fn configurable_grace_period() {
    let container = Arc::new(MemoryContainer::new());
    let registration = container.register(SCOPE).await.unwrap();
    let reset = CacheResetHandler::new(Arc::new(MemoryCacheStorage::new()));

    let console = RecordingConsole::new();
    let mut handle = LifecycleObserver::new(
        container.clone(),
        Arc::new(console.clone()),
        ObserverConfig::with_grace_period(Duration::from_millis(50)),
    )
    .spawn();
    handle.ready().await;

    let worker = registration.install_with(script(), &reset).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Too late for the 50ms window.
    registration.activate().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = handle.shutdown().await.unwrap();
    assert!(worker.is_active());
    assert_eq!(report.messages.last(), Some(&Waiting));
}

#[tokio::test]
async fn page_without_registration() {
    let container = Arc::new(MemoryContainer::new());
    let console = RecordingConsole::new();

    let report = observer(&container, &console).run().await;

    assert!(!report.registration_found);
    assert_eq!(console.lines(), vec![NotControlled.as_str()]);
}
