//! swkit smoke harness
//!
//! Scripts service worker lifecycles against the in-memory platform, with the
//! lifecycle observer watching and the cache reset handler installed, and
//! prints what happened in each scenario as JSON.
//!
//! Usage: `swkit-smoke [config.json]`

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swkit_common::{init_logging, ObserverConfig, OptionExt, ResultExt, SwKitConfig, SwKitError};
use swkit_observer::{LifecycleObserver, ObserverReport};
use swkit_reset::CacheResetHandler;
use swkit_sw::{
    CacheEntry, Console, ExtendableEvent, InstallHandler, MemoryCacheStorage, MemoryContainer,
    RecordingConsole, RegistrationLifecycle, ServiceWorkerError, TracingConsole,
};
use tracing::info;
use url::Url;

const SCOPE: &str = "https://app.example/";
const SCRIPT: &str = "https://app.example/sw.js";

/// Logs through tracing and keeps a copy for the summary.
struct TeeConsole {
    record: RecordingConsole,
}

impl Console for TeeConsole {
    fn log(&self, line: &str) {
        TracingConsole.log(line);
        self.record.log(line);
    }
}

/// Install handler whose work always fails.
struct BrokenInstall;

impl InstallHandler for BrokenInstall {
    fn on_install(&self, event: &mut ExtendableEvent) {
        event.wait_until(async {
            Err(ServiceWorkerError::CacheError(
                "simulated install failure".to_string(),
            ))
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    NoRegistration,
    FreshInstall,
    UpdateWaiting,
    FailedInstall,
}

impl Scenario {
    const ALL: [Scenario; 4] = [
        Scenario::NoRegistration,
        Scenario::FreshInstall,
        Scenario::UpdateWaiting,
        Scenario::FailedInstall,
    ];

    fn name(&self) -> &'static str {
        match self {
            Scenario::NoRegistration => "no_registration",
            Scenario::FreshInstall => "fresh_install",
            Scenario::UpdateWaiting => "update_waiting",
            Scenario::FailedInstall => "failed_install",
        }
    }
}

struct Harness {
    container: Arc<MemoryContainer>,
    storage: Arc<MemoryCacheStorage>,
    console: RecordingConsole,
    config: ObserverConfig,
}

impl Harness {
    async fn new(config: &ObserverConfig) -> Self {
        let storage = Arc::new(MemoryCacheStorage::new());
        for version in ["v1", "v2", "v3"] {
            storage
                .put(
                    version,
                    CacheEntry::new(&format!("{SCOPE}index.html"), 200, version),
                )
                .await;
        }

        Self {
            container: Arc::new(MemoryContainer::new()),
            storage,
            console: RecordingConsole::new(),
            config: config.clone(),
        }
    }

    fn observer(&self) -> LifecycleObserver {
        LifecycleObserver::new(
            self.container.clone(),
            Arc::new(TeeConsole {
                record: self.console.clone(),
            }),
            self.config.clone(),
        )
    }

    fn reset_handler(&self) -> CacheResetHandler {
        CacheResetHandler::new(self.storage.clone())
    }

    /// Long enough for any pending grace check to resolve.
    fn settle_time(&self) -> Duration {
        self.config.grace_period() + Duration::from_millis(200)
    }

    async fn run(&self, scenario: Scenario) -> swkit_common::Result<ObserverReport> {
        let script = Url::parse(SCRIPT).context("parsing script url")?;

        match scenario {
            Scenario::NoRegistration => Ok(self.observer().run().await),

            Scenario::FreshInstall => {
                let registration = self.container.register(SCOPE).await.context("register")?;
                let mut observer = self.observer().spawn();
                observer.ready().await;

                registration
                    .install_with(script, &self.reset_handler())
                    .await
                    .context("install")?;
                registration.activate().await.context("activate")?;
                let active = registration
                    .active()
                    .await
                    .ok_or_not_found("active worker after activation")?;
                info!(worker = %active.id(), "Fresh worker active");

                tokio::time::sleep(self.settle_time()).await;
                observer.shutdown().await
            }

            Scenario::UpdateWaiting => {
                let registration = self.container.register(SCOPE).await.context("register")?;
                let old = registration
                    .install_with(script.clone(), &self.reset_handler())
                    .await
                    .context("install old worker")?;
                registration.activate().await.context("activate old worker")?;
                self.container.set_controller(Some(old)).await;

                let mut observer = self.observer().spawn();
                observer.ready().await;

                registration
                    .install_with(script, &self.reset_handler())
                    .await
                    .context("install new worker")?;
                let waiting = registration
                    .waiting()
                    .await
                    .ok_or_not_found("waiting worker behind the controller")?;
                info!(worker = %waiting.id(), "New worker waiting");

                tokio::time::sleep(self.settle_time()).await;
                observer.shutdown().await
            }

            Scenario::FailedInstall => {
                let registration = self.container.register(SCOPE).await.context("register")?;
                let mut observer = self.observer().spawn();
                observer.ready().await;

                if let Err(err) = registration.install_with(script, &BrokenInstall).await {
                    info!(error = %err, "Install failed as scripted");
                }

                self.container.unregister().await;
                let limit = self.settle_time();
                tokio::time::timeout(limit, observer.join())
                    .await
                    .map_err(|_| SwKitError::Timeout(limit))?
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> swkit_common::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => SwKitConfig::load(path)?,
        None => SwKitConfig::default(),
    };
    init_logging(config.logging.to_log_config()?)?;

    info!(
        grace_period_ms = config.observer.grace_period_ms,
        "Running swkit smoke scenarios"
    );

    let mut summary = serde_json::Map::new();
    for scenario in Scenario::ALL {
        let harness = Harness::new(&config.observer).await;
        let started = Instant::now();
        let report = harness.run(scenario).await?;

        summary.insert(
            scenario.name().to_string(),
            json!({
                "controlled": report.controlled,
                "registration_found": report.registration_found,
                "workers_seen": report.workers_seen,
                "console": harness.console.lines(),
                "caches_left": harness.storage.len().await,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(summary))?
    );
    Ok(())
}
