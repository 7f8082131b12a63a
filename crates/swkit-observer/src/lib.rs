//! # swkit Lifecycle Observer
//!
//! Narrates a page's service worker registration on a console.
//!
//! ## Features
//!
//! - Reports whether the page is controlled by a service worker
//! - Explains a worker stuck in `waiting`
//! - Follows every worker announced by `updatefound` through `installed`,
//!   then decides after a grace period whether it activated or is waiting
//! - Reports failed installs (`redundant`)
//!
//! ## Architecture
//!
//! ```text
//! RegistrationLifecycle ── UpdateFound / StateChange ──┐
//!                                                      ├──→ WorkerMachine (per worker) ──→ Console
//! grace timer task ────────── GraceElapsed ────────────┘          │
//!        ▲                                                        │
//!        └──────────────────── StartGraceTimer ───────────────────┘
//! ```

pub mod machine;
pub mod message;
pub mod observer;

pub use machine::{LifecycleEffect, LifecycleInput, Resolution, WorkerMachine, WorkerPhase};
pub use message::LifecycleMessage;
pub use observer::{LifecycleObserver, ObserverHandle, ObserverReport};
