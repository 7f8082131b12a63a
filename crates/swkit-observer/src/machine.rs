//! Per-worker lifecycle state machine.
//!
//! Pure: inputs are lifecycle notifications, outputs are messages to log and
//! timer requests. The async driver in [`crate::observer`] owns the timers.

use swkit_sw::ServiceWorkerState;

use crate::message::LifecycleMessage;

/// How a tracked worker ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Active by the end of the grace period.
    Activated,
    /// Still not active after the grace period.
    Waiting,
    /// Went redundant while installing.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerPhase {
    /// Not announced by `updatefound` yet.
    #[default]
    Idle,
    Installing,
    /// Installed; waiting for the grace timer before deciding.
    InstalledPendingCheck,
    Resolved(Resolution),
}

/// Inbound notification for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleInput {
    /// `updatefound` announced this worker.
    Discovered,
    /// `statechange` on this worker.
    StateChanged(ServiceWorkerState),
    /// Grace timer fired; carries the worker's state at that moment.
    GraceElapsed(ServiceWorkerState),
}

/// What the driver should do in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    Log(LifecycleMessage),
    StartGraceTimer,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerMachine {
    phase: WorkerPhase,
}

impl WorkerMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Whether a grace timer should currently be running.
    pub fn awaiting_grace(&self) -> bool {
        self.phase == WorkerPhase::InstalledPendingCheck
    }

    pub fn handle(&mut self, input: LifecycleInput) -> Vec<LifecycleEffect> {
        use LifecycleEffect::Log;

        match (self.phase, input) {
            (WorkerPhase::Idle, LifecycleInput::Discovered) => {
                self.phase = WorkerPhase::Installing;
                vec![Log(LifecycleMessage::UpdateFound)]
            }
            // Never announced, so not ours to narrate.
            (WorkerPhase::Idle, _) => Vec::new(),
            (_, LifecycleInput::Discovered) => Vec::new(),

            (WorkerPhase::Installing, LifecycleInput::StateChanged(ServiceWorkerState::Installed)) => {
                self.phase = WorkerPhase::InstalledPendingCheck;
                vec![
                    Log(LifecycleMessage::Installed),
                    LifecycleEffect::StartGraceTimer,
                ]
            }
            (phase, LifecycleInput::StateChanged(ServiceWorkerState::Redundant)) => {
                if phase == WorkerPhase::Installing {
                    self.phase = WorkerPhase::Resolved(Resolution::Failed);
                }
                vec![Log(LifecycleMessage::InstallFailed)]
            }
            (_, LifecycleInput::StateChanged(_)) => Vec::new(),

            (WorkerPhase::InstalledPendingCheck, LifecycleInput::GraceElapsed(state)) => {
                let (resolution, message) = if state == ServiceWorkerState::Activated {
                    (Resolution::Activated, LifecycleMessage::Activated)
                } else {
                    (Resolution::Waiting, LifecycleMessage::Waiting)
                };
                self.phase = WorkerPhase::Resolved(resolution);
                vec![Log(message)]
            }
            (_, LifecycleInput::GraceElapsed(_)) => Vec::new(),
        }
    }
}
