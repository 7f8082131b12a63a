//! Console messages emitted by the observer.

use std::fmt;

/// A fixed, human-readable lifecycle message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleMessage {
    NotControlled,
    Controlled,
    UpdateFound,
    Installed,
    Activated,
    /// A new worker is stuck behind pages controlled by the old one.
    Waiting,
    InstallFailed,
}

impl LifecycleMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleMessage::NotControlled => "This page is not controlled by a ServiceWorker",
            LifecycleMessage::Controlled => "This page is controlled by a ServiceWorker",
            LifecycleMessage::UpdateFound => "Found a new ServiceWorker!",
            LifecycleMessage::Installed => "New ServiceWorker installed.",
            LifecycleMessage::Activated => {
                "New ServiceWorker activated! Reload to load this page with the new ServiceWorker."
            }
            LifecycleMessage::Waiting => {
                "A new ServiceWorker is waiting to become active. It can't become active now \
                 because pages are still open that are controlled by the older version. Either \
                 close those tabs, or shift+reload them (which loads them without the \
                 ServiceWorker). That will allow the new version to become active, so it'll be \
                 used for the next page load."
            }
            LifecycleMessage::InstallFailed => {
                "The new worker failed to install - likely an error during install"
            }
        }
    }
}

impl fmt::Display for LifecycleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
