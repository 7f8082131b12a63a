//! Console sinks for human-readable lifecycle messages.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Plain-text line sink (`console.log`).
pub trait Console: Send + Sync {
    fn log(&self, line: &str);
}

/// Writes each line as an `info` event on the `swkit::console` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn log(&self, line: &str) {
        info!(target: "swkit::console", "{}", line);
    }
}

/// Keeps every line in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingConsole {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of times `line` was logged.
    pub fn count(&self, line: &str) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.as_str() == line)
            .count()
    }
}

impl Console for RecordingConsole {
    fn log(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_console_shares_buffer() {
        let console = RecordingConsole::new();
        let sink: Arc<dyn Console> = Arc::new(console.clone());

        sink.log("first");
        sink.log("second");
        sink.log("first");

        assert_eq!(console.lines(), vec!["first", "second", "first"]);
        assert_eq!(console.count("first"), 2);
        assert_eq!(console.count("third"), 0);
    }

    #[test]
    fn test_tracing_console_does_not_panic_without_subscriber() {
        TracingConsole.log("no subscriber installed");
    }
}
