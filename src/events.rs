//! Observability sink handed to the orchestrator.
//!
//! The orchestrator never talks to the global logger directly. It receives an
//! `EventSink` at construction so tests can observe transitions and retries.

use std::sync::Mutex;

use log::Level;

/// Append-only consumer of deployment events.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn record(&self, level: Level, message: &str);

    /// Flush buffered events. Called once when the process is done.
    fn flush(&self) {}
}

/// Forwards events to the `log` facade (timestamps come from the logger).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, level: Level, message: &str) {
        log::log!(target: "redeploy", level, "{}", message);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub level: Level,
    pub message: String,
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Messages containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.message.contains(needle))
            .map(|e| e.message)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, level: Level, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(Event {
                level,
                message: message.to_string(),
            });
        }
    }
}
