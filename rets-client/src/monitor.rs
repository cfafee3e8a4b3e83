//! Network activity monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Handle returned by [`NetworkMonitor::event_start`].
#[derive(Debug)]
pub struct EventToken {
    id: u64,
    label: String,
    started: Instant,
}

impl EventToken {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Observes the start and end of every network exchange.
pub trait NetworkMonitor: Send + Sync {
    fn event_start(&self, label: &str) -> EventToken;

    fn event_finish(&self, token: EventToken);
}

/// Ignores all events.
#[derive(Debug, Default)]
pub struct NullMonitor;

impl NetworkMonitor for NullMonitor {
    fn event_start(&self, label: &str) -> EventToken {
        EventToken::new(0, label)
    }

    fn event_finish(&self, _token: EventToken) {}
}

/// Emits events as `tracing` records.
#[derive(Debug, Default)]
pub struct TracingMonitor {
    next_id: AtomicU64,
}

impl TracingMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkMonitor for TracingMonitor {
    fn event_start(&self, label: &str) -> EventToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(event = id, "{}...", label);
        EventToken::new(id, label)
    }

    fn event_finish(&self, token: EventToken) {
        tracing::debug!(
            event = token.id(),
            elapsed_ms = token.elapsed().as_millis() as u64,
            "{} finished",
            token.label()
        );
    }
}

/// Finishes its event when dropped, whichever way the scope is left.
pub(crate) struct MonitorGuard<'a> {
    monitor: &'a dyn NetworkMonitor,
    token: Option<EventToken>,
}

impl<'a> MonitorGuard<'a> {
    pub(crate) fn start(monitor: &'a dyn NetworkMonitor, label: &str) -> Self {
        Self {
            monitor,
            token: Some(monitor.event_start(label)),
        }
    }
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.monitor.event_finish(token);
        }
    }
}
