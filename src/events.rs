//! Event distribution from probe tasks to consumers.
//!
//! The [`EventBus`] is a fixed list of handlers called synchronously, in
//! registration order, on whichever task dispatches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::probe::CheckResult;
use crate::registry::TargetKey;
use crate::store::{LiveDataStore, LogEntry, Severity, SharedLog, TargetData};

#[derive(Debug, Clone)]
pub enum Event {
    TargetDataUpdated {
        key: TargetKey,
        data: TargetData,
        terminal_width: u16,
    },
    SslDataUpdated {
        url: String,
        days_remaining: Option<i64>,
    },
}

/// A consumer of bus events. Handlers run on the dispatching task and must not block.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

/// Ordered fan-out of events to every registered handler.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Only done during startup, before the bus is shared.
    pub fn subscribe(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in &self.handlers {
            handler.handle(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventHandler for LiveDataStore {
    fn handle(&self, event: &Event) {
        match event {
            Event::TargetDataUpdated {
                key,
                data,
                terminal_width,
            } => {
                if self.update_target_data(key, data.clone()) {
                    self.update_plot_history(key, &data.result, *terminal_width);
                }
            }
            Event::SslDataUpdated {
                url,
                days_remaining,
            } => self.update_ssl_days(url, days_remaining.unwrap_or(-1)),
        }
    }
}

/// Turns probe outcomes into log entries.
#[derive(Debug)]
pub struct LogRecorder {
    log: Arc<SharedLog>,
    last_state: Mutex<HashMap<TargetKey, bool>>,
}

impl LogRecorder {
    pub fn new(log: Arc<SharedLog>) -> Self {
        Self {
            log,
            last_state: Mutex::new(HashMap::new()),
        }
    }
}

impl EventHandler for LogRecorder {
    fn handle(&self, event: &Event) {
        let Event::TargetDataUpdated { key, data, .. } = event else {
            return;
        };

        let result = &data.result;
        let was_up = self
            .last_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), result.success);

        match (was_up, result.success) {
            (Some(true), false) => {
                self.log.add(LogEntry::new(key.clone(), Severity::Error, format!("{} is DOWN", key)));
            }
            (Some(false), true) => {
                self.log.add(LogEntry::new(key.clone(), Severity::Info, format!("{} recovered", key)));
            }
            _ => {}
        }

        self.log.add(entry_for_result(key, result));
    }
}

fn entry_for_result(key: &TargetKey, result: &CheckResult) -> LogEntry {
    let status = result
        .status_code
        .map_or_else(|| "no response".to_string(), |s| s.to_string());

    match (&result.error, result.success) {
        (Some(cause), true) => LogEntry::new(
            key.clone(),
            Severity::Info,
            format!("{} failed as expected ({:.0}ms)", key, result.latency_ms()),
        )
        .with_detail(cause.clone()),
        (None, true) => LogEntry::new(
            key.clone(),
            Severity::Info,
            format!("{} {} in {:.0}ms", key, status, result.latency_ms()),
        ),
        (Some(cause), false) if result.status_code.is_none() => LogEntry::new(
            key.clone(),
            Severity::Error,
            format!("{} check failed", key),
        )
        .with_detail(cause.clone()),
        (cause, false) => {
            let entry = LogEntry::new(
                key.clone(),
                Severity::Warning,
                format!("{} {} in {:.0}ms", key, status, result.latency_ms()),
            );
            match cause {
                Some(cause) => entry.with_detail(cause.clone()),
                None => entry,
            }
        }
    }
}

/// Forwards events into the render loop's queue.
#[derive(Debug, Clone)]
pub struct RenderNotifier {
    tx: mpsc::UnboundedSender<Event>,
}

impl RenderNotifier {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

impl EventHandler for RenderNotifier {
    fn handle(&self, event: &Event) {
        // The render loop has exited during shutdown; nothing left to notify.
        let _ = self.tx.send(event.clone());
    }
}
