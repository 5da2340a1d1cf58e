//! Event sink trait and implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives scenario lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits `kind` (e.g. `stage.applied`) with an optional JSON payload.
    async fn emit(&self, kind: &str, data: Option<Value>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _kind: &str, _data: Option<Value>) {}
}

/// Logs events through `tracing`, lifting the scenario and stage names
/// out of the payload into fields.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink that logs at `level`. DEBUG and TRACE both log at DEBUG.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

fn payload_str<'a>(data: Option<&'a Value>, key: &str) -> Option<&'a str> {
    data.and_then(|d| d.get(key)).and_then(Value::as_str)
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, kind: &str, data: Option<Value>) {
        let scenario = payload_str(data.as_ref(), "scenario").unwrap_or("-");
        let stage = payload_str(data.as_ref(), "stage").unwrap_or("-");

        if self.level <= Level::INFO {
            info!(event = kind, scenario, stage, data = ?data, "event");
        } else {
            debug!(event = kind, scenario, stage, data = ?data, "event");
        }
    }
}

/// One event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    /// Event type.
    pub kind: String,
    /// Payload, if any.
    pub data: Option<Value>,
    /// Capture time.
    pub at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Returns a string field of the payload.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        payload_str(self.data.as_ref(), key)
    }
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Returns the event types in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.kind.clone()).collect()
    }

    /// Returns the events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<RecordedEvent> {
        self.filtered(|e| e.kind.starts_with(prefix))
    }

    /// Returns the events whose payload names `stage`.
    #[must_use]
    pub fn for_stage(&self, stage: &str) -> Vec<RecordedEvent> {
        self.filtered(|e| e.field("stage") == Some(stage))
    }

    /// Number of captured events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drops every captured event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn filtered(&self, keep: impl Fn(&RecordedEvent) -> bool) -> Vec<RecordedEvent> {
        self.events.lock().iter().filter(|e| keep(e)).cloned().collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, kind: &str, data: Option<Value>) {
        self.events.lock().push(RecordedEvent {
            kind: kind.to_string(),
            data,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit("stage.applied", None).await;

        let sink = LoggingEventSink::debug();
        sink.emit("stage.destroyed", Some(json!({"scenario": "complete", "stage": "cluster"})))
            .await;
        LoggingEventSink::default().emit("scenario.completed", Some(json!([1, 2]))).await;
    }

    #[test]
    fn test_payload_fields() {
        let event = RecordedEvent {
            kind: "stage.applied".into(),
            data: Some(json!({"stage": "network", "outputs": 3})),
            at: Utc::now(),
        };
        assert_eq!(event.field("stage"), Some("network"));
        assert_eq!(event.field("outputs"), None);
        assert_eq!(event.field("scenario"), None);
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("stage.applied", Some(json!({"stage": "prerequisites"}))).await;
        sink.emit("stage.destroyed", Some(json!({"stage": "cluster"}))).await;
        sink.emit("check.passed", Some(json!({"stage": "validation", "check": "ssh"}))).await;
        sink.emit("stage.destroyed", Some(json!({"stage": "prerequisites"}))).await;

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.events_of_type("stage.").len(), 3);
        assert_eq!(
            sink.event_types(),
            vec!["stage.applied", "stage.destroyed", "check.passed", "stage.destroyed"]
        );

        let prereq: Vec<_> = sink.for_stage("prerequisites").into_iter().map(|e| e.kind).collect();
        assert_eq!(prereq, vec!["stage.applied", "stage.destroyed"]);

        let events = sink.events();
        assert!(events.windows(2).all(|w| w[0].at <= w[1].at));

        sink.clear();
        assert!(sink.is_empty());
    }
}
