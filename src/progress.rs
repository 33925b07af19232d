// src/progress.rs
//! Optional observability channel for long runs. Emitting never blocks and never fails
//! the pipeline.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Text { name: String, content: String },
    Json { name: String, payload: Value },
}

impl ProgressEvent {
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn json(name: impl Into<String>, payload: Value) -> Self {
        Self::Json {
            name: name.into(),
            payload,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::Json { name, .. } => name,
        }
    }

    /// Event body as sent over SSE.
    pub fn data(&self) -> String {
        match self {
            Self::Text { content, .. } => content.clone(),
            Self::Json { payload, .. } => payload.to_string(),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Logs event names at debug level (payloads can be large).
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        debug!(target: "progress", event = event.name(), "progress");
    }
}

/// Forwards into a bounded channel. A full or closed channel drops the event.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(target: "progress", error = %e, "progress event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_channel_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        sink.emit(ProgressEvent::text("A", "first"));
        sink.emit(ProgressEvent::text("B", "second"));
        assert_eq!(rx.try_recv().unwrap().name(), "A");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        ChannelSink::new(tx).emit(ProgressEvent::json("X", json!({"a": 1})));
    }

    #[test]
    fn data_renders_payloads() {
        assert_eq!(ProgressEvent::json("X", json!({"a": 1})).data(), r#"{"a":1}"#);
        assert_eq!(ProgressEvent::text("X", "hi").data(), "hi");
    }
}
