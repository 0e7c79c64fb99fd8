use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Event emitted by the resilience core.
///
/// Every breaker transition, call outcome, rejection, SLA breach, and
/// predictive alert flows through the registered [`EventSink`]. The sink is
/// called at the emission point, after the state mutation it describes has
/// been committed, so consumers observe events in causal order.
#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    pub event_type: String,
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl SystemEvent {
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        provider_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            provider_id: provider_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Sink for system events, implemented by integration code.
///
/// Injected explicitly instead of a global publisher so that event ordering
/// stays testable.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: SystemEvent);
}

/// Sink that drops all events, logging them at debug level
#[derive(Debug, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, event: SystemEvent) {
        debug!(
            event_type = %event.event_type,
            provider_id = %event.provider_id,
            "event discarded (no sink configured)"
        );
    }
}

/// Sink that forwards events into a bounded tokio channel.
///
/// A full channel drops the event rather than blocking the caller; the
/// resilience core must never stall on a slow consumer.
pub struct ChannelEventSink {
    sender: mpsc::Sender<SystemEvent>,
}

impl ChannelEventSink {
    #[must_use]
    pub const fn new(sender: mpsc::Sender<SystemEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with its receiving half
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<SystemEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: SystemEvent) {
        if let Err(e) = self.sender.try_send(event) {
            debug!("event channel full or closed, dropping event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut receiver) = ChannelEventSink::bounded(8);

        sink.publish(SystemEvent::new("state_change", "p1", json!({"to": "open"})))
            .await;
        sink.publish(SystemEvent::new("call_failure", "p1", json!({})))
            .await;

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.event_type, "state_change");
        assert_eq!(second.event_type, "call_failure");
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut receiver) = ChannelEventSink::bounded(1);

        sink.publish(SystemEvent::new("a", "p1", json!({}))).await;
        sink.publish(SystemEvent::new("b", "p1", json!({}))).await;

        assert_eq!(receiver.recv().await.unwrap().event_type, "a");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_null_sink_accepts_events() {
        let sink = NullEventSink;
        sink.publish(SystemEvent::new("noop", "p1", json!({}))).await;
    }
}
