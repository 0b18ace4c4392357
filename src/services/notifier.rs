//! Best-effort fan-out of slot events to connected clients

use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::slots::{Comment, Slot};

/// Wire format: `{"event": "slot:published", "payload": {...}}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum SlotEvent {
    #[serde(rename = "slot:created")]
    Created(Slot),
    #[serde(rename = "slot:updated")]
    Updated(Slot),
    #[serde(rename = "slot:deleted")]
    Deleted {
        #[serde(rename = "slotId")]
        slot_id: String,
    },
    #[serde(rename = "slot:published")]
    Published {
        #[serde(rename = "slotId")]
        slot_id: String,
        result: serde_json::Value,
    },
    #[serde(rename = "slot:comment")]
    Comment {
        #[serde(rename = "slotId")]
        slot_id: String,
        comment: Comment,
    },
}

impl SlotEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SlotEvent::Created(_) => "slot:created",
            SlotEvent::Updated(_) => "slot:updated",
            SlotEvent::Deleted { .. } => "slot:deleted",
            SlotEvent::Published { .. } => "slot:published",
            SlotEvent::Comment { .. } => "slot:comment",
        }
    }
}

#[derive(Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<SlotEvent>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire and forget. Having nobody listening is not an error.
    pub fn emit(&self, event: SlotEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(event = name, receivers, "Event emitted"),
            Err(_) => tracing::trace!(event = name, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SlotEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = SlotEvent::Published {
            slot_id: "s1".to_string(),
            result: json!({ "id": "123_1" }),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "slot:published", "payload": { "slotId": "s1", "result": { "id": "123_1" } } })
        );

        let deleted = SlotEvent::Deleted {
            slot_id: "s2".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&deleted).unwrap(),
            json!({ "event": "slot:deleted", "payload": { "slotId": "s2" } })
        );
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let notifier = EventNotifier::new(4);
        notifier.emit(SlotEvent::Deleted {
            slot_id: "s1".to_string(),
        });

        let mut rx = notifier.subscribe();
        notifier.emit(SlotEvent::Deleted {
            slot_id: "s2".to_string(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), "slot:deleted");
    }
}
