// src/bridge.rs
//! Fire-and-forget channel delivering captured events to the application runtime.

use tokio::sync::mpsc;

use crate::models::MessageEvent;

/// Events the bridge can buffer while the runtime side drains.
const BRIDGE_QUEUE_DEPTH: usize = 64;

/// Outbound half of the capture → runtime channel.
///
/// Delivery is at-most-once: if the runtime is detached or the queue is
/// saturated, the event is dropped after a log line. There is no retry
/// queue and no persistence; push-notification alerting is the external
/// backup channel for anything lost here.
pub struct Bridge {
    tx: mpsc::Sender<MessageEvent>,
}

impl Bridge {
    /// Creates the bridge and the receiver the application runtime attaches to.
    pub fn channel() -> (Self, mpsc::Receiver<MessageEvent>) {
        let (tx, rx) = mpsc::channel(BRIDGE_QUEUE_DEPTH);
        (Self { tx }, rx)
    }

    /// Sends an event without waiting on the runtime being ready.
    pub fn send(&self, event: MessageEvent) {
        eprintln!(
            "📨 Forwarding {} message from '{}' ({} chars)",
            event.platform.as_str(),
            event.sender,
            event.body.chars().count()
        );

        match self.tx.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                eprintln!("✗ Bridge queue full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                eprintln!("✗ Runtime detached, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_millis, Platform, SourceChannel};

    fn sample_event(body: &str) -> MessageEvent {
        MessageEvent {
            platform: Platform::Sms,
            sender: "+15550001111".to_string(),
            body: body.to_string(),
            source_channel: SourceChannel::Notification,
            captured_at: now_millis(),
        }
    }

    #[tokio::test]
    async fn send_delivers_to_attached_runtime() {
        let (bridge, mut rx) = Bridge::channel();
        bridge.send(sample_event("OTP is 483920"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.body, "OTP is 483920");
        assert_eq!(received.platform, Platform::Sms);
    }

    #[tokio::test]
    async fn send_to_detached_runtime_is_silent() {
        let (bridge, rx) = Bridge::channel();
        drop(rx);

        // Must not panic or block; the event is simply lost.
        bridge.send(sample_event("dropped"));
    }

    #[tokio::test]
    async fn payload_uses_unified_schema() {
        let event = sample_event("click this link");
        let payload = event.to_payload();

        assert_eq!(payload["platform"], "SMS");
        assert_eq!(payload["sender"], "+15550001111");
        assert_eq!(payload["message"], "click this link");
        assert!(payload["timestamp"].as_i64().unwrap() > 0);
        // The historical accessibility shape keyed "source"/"message" is gone.
        assert!(payload.get("source").is_none());
    }
}
