// src/pipeline.rs
//! The triage dispatcher: one place where every bus callback is
//! classified, gated, and forwarded.

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::contacts::{self, ContactStore};
use crate::dedup::{message_key, DedupWindow};
use crate::lifecycle::LifecycleManager;
use crate::models::{
    ContactLookupResult, IncomingEvent, MessageEvent, Platform, RawNotification, SourceChannel,
    now_millis,
};
use crate::notifications::extract_message;
use crate::registry;
use crate::scrape::filter_candidates;

/// Upper bound on a single contacts-store lookup; expiry counts as a
/// failed lookup and fails open.
pub const CONTACT_LOOKUP_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(2);

/// Explicitly constructed pipeline owning its own gates and bridge handle.
pub struct TriagePipeline {
    dedup: DedupWindow,
    contacts: Arc<dyn ContactStore>,
    bridge: Bridge,
    lifecycle: Arc<LifecycleManager>,
}

impl TriagePipeline {
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        bridge: Bridge,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            dedup: DedupWindow::new(),
            contacts,
            bridge,
            lifecycle,
        }
    }

    /// Drains the capture channels until every sender is gone.
    pub async fn run(&self, mut events: tokio::sync::mpsc::UnboundedReceiver<IncomingEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        eprintln!("Event channel closed, dispatcher stopping");
    }

    /// Single entry point for all bus-delivered callbacks.
    pub async fn handle(&self, event: IncomingEvent) {
        match event {
            IncomingEvent::NotificationPosted(raw) => self.handle_notification(raw).await,
            IncomingEvent::UiContentChanged { source_id, texts } => {
                self.handle_scrape(&source_id, &texts).await;
            }
            IncomingEvent::ListenerConnected => {
                // Live events only; nothing missed is replayed.
                eprintln!("=== Capture Ready ===");
                self.lifecycle.on_listener_connected().await;
            }
            IncomingEvent::ListenerDisconnected => {
                self.lifecycle.on_listener_disconnected().await;
            }
        }
    }

    async fn handle_notification(&self, raw: RawNotification) {
        let platform = registry::classify(&raw.source_id);
        if platform == Platform::Unknown {
            return;
        }

        let Some((sender, body)) = extract_message(&raw) else {
            return;
        };

        self.gate_and_forward(platform, sender, body, SourceChannel::Notification)
            .await;
    }

    /// Scrape-sourced candidates run through the same dedup and privacy
    /// gates as notification-sourced events before touching the bridge.
    async fn handle_scrape(&self, source_id: &str, texts: &[String]) {
        let platform = registry::classify(source_id);
        if platform == Platform::Unknown {
            return;
        }

        for body in filter_candidates(texts) {
            self.gate_and_forward(
                platform,
                String::new(),
                body,
                SourceChannel::AccessibilityScrape,
            )
            .await;
        }
    }

    async fn gate_and_forward(
        &self,
        platform: Platform,
        sender: String,
        body: String,
        source_channel: SourceChannel,
    ) {
        let key = message_key(platform, &sender, &body);
        if !self.dedup.insert(key) {
            return;
        }

        if self.lookup_contact(&sender).await == ContactLookupResult::Known {
            // Trusted sender; the message content goes no further.
            return;
        }

        self.bridge.send(MessageEvent {
            platform,
            sender,
            body,
            source_channel,
            captured_at: now_millis(),
        });
    }

    /// Contact lookup on the blocking pool, bounded by a timeout so a
    /// stalled store cannot pin the dispatcher.
    async fn lookup_contact(&self, sender: &str) -> ContactLookupResult {
        let store = Arc::clone(&self.contacts);
        let sender = sender.to_string();

        let lookup =
            tokio::task::spawn_blocking(move || contacts::is_known(store.as_ref(), &sender));

        match tokio::time::timeout(CONTACT_LOOKUP_TIMEOUT, lookup).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                eprintln!("✗ Contact lookup task failed: {}", e);
                ContactLookupResult::LookupFailed
            }
            Err(_) => {
                eprintln!("✗ Contact lookup timed out");
                ContactLookupResult::LookupFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::CaptureHandle;
    use std::error::Error as StdError;
    use tokio::sync::mpsc;

    struct FixedStore {
        names: Vec<String>,
        numbers: Vec<String>,
    }

    impl FixedStore {
        fn with_contact(name: &str, number: &str) -> Self {
            Self {
                names: vec![name.to_string()],
                numbers: vec![number.to_string()],
            }
        }

        fn empty() -> Self {
            Self {
                names: Vec::new(),
                numbers: Vec::new(),
            }
        }
    }

    impl ContactStore for FixedStore {
        fn matches_by_name(
            &self,
            query: &str,
        ) -> Result<usize, Box<dyn StdError + Send + Sync>> {
            let query = query.to_lowercase();
            Ok(self
                .names
                .iter()
                .filter(|n| n.to_lowercase().contains(&query))
                .count())
        }

        fn matches_by_number(
            &self,
            number: &str,
        ) -> Result<usize, Box<dyn StdError + Send + Sync>> {
            Ok(self
                .numbers
                .iter()
                .filter(|n| crate::contacts::phone_numbers_match(n, number))
                .count())
        }
    }

    struct BrokenStore;

    impl ContactStore for BrokenStore {
        fn matches_by_name(&self, _: &str) -> Result<usize, Box<dyn StdError + Send + Sync>> {
            Err("provider crashed".into())
        }

        fn matches_by_number(&self, _: &str) -> Result<usize, Box<dyn StdError + Send + Sync>> {
            Err("provider crashed".into())
        }
    }

    fn pipeline_with(
        store: Arc<dyn ContactStore>,
    ) -> (TriagePipeline, mpsc::Receiver<MessageEvent>) {
        let (bridge, rx) = Bridge::channel();
        let (rebind_tx, _rebind_rx) = mpsc::channel(4);
        let lifecycle = Arc::new(LifecycleManager::new(CaptureHandle::from_channel(rebind_tx)));
        (TriagePipeline::new(store, bridge, lifecycle), rx)
    }

    fn notification(source_id: &str, sender: &str, text: &str) -> IncomingEvent {
        IncomingEvent::NotificationPosted(RawNotification {
            source_id: source_id.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            ticker: String::new(),
        })
    }

    #[tokio::test]
    async fn unknown_sender_is_forwarded() {
        let (pipeline, mut rx) = pipeline_with(Arc::new(FixedStore::empty()));

        pipeline
            .handle(notification("com.whatsapp", "+15559998888", "OTP is 483920"))
            .await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.platform, Platform::WhatsApp);
        assert_eq!(event.sender, "+15559998888");
        assert_eq!(event.body, "OTP is 483920");
        assert_eq!(event.source_channel, SourceChannel::Notification);
    }

    #[tokio::test]
    async fn known_contact_is_suppressed() {
        let store = FixedStore::with_contact("Alice Johnson", "+1 555 000 1111");
        let (pipeline, mut rx) = pipeline_with(Arc::new(store));

        pipeline
            .handle(notification(
                "com.whatsapp",
                "Alice Johnson",
                "totally genuine message about money",
            ))
            .await;
        pipeline
            .handle(notification(
                "com.android.mms",
                "+1 555 000 1111",
                "also from a known number",
            ))
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_notification_is_dropped() {
        let (pipeline, mut rx) = pipeline_with(Arc::new(FixedStore::empty()));
        let event = notification("org.telegram.messenger", "scammer", "send money now");

        pipeline.handle(event.clone()).await;
        pipeline.handle(event).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_source_is_dropped() {
        let (pipeline, mut rx) = pipeline_with(Arc::new(FixedStore::empty()));

        pipeline
            .handle(notification("com.spotify.music", "Spotify", "New release out now"))
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn short_body_is_dropped() {
        let (pipeline, mut rx) = pipeline_with(Arc::new(FixedStore::empty()));

        pipeline
            .handle(notification("com.whatsapp", "+15559998888", "Hi"))
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broken_contact_store_fails_open() {
        let (pipeline, mut rx) = pipeline_with(Arc::new(BrokenStore));

        pipeline
            .handle(notification("com.whatsapp", "+15559998888", "claim your prize"))
            .await;

        // Lookup failure means the message still reaches analysis.
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn scrape_candidates_pass_through_both_gates() {
        let (pipeline, mut rx) = pipeline_with(Arc::new(FixedStore::empty()));

        let texts = vec![
            "Online".to_string(),
            "Your OTP is 483920, do not share".to_string(),
        ];

        pipeline
            .handle(IncomingEvent::UiContentChanged {
                source_id: "WhatsApp".to_string(),
                texts: texts.clone(),
            })
            .await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.source_channel, SourceChannel::AccessibilityScrape);
        assert_eq!(event.body, "Your OTP is 483920, do not share");
        assert!(rx.try_recv().is_err());

        // Re-scraping the same screen is absorbed by the dedup window.
        pipeline
            .handle(IncomingEvent::UiContentChanged {
                source_id: "WhatsApp".to_string(),
                texts,
            })
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn scrape_with_empty_sender_never_matches_contacts() {
        // A store whose name matching would match anything; the empty
        // scrape sender must not trigger it.
        let store = FixedStore::with_contact("", "+1 555 000 1111");
        let (pipeline, mut rx) = pipeline_with(Arc::new(store));

        pipeline
            .handle(IncomingEvent::UiContentChanged {
                source_id: "WhatsApp".to_string(),
                texts: vec!["Please transfer the amount to this account".to_string()],
            })
            .await;

        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn listener_callbacks_drive_lifecycle_state() {
        let (pipeline, _rx) = pipeline_with(Arc::new(FixedStore::empty()));

        pipeline.handle(IncomingEvent::ListenerConnected).await;
        assert!(pipeline.lifecycle.is_listener_enabled().await);

        pipeline.handle(IncomingEvent::ListenerDisconnected).await;
        assert!(!pipeline.lifecycle.is_listener_enabled().await);
    }
}
