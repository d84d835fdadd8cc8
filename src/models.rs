// src/models.rs
//! Data models for the capture pipeline.

/// Messaging platform a captured notification originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Sms,
    WhatsApp,
    Telegram,
    Unknown,
}

impl Platform {
    /// Wire name used in the bridge payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sms => "SMS",
            Platform::WhatsApp => "WHATSAPP",
            Platform::Telegram => "TELEGRAM",
            Platform::Unknown => "UNKNOWN",
        }
    }
}

/// Which observer produced a message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChannel {
    Notification,
    AccessibilityScrape,
}

/// The unit of work flowing through the pipeline.
///
/// Created at the moment of the bus callback, immutable afterwards,
/// consumed exactly once by the bridge. Not persisted here.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub platform: Platform,
    pub sender: String,
    pub body: String,
    pub source_channel: SourceChannel,
    /// Epoch milliseconds at capture time.
    pub captured_at: i64,
}

impl MessageEvent {
    /// Unified outbound payload. Both capture sources serialize to the
    /// same schema: {platform, sender, message, timestamp}.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "platform": self.platform.as_str(),
            "sender": self.sender,
            "message": self.body,
            "timestamp": self.captured_at,
        })
    }
}

/// Result of a contacts-store lookup for a sender identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactLookupResult {
    Known,
    Unknown,
    /// The store itself failed; callers treat this as Unknown (fail-open).
    LookupFailed,
}

/// Connection state of a capture mechanism, driven by bus callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Connected,
    Disconnected,
}

/// A notification as parsed off the bus, before extraction.
///
/// `ticker` is the expanded text where the relay provides one
/// (usually "Sender: full message"), `text` the short preview.
#[derive(Debug, Clone)]
pub struct RawNotification {
    pub source_id: String,
    pub sender: String,
    pub text: String,
    pub ticker: String,
}

/// Every bus-delivered callback, funneled into one dispatcher.
#[derive(Debug, Clone)]
pub enum IncomingEvent {
    NotificationPosted(RawNotification),
    UiContentChanged {
        source_id: String,
        texts: Vec<String>,
    },
    ListenerConnected,
    ListenerDisconnected,
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
