// src/registry.rs
//! Static mapping of monitored notification sources to platforms.

use crate::models::Platform;

/// Exact-match table: package ids the phone relay reports, plus the
/// display names desktop clients post under.
const SOURCES: &[(&str, Platform)] = &[
    // SMS clients
    ("com.google.android.apps.messaging", Platform::Sms),
    ("com.samsung.android.messaging", Platform::Sms),
    ("com.android.mms", Platform::Sms),
    ("Messages", Platform::Sms),
    // WhatsApp
    ("com.whatsapp", Platform::WhatsApp),
    ("com.whatsapp.w4b", Platform::WhatsApp),
    ("WhatsApp", Platform::WhatsApp),
    // Telegram
    ("org.telegram.messenger", Platform::Telegram),
    ("org.telegram.desktop", Platform::Telegram),
    ("Telegram", Platform::Telegram),
    ("Telegram Desktop", Platform::Telegram),
];

/// Substring fallback for unregistered sources that are clearly SMS-like.
const SMS_HINTS: &[&str] = &["sms", "mms", "messaging"];

/// Classifies a notification source identifier.
///
/// Exact lookup first, then the substring heuristic, else `Unknown`.
/// Total over any string input; callers drop `Unknown` events.
pub fn classify(source_id: &str) -> Platform {
    for (id, platform) in SOURCES {
        if *id == source_id {
            return *platform;
        }
    }

    let lower = source_id.to_lowercase();
    if SMS_HINTS.iter().any(|hint| lower.contains(hint)) {
        return Platform::Sms;
    }

    Platform::Unknown
}
