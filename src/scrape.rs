// src/scrape.rs
//! Secondary observer: reads message text out of one target app's
//! accessible UI tree when its notification payloads are redacted.

use futures::StreamExt;
use std::error::Error as StdError;
use tokio::sync::mpsc;
use zbus::{Connection, MatchRule, MessageStream};

use crate::bus;
use crate::models::{IncomingEvent, Platform};

const A11Y_BUS_SERVICE: &str = "org.a11y.Bus";
const A11Y_BUS_PATH: &str = "/org/a11y/bus";
const ACCESSIBLE_INTERFACE: &str = "org.a11y.atspi.Accessible";
const TEXT_INTERFACE: &str = "org.a11y.atspi.Text";
const REGISTRY_ROOT_PATH: &str = "/org/a11y/atspi/accessible/root";
const REGISTRY_SERVICE: &str = "org.a11y.atspi.Registry";

/// Tree-walk bounds so a pathological app cannot pin the event task.
const MAX_DEPTH: usize = 25;
const MAX_NODES: usize = 2000;

/// Candidates shorter than this are never message text.
pub const MIN_TEXT_LEN: usize = 10;
/// Denylist matching only applies below this length; longer strings are
/// assumed to be genuine message text even if a chrome word occurs inside.
const SHORT_TEXT_LIMIT: usize = 30;

/// Chrome/UI strings the target app paints around its message list.
const CHROME_DENYLIST: &[&str] = &[
    "online",
    "typing",
    "last seen",
    "delivered",
    "seen",
    "read",
    "mute",
    "unmute",
    "reply",
    "forward",
    "delete",
    "copy",
    "voice call",
    "video call",
    "new chat",
    "search",
    "archived",
    "attach",
    "camera",
    "emoji",
    "settings",
    "today",
    "yesterday",
];

/// The single app this observer is scoped to.
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    /// Accessible application name as the a11y registry reports it.
    pub app_name: String,
    /// Source identifier handed to the dispatcher for classification.
    pub source_id: String,
    pub platform: Platform,
}

impl ScrapeTarget {
    /// Default target: the desktop WhatsApp client, whose relayed
    /// notifications carry redacted previews.
    pub fn whatsapp() -> Self {
        Self {
            app_name: "WhatsApp".to_string(),
            source_id: "WhatsApp".to_string(),
            platform: Platform::WhatsApp,
        }
    }
}

/// Starts the scrape listener. On every window/content change event for
/// the target app, the accessible tree is walked and every exposed text
/// string is forwarded raw; the dispatcher owns filtering and gating.
pub fn start_scrape_listener(target: ScrapeTarget, events: mpsc::UnboundedSender<IncomingEvent>) {
    tokio::spawn(async move {
        eprintln!("=== Starting UI-Tree Scrape ===");
        eprintln!("Target app: {}", target.app_name);

        let conn = match a11y_connection().await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("✗ Accessibility bus unavailable: {}", e);
                return;
            }
        };

        let mut stream = match subscribe_content_events(&conn).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("✗ Failed to subscribe to accessibility events: {}", e);
                return;
            }
        };

        eprintln!("✓ Accessibility event stream ready");

        while let Some(msg) = stream.next().await {
            let Ok(_msg) = msg else {
                continue;
            };

            // Events fire in bursts while the app repaints; the dedup
            // window downstream absorbs the repeats.
            let texts = match collect_app_texts(&conn, &target.app_name).await {
                Ok(texts) => texts,
                Err(e) => {
                    eprintln!("✗ Tree walk failed: {}", e);
                    continue;
                }
            };

            if texts.is_empty() {
                continue;
            }

            let _ = events.send(IncomingEvent::UiContentChanged {
                source_id: target.source_id.clone(),
                texts,
            });
        }

        eprintln!("Scrape listener stream ended");
    });
}

/// The accessibility tree lives on its own bus; the session bus only
/// publishes its address.
async fn a11y_connection() -> Result<Connection, Box<dyn StdError + Send + Sync>> {
    let session = bus::get_connection().await?;

    let reply = session
        .call_method(
            Some(A11Y_BUS_SERVICE),
            A11Y_BUS_PATH,
            Some(A11Y_BUS_SERVICE),
            "GetAddress",
            &(),
        )
        .await?;

    let address: String = reply.body().deserialize()?;
    let conn = zbus::connection::Builder::address(address.as_str())?
        .build()
        .await?;
    Ok(conn)
}

async fn subscribe_content_events(
    conn: &Connection,
) -> Result<MessageStream, Box<dyn StdError + Send + Sync>> {
    let rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface("org.a11y.atspi.Event.Object")?
        .member("ChildrenChanged")?
        .build();

    let stream = MessageStream::for_match_rule(rule, conn, None).await?;
    Ok(stream)
}

/// Depth-first walk of the target app's accessible tree, collecting every
/// non-empty text string. Bounded by `MAX_DEPTH`/`MAX_NODES`.
async fn collect_app_texts(
    conn: &Connection,
    app_name: &str,
) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>> {
    let Some(app_root) = find_app_root(conn, app_name).await? else {
        return Ok(Vec::new());
    };

    let mut texts = Vec::new();
    let mut visited = 0usize;
    let mut stack = vec![(app_root, 0usize)];

    while let Some(((service, path), depth)) = stack.pop() {
        if depth > MAX_DEPTH || visited >= MAX_NODES {
            break;
        }
        visited += 1;

        if let Some(text) = node_text(conn, &service, &path).await {
            if !text.trim().is_empty() {
                texts.push(text);
            }
        }

        let Ok(children) = node_children(conn, &service, &path).await else {
            continue;
        };
        for child in children {
            stack.push((child, depth + 1));
        }
    }

    Ok(texts)
}

/// Locates the target app among the registry root's children.
async fn find_app_root(
    conn: &Connection,
    app_name: &str,
) -> Result<Option<(String, String)>, Box<dyn StdError + Send + Sync>> {
    let apps = node_children(conn, REGISTRY_SERVICE, REGISTRY_ROOT_PATH).await?;

    for (service, path) in apps {
        let Some(name) = node_name(conn, &service, &path).await else {
            continue;
        };
        if name.eq_ignore_ascii_case(app_name) {
            return Ok(Some((service, path)));
        }
    }

    Ok(None)
}

async fn node_children(
    conn: &Connection,
    service: &str,
    path: &str,
) -> Result<Vec<(String, String)>, Box<dyn StdError + Send + Sync>> {
    let reply = conn
        .call_method(Some(service), path, Some(ACCESSIBLE_INTERFACE), "GetChildren", &())
        .await?;

    let body = reply.body();
    let children: Vec<(String, zbus::zvariant::OwnedObjectPath)> = body.deserialize()?;

    Ok(children
        .into_iter()
        .map(|(service, path)| (service, path.as_str().to_string()))
        .collect())
}

async fn node_name(conn: &Connection, service: &str, path: &str) -> Option<String> {
    let reply = conn
        .call_method(
            Some(service),
            path,
            Some("org.freedesktop.DBus.Properties"),
            "Get",
            &(ACCESSIBLE_INTERFACE, "Name"),
        )
        .await
        .ok()?;

    let body = reply.body();
    let value: zbus::zvariant::Value = body.deserialize().ok()?;

    if let zbus::zvariant::Value::Str(s) = value {
        Some(s.to_string())
    } else {
        None
    }
}

/// Text content of a node, when it implements the text interface.
async fn node_text(conn: &Connection, service: &str, path: &str) -> Option<String> {
    let reply = conn
        .call_method(
            Some(service),
            path,
            Some(TEXT_INTERFACE),
            "GetText",
            &(0i32, -1i32),
        )
        .await
        .ok()?;

    reply.body().deserialize::<String>().ok()
}

/// Filters raw tree strings down to message-text candidates.
///
/// Anything under 10 chars is dropped outright. Short strings (< 30
/// chars) matching the chrome denylist case-insensitively are dropped as
/// UI labels; this deliberately over-drops short strings rather than
/// forwarding chrome.
pub fn filter_candidates(texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| t.chars().count() >= MIN_TEXT_LEN)
        .filter(|t| {
            if t.chars().count() >= SHORT_TEXT_LIMIT {
                return true;
            }
            let lower = t.to_lowercase();
            !CHROME_DENYLIST.iter().any(|phrase| lower.contains(phrase))
        })
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn short_strings_are_dropped() {
        let texts = strings(&["Online", "Hi", "ok", ""]);
        assert!(filter_candidates(&texts).is_empty());
    }

    #[test]
    fn chrome_labels_are_dropped() {
        let texts = strings(&["typing\u{2026} now", "Delivered 10:32", "Reply to message"]);
        assert!(filter_candidates(&texts).is_empty());
    }

    #[test]
    fn genuine_message_text_survives() {
        let texts = strings(&["Your OTP is 483920, do not share"]);
        let kept = filter_candidates(&texts);
        assert_eq!(kept, vec!["Your OTP is 483920, do not share"]);
    }

    #[test]
    fn long_text_survives_even_with_chrome_words() {
        // 30+ chars: "seen" inside genuine text must not trigger the denylist.
        let texts = strings(&["I have seen that offer before, it is a scam"]);
        assert_eq!(filter_candidates(&texts).len(), 1);
    }

    #[test]
    fn denylist_match_is_case_insensitive() {
        let texts = strings(&["LAST SEEN TODAY", "Video Call ended"]);
        assert!(filter_candidates(&texts).is_empty());
    }

    #[test]
    fn mixed_batch_keeps_only_candidates() {
        let texts = strings(&[
            "Online",
            "mute",
            "You have won a lottery, claim at http://scam.example",
            "Forwarded",
            "Call me back on this number please",
        ]);
        let kept = filter_candidates(&texts);
        assert_eq!(kept.len(), 2);
    }
}
