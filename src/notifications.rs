// src/notifications.rs
use futures::StreamExt;
use std::collections::HashMap;
use std::error::Error as StdError;
use tokio::sync::mpsc;
use zbus::{Connection, MatchRule, MessageStream};

use crate::bus;
use crate::models::{IncomingEvent, RawNotification};

const KDECONNECT_SERVICE: &str = "org.kde.kdeconnect";
const NOTIFICATIONS_INTERFACE: &str = "org.kde.kdeconnect.device.notifications";
const NOTIFICATION_OBJECT_INTERFACE: &str = "org.kde.kdeconnect.device.notifications.notification";
const FDO_NOTIFICATIONS_INTERFACE: &str = "org.freedesktop.Notifications";

/// Bodies shorter than this are preview fragments, not messages.
pub const MIN_BODY_LEN: usize = 3;

/// Handle to a running capture listener. Dropping it does not stop the
/// listener; it only carries the forced-rebind control channel.
#[derive(Clone)]
pub struct CaptureHandle {
    rebind_tx: mpsc::Sender<()>,
}

impl CaptureHandle {
    /// Wraps an existing rebind channel; the listener side drains it.
    pub fn from_channel(rebind_tx: mpsc::Sender<()>) -> Self {
        Self { rebind_tx }
    }

    /// Tears the bus subscription down and recreates it. Used when the
    /// listener reports disconnected without a permission change.
    pub async fn rebind(&self) {
        if self.rebind_tx.send(()).await.is_err() {
            eprintln!("✗ Capture listener is gone, rebind ignored");
        }
    }
}

/// Starts the primary observer: phone notifications relayed by the sync
/// daemon, plus desktop messaging apps posting through the freedesktop
/// notification service. Parsed callbacks are funneled into `events`;
/// connect/disconnect transitions are reported on the same channel.
pub fn start_capture_listener(events: mpsc::UnboundedSender<IncomingEvent>) -> CaptureHandle {
    let (rebind_tx, mut rebind_rx) = mpsc::channel::<()>(4);

    tokio::spawn(async move {
        eprintln!("=== Starting Notification Capture ===");

        loop {
            let conn = match bus::get_connection().await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("✗ Session bus unavailable: {}", e);
                    let _ = events.send(IncomingEvent::ListenerDisconnected);
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let (mut relay_stream, mut fdo_stream) = match subscribe(&conn).await {
                Ok(streams) => streams,
                Err(e) => {
                    eprintln!("✗ Failed to subscribe to notification sources: {}", e);
                    let _ = events.send(IncomingEvent::ListenerDisconnected);
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            // Live events only from here on; there is no backlog to replay.
            let _ = events.send(IncomingEvent::ListenerConnected);

            loop {
                tokio::select! {
                    msg = relay_stream.next() => {
                        let Some(Ok(msg)) = msg else {
                            eprintln!("✗ Relay signal stream ended");
                            let _ = events.send(IncomingEvent::ListenerDisconnected);
                            break;
                        };
                        if let Some(raw) = parse_relay_signal(&conn, &msg).await {
                            let _ = events.send(IncomingEvent::NotificationPosted(raw));
                        }
                    }
                    msg = fdo_stream.next() => {
                        let Some(Ok(msg)) = msg else {
                            eprintln!("✗ Desktop notification stream ended");
                            let _ = events.send(IncomingEvent::ListenerDisconnected);
                            break;
                        };
                        if let Some(raw) = parse_notify_call(&msg) {
                            let _ = events.send(IncomingEvent::NotificationPosted(raw));
                        }
                    }
                    cmd = rebind_rx.recv() => {
                        if cmd.is_none() {
                            return;
                        }
                        eprintln!("=== Forced Rebind Requested ===");
                        let _ = events.send(IncomingEvent::ListenerDisconnected);
                        break;
                    }
                }
            }

            // Streams dropped here; the outer loop re-subscribes, which is
            // what the forced rebind relies on.
        }
    });

    CaptureHandle { rebind_tx }
}

async fn subscribe(
    conn: &Connection,
) -> Result<(MessageStream, MessageStream), Box<dyn StdError + Send + Sync>> {
    // Phone notifications relayed onto the session bus.
    let relay_rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .sender(KDECONNECT_SERVICE)?
        .interface(NOTIFICATIONS_INTERFACE)?
        .member("notificationPosted")?
        .build();
    let relay_stream = MessageStream::for_match_rule(relay_rule, conn, None).await?;

    // Desktop messaging apps posting through the notification service.
    let fdo_rule = MatchRule::builder()
        .msg_type(zbus::message::Type::MethodCall)
        .interface(FDO_NOTIFICATIONS_INTERFACE)?
        .member("Notify")?
        .build();
    let fdo_stream = MessageStream::for_match_rule(fdo_rule, conn, None).await?;

    eprintln!("✓ Notification subscriptions established");
    Ok((relay_stream, fdo_stream))
}

/// Resolves a relayed `notificationPosted` signal to the notification
/// object's properties. The signal only carries the public id; the
/// payload lives on a child object under the device path.
async fn parse_relay_signal(conn: &Connection, msg: &zbus::Message) -> Option<RawNotification> {
    let header = msg.header();
    let device_path = header.path().map(|p| p.as_str().to_string())?;

    let body = msg.body();
    let notification_id = body.deserialize::<String>().ok()?;

    let object_path = format!("{}/notifications/{}", device_path, notification_id);

    let source_id = get_notification_property(conn, &object_path, "appName")
        .await
        .unwrap_or_default();
    let sender = get_notification_property(conn, &object_path, "title")
        .await
        .unwrap_or_default();
    let text = get_notification_property(conn, &object_path, "text")
        .await
        .unwrap_or_default();
    let ticker = get_notification_property(conn, &object_path, "ticker")
        .await
        .unwrap_or_default();

    if source_id.is_empty() {
        return None;
    }

    Some(RawNotification {
        source_id,
        sender,
        text,
        ticker,
    })
}

/// Parses an eavesdropped `Notify` method call.
///
/// Signature (susssasa{sv}i): app_name, replaces_id, app_icon, summary,
/// body, actions, hints, expire_timeout. The desktop-entry hint is the
/// stable source identifier when present; app_name otherwise.
fn parse_notify_call(msg: &zbus::Message) -> Option<RawNotification> {
    let body = msg.body();
    let Ok((app_name, _replaces_id, _app_icon, summary, text, _actions, hints, _expire)) = body
        .deserialize::<(
            String,
            u32,
            String,
            String,
            String,
            Vec<String>,
            HashMap<String, zbus::zvariant::OwnedValue>,
            i32,
        )>()
    else {
        return None;
    };

    let source_id = hints
        .get("desktop-entry")
        .and_then(|v| v.downcast_ref::<String>().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(app_name);

    if source_id.is_empty() {
        return None;
    }

    Some(RawNotification {
        source_id,
        sender: summary,
        text,
        ticker: String::new(),
    })
}

async fn get_notification_property(
    conn: &Connection,
    path: &str,
    property: &str,
) -> Result<String, Box<dyn StdError + Send + Sync>> {
    let result = conn
        .call_method(
            Some(KDECONNECT_SERVICE),
            path,
            Some("org.freedesktop.DBus.Properties"),
            "Get",
            &(NOTIFICATION_OBJECT_INTERFACE, property),
        )
        .await?;

    let body = result.body();
    let value: zbus::zvariant::Value = body.deserialize()?;

    if let zbus::zvariant::Value::Str(s) = value {
        Ok(s.to_string())
    } else {
        Err("Not a string".into())
    }
}

/// Extracts (sender, body) from a parsed notification, or None when the
/// callback is not worth processing.
///
/// The ticker is the expanded text and wins when present; the short
/// preview is the fallback. A leading "sender: " echo in the ticker is
/// stripped so the body carries only message text.
pub fn extract_message(raw: &RawNotification) -> Option<(String, String)> {
    let sender = raw.sender.trim();
    if sender.is_empty() {
        return None;
    }

    let expanded = raw.ticker.trim();
    let body = if expanded.is_empty() {
        raw.text.trim().to_string()
    } else {
        let prefix = format!("{}: ", sender);
        expanded
            .strip_prefix(&prefix)
            .unwrap_or(expanded)
            .to_string()
    };

    if body.chars().count() < MIN_BODY_LEN {
        return None;
    }

    Some((sender.to_string(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(sender: &str, text: &str, ticker: &str) -> RawNotification {
        RawNotification {
            source_id: "com.whatsapp".to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            ticker: ticker.to_string(),
        }
    }

    #[test]
    fn extraction_prefers_expanded_ticker_text() {
        let n = raw("+15550001111", "New message", "+15550001111: OTP is 483920");
        let (sender, body) = extract_message(&n).unwrap();
        assert_eq!(sender, "+15550001111");
        assert_eq!(body, "OTP is 483920");
    }

    #[test]
    fn extraction_falls_back_to_short_text() {
        let n = raw("+15550001111", "OTP is 483920", "");
        let (_, body) = extract_message(&n).unwrap();
        assert_eq!(body, "OTP is 483920");
    }

    #[test]
    fn extraction_drops_missing_sender() {
        let n = raw("", "OTP is 483920", "");
        assert!(extract_message(&n).is_none());
        let n = raw("   ", "OTP is 483920", "");
        assert!(extract_message(&n).is_none());
    }

    #[test]
    fn extraction_drops_short_bodies() {
        let n = raw("+15550001111", "Hi", "");
        assert!(extract_message(&n).is_none());

        let n = raw("+15550001111", "Yes", "");
        assert!(extract_message(&n).is_some());
    }

    #[test]
    fn ticker_without_sender_prefix_is_kept_whole() {
        let n = raw("Bank Alerts", "", "Your account is locked, call now");
        let (_, body) = extract_message(&n).unwrap();
        assert_eq!(body, "Your account is locked, call now");
    }
}
