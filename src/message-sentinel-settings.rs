// src/message-sentinel-settings.rs
//! Binary entry point for the permission and keep-alive settings flows.

use message_sentinel::bus;
use message_sentinel::lifecycle;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("status");

    eprintln!("=== Message Sentinel Settings ===");

    match command {
        "status" => {
            let relay = relay_daemon_available().await;
            eprintln!("Notification relay daemon on bus: {}", relay);
            if !relay {
                eprintln!("Run `message-sentinel-settings grant` to open the access settings");
            }
        }
        "grant" => {
            lifecycle::open_listener_settings().await;
        }
        "autostart" => {
            lifecycle::open_autostart_settings().await;
        }
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Usage: message-sentinel-settings [status|grant|autostart]");
        }
    }

    bus::cleanup().await;
}

/// Whether the device-sync daemon that relays phone notifications
/// currently owns its bus name.
async fn relay_daemon_available() -> bool {
    let Ok(conn) = bus::get_connection().await else {
        return false;
    };

    let result = conn
        .call_method(
            Some("org.freedesktop.DBus"),
            "/org/freedesktop/DBus",
            Some("org.freedesktop.DBus"),
            "NameHasOwner",
            &("org.kde.kdeconnect",),
        )
        .await;

    match result {
        Ok(reply) => reply.body().deserialize::<bool>().unwrap_or(false),
        Err(_) => false,
    }
}
