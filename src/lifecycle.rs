// src/lifecycle.rs
//! Keeps the capture listener alive: resident indicator, settings escape
//! hatches, and the forced rebind path for silent bus detachment.

use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bus;
use crate::models::ServiceState;
use crate::notifications::CaptureHandle;

const FDO_NOTIFICATIONS_SERVICE: &str = "org.freedesktop.Notifications";
const FDO_NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
const INDICATOR_APP_NAME: &str = "Message Sentinel";
const INDICATOR_SUMMARY: &str = "Message protection active";
const INDICATOR_BODY: &str = "Incoming messages are being screened for scams";

/// How long `Starting` may last before a rebind is attempted.
pub const CONNECT_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(30);

/// Notification-access grant surfaces, tried in priority order.
const LISTENER_SETTINGS_CANDIDATES: &[(&str, &[&str])] = &[
    ("kcmshell6", &["kcm_kdeconnect"]),
    ("kcmshell5", &["kcm_kdeconnect"]),
    ("kdeconnect-settings", &[]),
    ("systemsettings", &["kcm_notifications"]),
];

/// Desktop-environment autostart/background allow-list surfaces.
const AUTOSTART_SETTINGS_CANDIDATES: &[(&str, &[&str])] = &[
    ("kcmshell6", &["kcm_autostart"]),
    ("kcmshell5", &["kcm_autostart"]),
    ("gnome-control-center", &["applications"]),
    ("xfce4-session-settings", &[]),
];

/// Generic settings screen, always attempted when no candidate resolves.
const SETTINGS_FALLBACK: (&str, &[&str]) = ("systemsettings", &[]);

/// Supervises the capture listener's connection state.
///
/// State transitions are driven by the bus callbacks the dispatcher
/// relays; the manager itself only reads state and issues rebinds.
pub struct LifecycleManager {
    state: Arc<Mutex<ServiceState>>,
    capture: CaptureHandle,
}

impl LifecycleManager {
    pub fn new(capture: CaptureHandle) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServiceState::Stopped)),
            capture,
        }
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.lock().await
    }

    /// True while the capture mechanism is bound to the bus.
    pub async fn is_listener_enabled(&self) -> bool {
        matches!(self.state().await, ServiceState::Connected)
    }

    /// Marks the service as starting; callers arm the connect watchdog.
    pub async fn on_starting(&self) {
        *self.state.lock().await = ServiceState::Starting;
    }

    pub async fn on_listener_connected(&self) {
        let mut state = self.state.lock().await;
        eprintln!("✓ Capture listener connected");
        *state = ServiceState::Connected;
    }

    pub async fn on_listener_disconnected(&self) {
        let mut state = self.state.lock().await;
        if *state != ServiceState::Stopped {
            eprintln!("✗ Capture listener disconnected");
            *state = ServiceState::Disconnected;
        }
    }

    pub async fn on_stopped(&self) {
        *self.state.lock().await = ServiceState::Stopped;
    }

    /// Tears down and recreates the bus subscription. The transition back
    /// to `Connected` is driven by the listener's own connect callback,
    /// not assumed here.
    pub async fn force_rebind(&self) {
        eprintln!("=== Forcing Listener Rebind ===");
        self.capture.rebind().await;
    }
}

/// If the listener is still `Starting` when the timeout expires, one
/// forced rebind is attempted rather than waiting forever on the bus.
pub fn spawn_connect_watchdog(manager: Arc<LifecycleManager>, timeout: tokio::time::Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if manager.state().await == ServiceState::Starting {
            eprintln!("✗ Listener never connected, attempting rebind");
            manager.force_rebind().await;
        }
    });
}

/// Posts the resident low-urgency indicator that keeps the session aware
/// the daemon is alive. Failure degrades (no indicator) but never stops
/// capture; the caller only logs.
pub async fn show_protection_indicator() -> Result<u32, Box<dyn StdError + Send + Sync>> {
    use std::collections::HashMap;

    let conn = bus::get_connection().await?;

    let mut hints: HashMap<&str, zbus::zvariant::Value> = HashMap::new();
    hints.insert("urgency", zbus::zvariant::Value::U8(0));
    hints.insert("resident", zbus::zvariant::Value::Bool(true));

    let actions: Vec<&str> = vec![];
    let expire_timeout: i32 = 0; // Never auto-expire

    let reply = conn
        .call_method(
            Some(FDO_NOTIFICATIONS_SERVICE),
            FDO_NOTIFICATIONS_PATH,
            Some(FDO_NOTIFICATIONS_SERVICE),
            "Notify",
            &(
                INDICATOR_APP_NAME,
                0u32,
                "security-high",
                INDICATOR_SUMMARY,
                INDICATOR_BODY,
                actions,
                hints,
                expire_timeout,
            ),
        )
        .await?;

    let id: u32 = reply.body().deserialize()?;
    eprintln!("✓ Protection indicator posted (id {})", id);
    Ok(id)
}

/// Opens the notification-access grant surface for the first-run flow.
pub async fn open_listener_settings() {
    eprintln!("=== Opening Listener Settings ===");
    launch_first_available(LISTENER_SETTINGS_CANDIDATES).await;
}

/// Opens the background/autostart allow-list surface.
pub async fn open_autostart_settings() {
    eprintln!("=== Opening Autostart Settings ===");
    launch_first_available(AUTOSTART_SETTINGS_CANDIDATES).await;
}

/// Tries each candidate in order; failures are swallowed and the next
/// candidate tried. The generic fallback is always attempted last.
async fn launch_first_available(candidates: &[(&str, &[&str])]) {
    for (command, args) in candidates {
        match tokio::process::Command::new(command).args(*args).spawn() {
            Ok(_) => {
                eprintln!("✓ Launched {} {}", command, args.join(" "));
                return;
            }
            Err(e) => {
                eprintln!("✗ {} not available: {}", command, e);
            }
        }
    }

    let (command, args) = SETTINGS_FALLBACK;
    match tokio::process::Command::new(command).args(args).spawn() {
        Ok(_) => eprintln!("✓ Launched fallback {}", command),
        Err(e) => eprintln!("✗ Fallback {} failed: {}", command, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn manager_with_channel() -> (Arc<LifecycleManager>, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(4);
        let manager = Arc::new(LifecycleManager::new(CaptureHandle::from_channel(tx)));
        (manager, rx)
    }

    #[tokio::test]
    async fn starts_stopped() {
        let (manager, _rx) = manager_with_channel();
        assert_eq!(manager.state().await, ServiceState::Stopped);
        assert!(!manager.is_listener_enabled().await);
    }

    #[tokio::test]
    async fn connect_callback_drives_state() {
        let (manager, _rx) = manager_with_channel();
        manager.on_starting().await;
        assert_eq!(manager.state().await, ServiceState::Starting);

        manager.on_listener_connected().await;
        assert_eq!(manager.state().await, ServiceState::Connected);
        assert!(manager.is_listener_enabled().await);

        manager.on_listener_disconnected().await;
        assert_eq!(manager.state().await, ServiceState::Disconnected);
    }

    #[tokio::test]
    async fn rebind_recovers_connectivity_without_restart() {
        let (manager, mut rx) = manager_with_channel();
        manager.on_starting().await;
        manager.on_listener_connected().await;
        manager.on_listener_disconnected().await;

        // A fake listener: on a rebind command it re-subscribes and the
        // connect callback fires again.
        let listener_manager = Arc::clone(&manager);
        let listener = tokio::spawn(async move {
            if rx.recv().await.is_some() {
                listener_manager.on_listener_connected().await;
            }
        });

        manager.force_rebind().await;
        listener.await.unwrap();

        assert_eq!(manager.state().await, ServiceState::Connected);
    }

    #[tokio::test]
    async fn watchdog_rebinds_when_stuck_in_starting() {
        let (manager, mut rx) = manager_with_channel();
        manager.on_starting().await;
        spawn_connect_watchdog(Arc::clone(&manager), tokio::time::Duration::from_millis(10));

        // The rebind command arrives without any connect callback.
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn watchdog_is_quiet_once_connected() {
        let (manager, mut rx) = manager_with_channel();
        manager.on_starting().await;
        spawn_connect_watchdog(Arc::clone(&manager), tokio::time::Duration::from_millis(10));
        manager.on_listener_connected().await;

        tokio::time::sleep(tokio::time::Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_after_stop_stays_stopped() {
        let (manager, _rx) = manager_with_channel();
        manager.on_stopped().await;
        manager.on_listener_disconnected().await;
        assert_eq!(manager.state().await, ServiceState::Stopped);
    }
}
