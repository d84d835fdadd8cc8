// src/main.rs
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use message_sentinel::bridge::Bridge;
use message_sentinel::bus;
use message_sentinel::contacts::{ContactStore, VcardContactStore};
use message_sentinel::lifecycle::{self, LifecycleManager};
use message_sentinel::messages::{self, ControlCommand};
use message_sentinel::models::ServiceState;
use message_sentinel::notifications;
use message_sentinel::pipeline::TriagePipeline;
use message_sentinel::scrape::{self, ScrapeTarget};

/// How often the supervisor checks for a silently detached listener.
const SUPERVISION_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(60);

#[tokio::main]
async fn main() {
    setup_signal_handlers();

    eprintln!("=== Message Sentinel Daemon ===");

    // Contacts store; a missing HOME degrades every lookup to fail-open.
    let contacts: Arc<dyn ContactStore> = match VcardContactStore::from_home() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("✗ Contact store unavailable ({}), filtering degraded", e);
            Arc::new(VcardContactStore::new(
                "/nonexistent".into(),
                "/nonexistent".into(),
            ))
        }
    };

    // One channel carries every bus callback into the dispatcher.
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let capture = notifications::start_capture_listener(events_tx.clone());
    scrape::start_scrape_listener(ScrapeTarget::whatsapp(), events_tx);

    let manager = Arc::new(LifecycleManager::new(capture));
    manager.on_starting().await;
    lifecycle::spawn_connect_watchdog(Arc::clone(&manager), lifecycle::CONNECT_TIMEOUT);

    // Resident indicator; losing it is degraded operation, not fatal.
    if let Err(e) = lifecycle::show_protection_indicator().await {
        eprintln!("✗ Protection indicator unavailable: {}", e);
    }

    // Runtime commands relayed back over the bridge.
    let (control_tx, control_rx) = mpsc::channel::<ControlCommand>(16);
    tokio::spawn(messages::run_control_loop(Arc::clone(&manager), control_rx));

    // The application runtime's end of the bridge: one JSON line per
    // candidate event on stdout.
    let (bridge, runtime_rx) = Bridge::channel();
    tokio::spawn(async move {
        let mut events = ReceiverStream::new(runtime_rx);
        while let Some(event) = events.next().await {
            println!("{}", event.to_payload());
        }
    });

    spawn_supervisor(Arc::clone(&manager));

    // Report initial listener status once capture has had a moment to bind.
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        if control_tx
            .send(ControlCommand::IsListenerEnabled(reply_tx))
            .await
            .is_ok()
        {
            if let Ok(enabled) = reply_rx.await {
                eprintln!("Listener enabled: {}", enabled);
            }
        }
    });

    let pipeline = TriagePipeline::new(contacts, bridge, Arc::clone(&manager));
    pipeline.run(events_rx).await;

    manager.on_stopped().await;
    bus::cleanup().await;
}

/// Rebinds the listener when it reports disconnected without a
/// permission change, instead of waiting for the user to notice.
fn spawn_supervisor(manager: Arc<LifecycleManager>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SUPERVISION_INTERVAL);
        loop {
            ticker.tick().await;
            if manager.state().await == ServiceState::Disconnected {
                manager.force_rebind().await;
            }
        }
    });
}

fn setup_signal_handlers() {
    use std::sync::atomic::{AtomicBool, Ordering};

    static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

    ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            eprintln!("Force shutdown");
            std::process::exit(1);
        }

        eprintln!("Graceful shutdown requested...");
        cleanup_on_exit();
        std::process::exit(0);
    })
    .ok(); // Ignore error if already set
}

fn cleanup_on_exit() {
    let rt = tokio::runtime::Runtime::new();
    if let Ok(rt) = rt {
        rt.block_on(async {
            bus::cleanup().await;
        });
    }
}
