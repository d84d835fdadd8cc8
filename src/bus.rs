// src/bus.rs
//! Shared session-bus connection pool.

use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::Connection;

lazy_static::lazy_static! {
    static ref CONNECTION_POOL: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));
}

/// Get or create the shared session connection.
pub async fn get_connection() -> Result<Connection, Box<dyn std::error::Error + Send + Sync>> {
    let mut pool = CONNECTION_POOL.lock().await;

    if let Some(conn) = pool.as_ref() {
        return Ok(conn.clone());
    }

    let conn = Connection::session().await?;
    *pool = Some(conn.clone());
    Ok(conn)
}

/// Drop the pooled connection on shutdown.
pub async fn cleanup() {
    let mut pool = CONNECTION_POOL.lock().await;
    if let Some(conn) = pool.take() {
        drop(conn);
        eprintln!("Session bus connection pool closed");
    }
}
