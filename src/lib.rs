// src/lib.rs
//! Background message interception and triage: observes incoming
//! messages from monitored communication apps, filters trusted senders,
//! and forwards analysis candidates to the application runtime.

pub mod bridge;
pub mod bus;
pub mod contacts;
pub mod dedup;
pub mod lifecycle;
pub mod messages;
pub mod models;
pub mod notifications;
pub mod pipeline;
pub mod registry;
pub mod scrape;

pub use bridge::Bridge;
pub use models::{IncomingEvent, MessageEvent, Platform, ServiceState, SourceChannel};
pub use pipeline::TriagePipeline;
