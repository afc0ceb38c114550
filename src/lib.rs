//! Async client for Phoenix-Channels-style realtime servers.
//!
//! One websocket connection multiplexes any number of topic channels.
//! Each channel runs its own join/leave state machine, correlates
//! acknowledged pushes with server replies, synchronizes presence and
//! delivers typed database-change payloads, while the client handles
//! heartbeats, reconnection with backoff and live access-token refresh.
//!
//! # Example
//!
//! ```no_run
//! use realtime_channels::{
//!     PostgresChangeEvent, PostgresChangesFilter, RealtimeChannelOptions, RealtimeClient,
//!     RealtimeClientOptions,
//! };
//!
//! # async fn run() -> realtime_channels::Result<()> {
//! let options = RealtimeClientOptions {
//!     params: vec![("apikey".to_string(), "anon-key".to_string())],
//!     ..Default::default()
//! };
//! let client = RealtimeClient::new("wss://example.com/realtime/v1", options)?;
//!
//! let channel = client
//!     .channel("room:lobby", RealtimeChannelOptions::default())
//!     .await;
//! channel.on_postgres_changes(
//!     &PostgresChangesFilter::new(PostgresChangeEvent::Insert, "public").table("messages"),
//!     |change| println!("new row: {:?}", change.new),
//! );
//! channel.subscribe(|status, _err| println!("subscription: {status}"), None)?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod infrastructure;
pub mod messaging;
pub mod types;
pub mod websocket;

pub use channel::{
    ChannelStatus, PostgresChangeEvent, PostgresChangePayload, PostgresChangesFilter,
    PresenceState, RealtimeChannel, RealtimeChannelOptions, SubscribeStatus,
};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientOptions};
pub use messaging::{ChannelEvent, SystemEvent};
pub use types::{RealtimeError, RealtimeMessage, Result};
