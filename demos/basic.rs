//! Minimal broadcast round-trip: join a room, listen for cursor events
//! and send a few.
//!
//! ```sh
//! REALTIME_URL=ws://localhost:4000/socket REALTIME_KEY=anon cargo run --example basic
//! ```

use realtime_channels::{RealtimeChannelOptions, RealtimeClient, RealtimeClientOptions};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> realtime_channels::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("REALTIME_URL")
        .unwrap_or_else(|_| "ws://localhost:4000/socket".to_string());
    let apikey = std::env::var("REALTIME_KEY").unwrap_or_default();

    let options = RealtimeClientOptions {
        params: vec![("apikey".to_string(), apikey)],
        ..Default::default()
    };
    let client = RealtimeClient::new(url, options)?;

    let channel = client
        .channel(
            "room:lobby",
            RealtimeChannelOptions {
                broadcast_self: true,
                ..Default::default()
            },
        )
        .await;

    channel.on_broadcast("cursor", |payload| {
        println!("cursor: {payload}");
    });
    channel.subscribe(
        |status, err| println!("subscription: {status} {err:?}"),
        None,
    )?;

    for n in 0..5 {
        let status = channel
            .send_broadcast("cursor", json!({"x": n * 10, "y": n * 20}))
            .await?;
        println!("broadcast {n}: {status}");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    client.remove_channel(channel).await;
    Ok(())
}
