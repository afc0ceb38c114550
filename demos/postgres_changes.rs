//! Stream typed row changes from a Postgres table.
//!
//! ```sh
//! REALTIME_URL=wss://<project>.supabase.co/realtime/v1 REALTIME_KEY=<anon> \
//!     cargo run --example postgres_changes
//! ```

use realtime_channels::{
    PostgresChangeEvent, PostgresChangesFilter, RealtimeChannelOptions, RealtimeClient,
    RealtimeClientOptions,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> realtime_channels::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("REALTIME_URL")
        .unwrap_or_else(|_| "ws://localhost:4000/socket".to_string());
    let apikey = std::env::var("REALTIME_KEY").unwrap_or_default();

    let options = RealtimeClientOptions {
        params: vec![("apikey".to_string(), apikey.clone())],
        access_token: (!apikey.is_empty()).then(|| apikey),
        ..Default::default()
    };
    let client = RealtimeClient::new(url, options)?;

    let channel = client
        .channel("db-changes", RealtimeChannelOptions::default())
        .await;

    channel.on_postgres_changes(
        &PostgresChangesFilter::new(PostgresChangeEvent::All, "public").table("messages"),
        |change| {
            println!(
                "{} on {}.{}: new={:?} old={:?}",
                change.change_type, change.schema, change.table, change.new, change.old
            );
        },
    );
    channel.subscribe(
        |status, err| println!("subscription: {status} {err:?}"),
        None,
    )?;

    tokio::time::sleep(Duration::from_secs(60)).await;
    client.remove_all_channels().await;
    Ok(())
}
