//! Anonymous usage telemetry (spec.md §9 design note, resolved in
//! SPEC_FULL.md §6): a single fire-and-forget POST, never awaited by the
//! caller, suppressed entirely by `disable_collection`.
//!
//! Grounded on `examples/original_source/target_postgres/target_tools.py`'s
//! `_send_usage_stats`/`_async_send_usage_stats`: same payload shape (event
//! name, category, action, label), same "log and swallow" failure handling,
//! same trigger point (once, at startup, unless collection is disabled) —
//! ported from a background `threading.Thread` to `tokio::spawn`.

use serde::Serialize;

const DEFAULT_ENDPOINT: &str = "https://collector.singer.io/i";

#[derive(Debug, Serialize)]
struct UsagePing<'a> {
    e: &'a str,
    aid: &'a str,
    se_ca: &'a str,
    se_ac: &'a str,
    se_la: &'a str,
}

/// Spawns the usage ping in the background and returns immediately; the
/// spawned task's outcome is never observed by the caller, matching the
/// design note's preferred resolution.
pub fn send_usage_stats_fire_and_forget(endpoint: Option<String>) {
    tokio::spawn(async move {
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if let Err(error) = send(&endpoint).await {
            tracing::debug!(%error, "usage telemetry request failed");
        }
    });
}

async fn send(endpoint: &str) -> Result<(), reqwest::Error> {
    let ping = UsagePing {
        e: "se",
        aid: "singer",
        se_ca: "sdc-loader",
        se_ac: "open",
        se_la: env!("CARGO_PKG_VERSION"),
    };
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?
        .get(endpoint)
        .query(&ping)
        .send()
        .await?;
    Ok(())
}
