//! HTTP client pool for maintaining persistent connections per base URL.
//!
//! Every backend talks to a single provider endpoint for the life of the process, often
//! from many concurrent runs. Sharing one `reqwest::Client` per base URL means connections,
//! DNS lookups and TLS sessions are reused across turns instead of being rebuilt for each
//! call.

use dashmap::DashMap;
use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    /// Global cache of HTTP clients indexed by base URL.
    static ref CLIENT_POOL: DashMap<String, reqwest::Client> = DashMap::new();
}

/// Creates or retrieves a shared HTTP client for the given base URL.
///
/// The client keeps up to 10 idle connections per host for 90 seconds, sends TCP keepalive
/// probes every 60 seconds and gives up connecting after 30 seconds. There is no overall
/// request timeout because streamed turns can legitimately run for minutes.
pub fn get_http_client(base_url: &str) -> reqwest::Client {
    CLIENT_POOL
        .entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

fn create_pooled_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|err| {
            log::warn!(
                "http_pool::create_pooled_client: falling back to default client: {}",
                err
            );
            reqwest::Client::new()
        })
}
