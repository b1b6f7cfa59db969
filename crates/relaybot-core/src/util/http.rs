use reqwest::Client;
use std::time::Duration;

/// Build the shared outbound HTTP client.
///
/// One client is created at startup and handed to every service object so
/// connections are pooled across requests.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(concat!("relaybot/", env!("CARGO_PKG_VERSION")))
        .build()
}
