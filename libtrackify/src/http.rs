use crate::types::ProbeConfig;
use reqwest::Client;
use std::time::Duration;

/// Builds the client shared by every worker of a run. Its connection pool
/// is safe for concurrent use.
pub fn create_http_pool(config: &ProbeConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.as_str())
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .use_rustls_tls()
        .build()
}
