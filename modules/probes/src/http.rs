//! Plain HTTP reachability and the shared HTTP client used by the RPC checker.

use crate::finish;
use anyhow::Result;
use reqwest::{redirect::Policy, Client, StatusCode};
use rpcdiag_core::{Layer, ProbeResult, RetryPolicy};
use std::time::{Duration, Instant};
use tracing::warn;

pub const DEFAULT_BASELINE_URL: &str = "https://httpbin.org/ip";

/// Build the client shared by every HTTP probe and JSON-RPC call in a run.
/// Per-request timeouts are set by the callers.
pub fn http_client(user_agent: &str) -> Result<Client> {
    let client = Client::builder()
        .redirect(Policy::limited(3))
        .user_agent(user_agent)
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()?;
    Ok(client)
}

/// GET `url`. Any HTTP response counts as reachable, whatever its status:
/// JSON-RPC servers commonly answer GET with 405.
pub async fn reach(client: &Client, url: &str, limit: Duration, retry: &RetryPolicy) -> ProbeResult {
    let started = Instant::now();
    let res = retry
        .run(|| get_status(client, url, limit), |r| match r {
            Ok(status) => status.is_server_error(),
            Err(e) => is_transient(e),
        })
        .await;
    let res = match res {
        Ok(status) => Ok(format!("HTTP {}", status)),
        Err(e) => Err(anyhow::Error::from(e)),
    };
    finish(url, Layer::Http, started, res)
}

/// Reachability of a well-known URL unrelated to any endpoint. A failure here points
/// at the local network rather than the endpoints.
pub async fn baseline(client: &Client, url: &str, limit: Duration, retry: &RetryPolicy) -> ProbeResult {
    let p = reach(client, url, limit, retry).await;
    if !p.is_ok() {
        warn!(url, detail = %p.detail, "baseline connectivity check failed");
    }
    p
}

async fn get_status(client: &Client, url: &str, limit: Duration) -> reqwest::Result<StatusCode> {
    let resp = client.get(url).timeout(limit).send().await?;
    Ok(resp.status())
}

/// Timeouts and connection failures are worth one more attempt; name resolution
/// and certificate failures are not.
pub fn is_transient(err: &reqwest::Error) -> bool {
    if !(err.is_timeout() || err.is_connect()) {
        return false;
    }
    let mut source: Option<&dyn std::error::Error> = Some(err);
    while let Some(e) = source {
        let msg = e.to_string().to_ascii_lowercase();
        if msg.contains("dns error") || msg.contains("certificate") {
            return false;
        }
        source = e.source();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        http_client("rpcdiag-test").unwrap()
    }

    #[tokio::test]
    async fn method_not_allowed_is_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(405)).mount(&server).await;
        let p = reach(&client(), &server.uri(), Duration::from_secs(2), &RetryPolicy::none()).await;
        assert!(p.is_ok(), "{}", p.detail);
        assert_eq!(p.detail, "HTTP 405 Method Not Allowed");
    }

    #[tokio::test]
    async fn server_errors_are_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).expect(2).mount(&server).await;
        let retry = RetryPolicy { retries: 1, base_delay: Duration::from_millis(5) };
        let p = reach(&client(), &server.uri(), Duration::from_secs(2), &retry).await;
        assert!(p.is_ok());
        assert!(p.detail.starts_with("HTTP 503"));
        server.verify().await;
    }

    #[tokio::test]
    async fn slow_server_is_cut_off_at_the_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let started = Instant::now();
        let p = reach(&client(), &server.uri(), Duration::from_millis(200), &RetryPolicy::none()).await;
        assert!(!p.is_ok());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let p = reach(&client(), &url, Duration::from_secs(2), &RetryPolicy::none()).await;
        assert!(!p.is_ok());
        assert_eq!(p.layer, Layer::Http);
        assert_eq!(p.target, url);
    }
}
