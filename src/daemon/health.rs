//! Liveness probe against a running daemon

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::time::Instant;

/// Timeout of a single `/api/health` probe
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between probes in `wait_for_daemon`
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn probe_client() -> Option<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HEALTH_PROBE_TIMEOUT)
        .build()
        .ok()
}

/// True when `<daemon_url>/api/health` answers 2xx within the probe timeout.
pub async fn is_daemon_healthy(daemon_url: &str) -> bool {
    let Some(client) = probe_client() else {
        return false;
    };
    let url = format!("{}/api/health", daemon_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            tracing::trace!(url = %url, error = %e, "Health probe failed");
            false
        }
    }
}

/// Poll the health endpoint until it answers or `timeout` elapses.
pub async fn wait_for_daemon(daemon_url: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if is_daemon_healthy(daemon_url).await {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    bail!(
        "timeout waiting for daemon to be ready after {}",
        format_duration(timeout)
    )
}

/// `2s`, `1m30s`, `750ms`
fn format_duration(d: Duration) -> String {
    let millis = d.subsec_millis();
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", millis);
    }
    let (minutes, secs) = (secs / 60, secs % 60);
    let mut out = String::new();
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if millis > 0 {
        out.push_str(&format!("{}.{:03}s", secs, millis));
    } else if secs > 0 || minutes == 0 {
        out.push_str(&format!("{}s", secs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(2)), "2s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration(Duration::from_millis(750)), "750ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
    }

    #[tokio::test]
    async fn test_healthy_daemon() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
            .mount(&server)
            .await;

        assert!(is_daemon_healthy(&server.uri()).await);
        wait_for_daemon(&server.uri(), Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_any_success_status_is_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        assert!(is_daemon_healthy(&server.uri()).await);
    }

    #[tokio::test]
    async fn test_unhealthy_status_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(!is_daemon_healthy(&server.uri()).await);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_daemon() {
        // Bind and drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}", port);
        let err = wait_for_daemon(&url, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "timeout waiting for daemon to be ready after 2s"
        );
    }
}
