//! HTTP liveness probing.
//!
//! A probe is one bounded GET against the deployed application's own port;
//! the caller's retry policy decides how long to keep probing while the
//! container finishes starting.

use crate::error::BootstrapError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Liveness check seam; fakes substitute for the HTTP client in tests.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Succeeds on a 2xx response from `http://<addr>/<path>`.
    async fn probe(&self, addr: &str) -> Result<(), BootstrapError>;
}

/// Probe over a real HTTP client
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    /// Probe the root path (bootstrap verification).
    pub fn new() -> Result<Self, BootstrapError> {
        Self::with_path("")
    }

    /// Probe a sub-path (the load-test cluster variant).
    pub fn with_path(path: &str) -> Result<Self, BootstrapError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| BootstrapError::Probe(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            path: path.trim_start_matches('/').to_string(),
        })
    }

    fn url_for(&self, addr: &str) -> String {
        if self.path.is_empty() {
            format!("http://{addr}/")
        } else {
            format!("http://{addr}/{}", self.path)
        }
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, addr: &str) -> Result<(), BootstrapError> {
        let url = self.url_for(addr);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BootstrapError::Probe(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::Probe(format!(
                "{url} returned {status}"
            )));
        }

        let body = response.text().await.unwrap_or_default();
        debug!(url = %url, body = %body.trim_end(), "Liveness probe succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn url_formatting() {
        let root = HttpProbe::new().unwrap();
        assert_eq!(root.url_for("10.0.0.1"), "http://10.0.0.1/");

        let cluster = HttpProbe::with_path("/cluster1").unwrap();
        assert_eq!(cluster.url_for("lb.example.com"), "http://lb.example.com/cluster1");
    }

    #[tokio::test]
    async fn succeeds_on_2xx() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let body = "Instance number 1 is responding now!";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        let probe = HttpProbe::new().unwrap();
        assert!(probe.probe(&addr.to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn non_2xx_is_a_probe_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let probe = HttpProbe::new().unwrap();
        let err = probe.probe(&addr.to_string()).await.unwrap_err();
        assert!(err.is_probe());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn connection_refused_is_a_probe_failure() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new().unwrap();
        let err = probe.probe(&addr.to_string()).await.unwrap_err();
        assert!(err.is_probe());
    }
}
