//! reqwest-backed transport.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::Client;

use super::{BoxFuture, ByteRange, HttpResponse, HttpTransport, ResponseHead};
use crate::config::TransportConfig;
use crate::error::{DownloadError, DownloadResult};

/// HTTP transport over a pooled reqwest client.
///
/// Build it once and share it as `Arc<dyn HttpTransport>`; every session of a
/// downloader reuses the same connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport from configuration.
    pub fn new(config: &TransportConfig) -> DownloadResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .user_agent(config.user_agent.clone());

        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            timeout: config.request_timeout.unwrap_or(config.read_timeout),
        })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl HttpTransport for ReqwestTransport {
    fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<ResponseHead>> {
        Box::pin(async move {
            let response = self
                .client
                .head(url)
                .send()
                .await
                .map_err(|e| map_reqwest_error(url, e, self.timeout))?;

            Ok(ResponseHead::new(
                response.status(),
                response.headers().clone(),
            ))
        })
    }

    fn get<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
    ) -> BoxFuture<'a, DownloadResult<HttpResponse>> {
        Box::pin(async move {
            let mut request = self.client.get(url);
            if let Some(range) = range {
                request = request.header(RANGE, range.header_value());
            }

            let response = request
                .send()
                .await
                .map_err(|e| map_reqwest_error(url, e, self.timeout))?;

            let head = ResponseHead::new(response.status(), response.headers().clone());
            let owned_url = url.to_string();
            let timeout = self.timeout;
            let body = response
                .bytes_stream()
                .map(move |chunk| chunk.map_err(|e| map_reqwest_error(&owned_url, e, timeout)));

            Ok(HttpResponse {
                head,
                body: Box::pin(body),
            })
        })
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error, timeout: Duration) -> DownloadError {
    if err.is_timeout() {
        DownloadError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        DownloadError::network(url, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reqwest_transport_from_default_config() {
        let transport = ReqwestTransport::new(&TransportConfig::default()).unwrap();
        assert_eq!(transport.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_request_timeout_takes_precedence() {
        let config = TransportConfig::default().with_request_timeout(Duration::from_secs(600));
        let transport = ReqwestTransport::new(&config).unwrap();
        assert_eq!(transport.timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let transport = ReqwestTransport::new(
            &TransportConfig::default().with_connect_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        // Port 9 (discard) is essentially never listening on loopback.
        let err = transport.head("http://127.0.0.1:9/file").await.unwrap_err();
        assert!(err.is_network());
    }
}
