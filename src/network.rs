//! Worker-side HTTP client: page loads with redirect observation, cheap
//! existence probes, and telemetry pushes to the hub.

use std::time::Duration;

use reqwest::Client;

const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024;
const USER_AGENT: &str = concat!("metacrawl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// Buffered page load. `final_url` is the URL after redirects.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

/// Lightweight existence check result.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: u16,
    pub final_url: String,
}

impl ProbeOutcome {
    pub fn reachable(&self) -> bool {
        self.status >= 200 && self.status < 400
    }
}

impl HttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            // Follow redirects; the final URL is read off the response.
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::ClientBuildError(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetch a page, buffering the body up to the content cap.
    pub async fn fetch_page(&self, url: &str) -> Result<PageResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        if let Some(length) = response.content_length() {
            if length as usize > MAX_CONTENT_SIZE {
                return Err(FetchError::ContentTooLarge(length as usize, MAX_CONTENT_SIZE));
            }
        }

        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::BodyError(e.to_string()))?;
        if body.len() > MAX_CONTENT_SIZE {
            return Err(FetchError::ContentTooLarge(body.len(), MAX_CONTENT_SIZE));
        }

        Ok(PageResponse {
            final_url,
            status,
            body,
        })
    }

    /// HEAD probe with GET fallback, used to tell "unreachable" from "loaded
    /// but empty" and to drive the existence fast path.
    pub async fn probe(&self, url: &str) -> Result<ProbeOutcome, FetchError> {
        match self.client.head(url).send().await {
            Ok(response) if response.status().as_u16() != 405 => Ok(ProbeOutcome {
                status: response.status().as_u16(),
                final_url: response.url().to_string(),
            }),
            // Servers that refuse HEAD get one GET.
            _ => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(FetchError::from_reqwest_error)?;
                Ok(ProbeOutcome {
                    status: response.status().as_u16(),
                    final_url: response.url().to_string(),
                })
            }
        }
    }

    /// Push a telemetry update to the hub. Failures are logged and dropped;
    /// telemetry is never load-bearing for the crawl.
    pub async fn push_update(&self, port: u16, update: &crate::telemetry::HubUpdate) {
        if port == 0 {
            return;
        }
        let endpoint = format!("http://127.0.0.1:{}/update", port);
        if let Err(e) = self.client.post(&endpoint).json(update).send().await {
            tracing::debug!(error = %e, "telemetry push failed");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    DnsError,

    #[error("SSL/TLS error")]
    SslError,

    #[error("request timeout")]
    Timeout,

    #[error("failed to read response body: {0}")]
    BodyError(String),

    #[error("content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("failed to build HTTP client: {0}")]
    ClientBuildError(String),
}

impl FetchError {
    pub fn from_reqwest_error(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let message = error.to_string().to_lowercase();
        if error.is_connect() {
            if message.contains("connection refused") {
                return FetchError::ConnectionRefused;
            }
            if message.contains("dns")
                || message.contains("name resolution")
                || message.contains("no such host")
            {
                return FetchError::DnsError;
            }
        }
        if message.contains("certificate") || message.contains("ssl") || message.contains("tls") {
            return FetchError::SslError;
        }

        FetchError::NetworkError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        assert!(HttpClient::new(10).is_ok());
    }

    #[test]
    fn test_probe_reachability_window() {
        let ok = ProbeOutcome {
            status: 301,
            final_url: String::new(),
        };
        assert!(ok.reachable());
        let not_found = ProbeOutcome {
            status: 404,
            final_url: String::new(),
        };
        assert!(!not_found.reachable());
    }
}
