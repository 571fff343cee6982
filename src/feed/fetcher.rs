use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use url::Url;

/// Default upper bound on the upstream response body.
pub const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving the raw feed.
///
/// None of these are retried: a failed fetch fails the request that caused it.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the client timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body is not UTF-8 text
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    /// Local feed file could not be read
    #[error("Failed to read feed file: {0}")]
    Io(#[from] std::io::Error),
}

/// Somewhere the raw feed XML comes from.
///
/// The HTTP endpoint holds one of these behind an `Arc` and calls it once per
/// request; implementations must not cache between calls.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Returns the raw XML text of the feed.
    async fn fetch(&self) -> Result<String, FetchError>;

    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;
}

/// Fetches the feed with a plain GET to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url: Url,
    max_bytes: usize,
}

impl HttpFetcher {
    /// Builds a fetcher with its own client. `timeout` bounds the whole request.
    pub fn new(url: Url, timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, url, max_bytes))
    }

    /// Builds a fetcher around an existing client (allows custom configuration).
    pub fn with_client(client: reqwest::Client, url: Url, max_bytes: usize) -> Self {
        Self {
            client,
            url,
            max_bytes,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFetcher {
    async fn fetch(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, status = %status, "Upstream feed returned error status");
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.max_bytes).await?;
        tracing::debug!(url = %self.url, bytes = bytes.len(), "Fetched upstream feed");
        String::from_utf8(bytes).map_err(|_| FetchError::InvalidUtf8)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Reads the feed from a local file. Used by `inspect --file`.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for FileSource {
    async fn fetch(&self) -> Result<String, FetchError> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: A dropped connection can end the stream early without an error
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"><id>x</id><title>t</title><updated>u</updated></feed>"#;

    fn fetcher_for(server: &MockServer, max_bytes: usize) -> HttpFetcher {
        let url = Url::parse(&format!("{}/feed.xml", server.uri())).unwrap();
        HttpFetcher::new(url, Duration::from_secs(5), max_bytes).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_ATOM)
                    .insert_header("Content-Type", "application/atom+xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let body = fetcher_for(&mock_server, MAX_FEED_SIZE).fetch().await.unwrap();
        assert_eq!(body, VALID_ATOM);
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        match fetcher_for(&mock_server, MAX_FEED_SIZE).fetch().await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1) // Single request, no retry
            .mount(&mock_server)
            .await;

        match fetcher_for(&mock_server, MAX_FEED_SIZE).fetch().await {
            Err(FetchError::HttpStatus(503)) => {}
            other => panic!("Expected HttpStatus(503), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        match fetcher_for(&mock_server, 1024).fetch().await {
            Err(FetchError::ResponseTooLarge(1024)) => {}
            other => panic!("Expected ResponseTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_invalid_utf8() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xfe, 0xfd]))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            fetcher_for(&mock_server, MAX_FEED_SIZE).fetch().await,
            Err(FetchError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_ATOM)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/feed.xml", mock_server.uri())).unwrap();
        let fetcher = HttpFetcher::new(url, Duration::from_millis(50), MAX_FEED_SIZE).unwrap();
        assert!(matches!(fetcher.fetch().await, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Port 9 (discard) is not expected to accept connections on test hosts
        let url = Url::parse("http://127.0.0.1:9/feed.xml").unwrap();
        let fetcher = HttpFetcher::new(url, Duration::from_secs(2), MAX_FEED_SIZE).unwrap();
        assert!(fetcher.fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_file_source_reads_file() {
        let path = std::env::temp_dir().join("bulletin_relay_file_source_test.xml");
        std::fs::write(&path, VALID_ATOM).unwrap();

        let source = FileSource::new(&path);
        assert_eq!(source.fetch().await.unwrap(), VALID_ATOM);
        assert_eq!(source.describe(), path.display().to_string());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileSource::new("/tmp/bulletin_relay_missing_feed.xml");
        assert!(matches!(source.fetch().await, Err(FetchError::Io(_))));
    }
}
