//! Fetch stage: retrieve page content over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pipeline::{BoxError, Context, Processed, Processor};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use crate::link_extractor::EXCLUSION_REGEX;
use crate::payload::CrawlPayload;
use crate::privnet::PrivateNetworkDetector;

/// Minimal view of an HTTP response, as the fetch stage consumes it.
#[derive(Debug, Clone)]
pub struct UrlResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Retrieves the content behind a URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlGetter: Send + Sync {
    async fn get(&self, url: &str) -> Result<UrlResponse, BoxError>;
}

/// [`UrlGetter`] backed by a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpGetter {
    client: reqwest::Client,
}

impl HttpGetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UrlGetter for HttpGetter {
    async fn get(&self, url: &str) -> Result<UrlResponse, BoxError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?;
        Ok(UrlResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Pipeline stage that downloads each payload's URL into its raw-content
/// buffer.
///
/// Pages that cannot or should not be crawled are filtered rather than
/// failed: URLs with known non-HTML extensions, private-network hosts,
/// transport errors, non-2xx statuses and non-HTML content types all drop
/// the payload silently so the rest of the batch keeps flowing.
pub struct LinkFetcher {
    getter: Arc<dyn UrlGetter>,
    detector: Arc<dyn PrivateNetworkDetector>,
}

impl LinkFetcher {
    pub fn new(getter: Arc<dyn UrlGetter>, detector: Arc<dyn PrivateNetworkDetector>) -> Self {
        Self { getter, detector }
    }

    async fn is_private(&self, url: &str) -> Result<bool, BoxError> {
        let parsed = Url::parse(url)?;
        let host = parsed.host_str().ok_or("url has no host")?.to_owned();
        self.detector.is_private(&host).await
    }
}

#[async_trait]
impl Processor<CrawlPayload> for LinkFetcher {
    async fn process(
        &self,
        _ctx: &Context,
        mut payload: CrawlPayload,
    ) -> Result<Processed<CrawlPayload>, BoxError> {
        // Skip URLs that point to files that cannot contain HTML content.
        if EXCLUSION_REGEX.is_match(&payload.url) {
            return Ok(Processed::Discard(payload));
        }

        match self.is_private(&payload.url).await {
            Ok(false) => {}
            _ => return Ok(Processed::Discard(payload)),
        }

        let response = match self.getter.get(&payload.url).await {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %payload.url, error = %err, "fetch failed, skipping");
                return Ok(Processed::Discard(payload));
            }
        };

        payload.raw_content.extend_from_slice(&response.body);

        if !response.status.is_success() {
            debug!(url = %payload.url, status = %response.status, "non-success status, skipping");
            return Ok(Processed::Discard(payload));
        }

        match response.content_type {
            Some(ref content_type) if content_type.contains("html") => {}
            other => {
                warn!(url = %payload.url, content_type = ?other, "response is not HTML, skipping");
                return Ok(Processed::Discard(payload));
            }
        }

        Ok(Processed::Forward(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload;
    use crate::privnet::MockPrivateNetworkDetector;
    use pipeline::Payload;

    fn payload_for(url: &str) -> CrawlPayload {
        let mut payload = payload::acquire();
        payload.url.push_str(url);
        payload
    }

    fn html_response(body: &str) -> UrlResponse {
        UrlResponse {
            status: StatusCode::OK,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: Bytes::copy_from_slice(body.as_bytes()),
        }
    }

    fn public_detector() -> MockPrivateNetworkDetector {
        let mut detector = MockPrivateNetworkDetector::new();
        detector.expect_is_private().returning(|_| Ok(false));
        detector
    }

    async fn run(
        getter: MockUrlGetter,
        detector: MockPrivateNetworkDetector,
        payload: CrawlPayload,
    ) -> Processed<CrawlPayload> {
        let fetcher = LinkFetcher::new(Arc::new(getter), Arc::new(detector));
        fetcher
            .process(&Context::default(), payload)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn urls_with_binary_extensions_are_filtered_without_fetching() {
        let mut getter = MockUrlGetter::new();
        getter.expect_get().times(0);

        let result = run(
            getter,
            public_detector(),
            payload_for("https://example.com/logo.png"),
        )
        .await;
        assert!(matches!(result, Processed::Discard(_)));
    }

    #[tokio::test]
    async fn private_hosts_are_filtered_without_fetching() {
        let mut getter = MockUrlGetter::new();
        getter.expect_get().times(0);

        let mut detector = MockPrivateNetworkDetector::new();
        detector.expect_is_private().returning(|_| Ok(true));

        let result = run(getter, detector, payload_for("https://intranet.corp/")).await;
        assert!(matches!(result, Processed::Discard(_)));
    }

    #[tokio::test]
    async fn transport_errors_filter_instead_of_failing() {
        let mut getter = MockUrlGetter::new();
        getter
            .expect_get()
            .returning(|_| Err(BoxError::from("connection refused")));

        let result = run(
            getter,
            public_detector(),
            payload_for("https://example.com/"),
        )
        .await;
        assert!(matches!(result, Processed::Discard(_)));
    }

    #[tokio::test]
    async fn non_success_statuses_are_filtered() {
        let mut getter = MockUrlGetter::new();
        getter.expect_get().returning(|_| {
            Ok(UrlResponse {
                status: StatusCode::NOT_FOUND,
                content_type: Some("text/html".to_string()),
                body: Bytes::from_static(b"gone"),
            })
        });

        let result = run(
            getter,
            public_detector(),
            payload_for("https://example.com/missing"),
        )
        .await;
        assert!(matches!(result, Processed::Discard(_)));
    }

    #[tokio::test]
    async fn non_html_content_types_are_filtered() {
        let mut getter = MockUrlGetter::new();
        getter.expect_get().returning(|_| {
            Ok(UrlResponse {
                status: StatusCode::OK,
                content_type: Some("application/json".to_string()),
                body: Bytes::from_static(b"{}"),
            })
        });

        let result = run(
            getter,
            public_detector(),
            payload_for("https://example.com/api"),
        )
        .await;
        assert!(matches!(result, Processed::Discard(_)));
    }

    #[tokio::test]
    async fn html_pages_are_forwarded_with_their_body_captured() {
        let mut getter = MockUrlGetter::new();
        getter
            .expect_get()
            .returning(|_| Ok(html_response("<html><body>hi</body></html>")));

        let result = run(
            getter,
            public_detector(),
            payload_for("https://example.com/"),
        )
        .await;
        match result {
            Processed::Forward(payload) => {
                assert_eq!(payload.raw_content, b"<html><body>hi</body></html>");
                payload.mark_as_processed();
            }
            Processed::Discard(_) => panic!("expected the payload to be forwarded"),
        }
    }
}
