//! Page fetching: the seam between the crawler and the network.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::controls::CrawlControls;
use crate::frontier::CrawlTarget;
use crate::normalizer::FetchedPage;

const USER_AGENT: &str = concat!("groundcrawl/", env!("CARGO_PKG_VERSION"));

/// Why a single URL produced no page. Always a per-URL skip.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, redirect, or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The request exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Non-success HTTP status.
    #[error("http status {0}")]
    Status(u16),
    /// Neither HTML nor plain text.
    #[error("unsupported content type {0:?}")]
    ContentType(Option<String>),
    /// Declared or streamed body above the size ceiling.
    #[error("body exceeds {limit} bytes")]
    TooLarge {
        /// Configured ceiling.
        limit: u64,
    },
    /// The target is not a valid absolute URL.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// `fetch(url) → status, content type, body`, bounded by a timeout and size limit.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one target.
    async fn fetch(&self, target: &CrawlTarget) -> Result<FetchedPage, FetchError>;
}

/// Returns `true` for `text/html` and `text/plain` media types.
pub fn is_textual(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.contains("text/html") || ct.contains("text/plain"))
        .unwrap_or(false)
}

/// `reqwest`-backed fetcher used by real crawls.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    max_body_bytes: u64,
}

impl HttpFetcher {
    /// Builds a fetcher honoring the timeout and size ceiling in `controls`.
    pub fn new(controls: &CrawlControls) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(controls.fetch_timeout())
            .build()?;
        Ok(Self {
            client,
            timeout: controls.fetch_timeout(),
            max_body_bytes: controls.max_body_bytes(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, target: &CrawlTarget) -> Result<FetchedPage, FetchError> {
        let url = url::Url::parse(target.url())?;
        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Transport(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let headers = response.headers();
        let content_type = header_to_string(headers, CONTENT_TYPE).map(|ct| ct.to_lowercase());
        let declared_length = header_to_string(headers, CONTENT_LENGTH)
            .and_then(|len| len.parse::<u64>().ok())
            .unwrap_or(0);
        if declared_length > self.max_body_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_body_bytes,
            });
        }
        if !is_textual(content_type.as_deref()) {
            return Err(FetchError::ContentType(content_type));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| {
                if err.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Transport(err)
                }
            })?;
            if body.len() as u64 + chunk.len() as u64 > self.max_body_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedPage::new(
            target.url(),
            target.depth(),
            status.as_u16(),
            content_type,
            body,
        ))
    }
}

fn header_to_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
