//! A thin client for the platform's JSON API.
//!
//! All requests share one `reqwest::Client` that carries the browser headers and
//! the user's cookies; the stream CDN rejects transfers without the referer, so
//! the [`crate::fetcher::Fetcher`] borrows the same client.

use crate::error::ApiError;
use crate::model::{PlayInfo, QualityCatalog, VideoItem};
use response::{Envelope, PlayUrlData, ViewData};
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

pub mod response;

/// The production API host.
pub const API_BASE: &str = "https://api.bilibili.com";

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const REFERER_URL: &str = "https://www.bilibili.com";

/// `fnval` flags asking for DASH with HDR, 4K, Dolby, 8K and AV1 variants.
const FNVAL_ALL: u32 = 16 | 64 | 128 | 256 | 512 | 1024 | 2048;
/// `fnval` flag asking for the plain DASH manifest.
const FNVAL_DASH: u32 = 16;

/// Connection-level retry for metadata requests.
///
/// Only transient failures are retried: connection errors, timeouts, HTTP 5xx
/// and 429. Application-level error codes are returned as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each following one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Whether a transport error is worth another attempt.
pub fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request() || error.is_body()
}

/// Whether a status is worth another attempt.
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// The API client.
///
/// # Example
///
/// ```rust, no_run
/// # use bili_dl::client::BiliClient;
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = BiliClient::new("SESSDATA=...; DedeUserID=42", Duration::from_secs(30))?;
///
/// let item = client.video_info("BV1xx411c7mD").await?;
/// let catalog = client.qualities(&item.bvid, item.pages[0].cid).await?;
/// println!("{} offers {} qualities", item.title, catalog.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BiliClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl fmt::Debug for BiliClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiliClient")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BiliClient {
    /// Creates a client authenticated with the given cookie header.
    ///
    /// # Arguments
    ///
    /// * `cookies` - The raw `Cookie` header value copied from a browser.
    /// * `read_timeout` - How long a transfer may stall before it is aborted.
    ///
    /// # Errors
    ///
    /// This function will return an error if the cookies are not a valid header
    /// value, or if the TLS backend cannot be initialised.
    pub fn new(cookies: impl AsRef<str>, read_timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));
        headers.insert(REFERER, HeaderValue::from_static(REFERER_URL));
        if !cookies.as_ref().trim().is_empty() {
            let mut cookie = HeaderValue::from_str(cookies.as_ref().trim())?;
            cookie.set_sensitive(true);
            headers.insert(COOKIE, cookie);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(read_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: API_BASE.to_string(),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        })
    }

    /// Points the client at another API host.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.base_url = base_url.as_ref().trim_end_matches('/').to_string();
        self
    }

    /// Sets the total timeout of a single metadata request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connection-level retry policy of metadata requests.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying HTTP client, with the platform headers applied.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Fetches an endpoint and unwraps its `{code, message, data}` envelope.
    ///
    /// # Arguments
    ///
    /// * `path` - The endpoint path, e.g. `/x/web-interface/view`.
    /// * `query` - The query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Upstream`] when the envelope carries a non-zero code,
    /// and a transport or parse error once retries are exhausted.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        #[cfg(feature = "tracing")]
        tracing::debug!("Fetching JSON from {} with {:?}", url, query);

        let response = self.send_with_retry(&url, query).await?;
        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)?;

        if envelope.code != 0 {
            return Err(ApiError::Upstream {
                code: envelope.code,
                message: envelope.message,
            });
        }

        envelope
            .data
            .ok_or_else(|| ApiError::EmptyData(path.to_string()))
    }

    async fn send_with_retry(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ApiError> {
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .get(url)
                .query(query)
                .timeout(self.request_timeout)
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status()),
                Err(error) => is_retryable_error(error),
            };

            if retryable && attempt < self.retry.max_retries {
                let delay = self.retry.delay_for_attempt(attempt);

                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Request to {} failed (attempt {}), retrying in {:?}",
                    url,
                    attempt + 1,
                    delay
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Ok(result?.error_for_status()?);
        }
    }

    /// Looks up a video's title, uploader and pages.
    pub async fn video_info(&self, bvid: &str) -> Result<VideoItem, ApiError> {
        let view: ViewData = self
            .get_json("/x/web-interface/view", &[("bvid", bvid.to_string())])
            .await?;

        Ok(view.into())
    }

    /// Lists the quality tiers a page is offered in.
    pub async fn qualities(&self, bvid: &str, cid: i64) -> Result<QualityCatalog, ApiError> {
        let data: PlayUrlData = self
            .get_json(
                "/x/player/playurl",
                &[
                    ("bvid", bvid.to_string()),
                    ("cid", cid.to_string()),
                    ("fnval", FNVAL_DASH.to_string()),
                ],
            )
            .await?;

        Ok(data.catalog())
    }

    /// Fetches the richest stream manifest of a page at the given quality.
    pub async fn play_info(&self, bvid: &str, cid: i64, quality: u32) -> Result<PlayInfo, ApiError> {
        let data: PlayUrlData = self
            .get_json(
                "/x/player/playurl",
                &[
                    ("bvid", bvid.to_string()),
                    ("cid", cid.to_string()),
                    ("qn", quality.to_string()),
                    ("fnval", FNVAL_ALL.to_string()),
                    ("fourk", "1".to_string()),
                ],
            )
            .await?;

        Ok(data.into_play_info())
    }
}
