use crate::feed::decode::{decode_content, DecodeError};
use crate::feed::headers::{conditional_headers, etag_from_map, last_modified_from_map};
use crate::feed::model::{Feed, RawBody};
use crate::feed::registry::{classify_with, ParseError, SharedRegistry};
use crate::util::validate_url;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderName, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// User agent sent when the caller does not supply one.
pub const DEFAULT_USER_AGENT: &str = concat!("feedpull/", env!("CARGO_PKG_VERSION"));
/// Default maximum number of requests in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 30;
/// Status code reported for failures that never produced an HTTP response.
pub const CONNECTION_FAILED: u16 = 0;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const ACCEPTED_ENCODINGS: &str = "gzip, deflate";

/// Errors that can occur while fetching a single URL.
///
/// Every variant is scoped to one URL: in a batch it lands in that URL's
/// slot of the result map and never aborts sibling requests.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be parsed or uses an unsupported scheme
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Network-level error (DNS, connection, TLS, redirect loop, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a non-2xx, non-304 status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be decoded according to its Content-Encoding
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// No parser recognised the body, or the chosen parser rejected it
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// An update was requested for a feed that was never fetched from a URL
    #[error("Feed has no feed URL to update from")]
    MissingFeedUrl,
}

impl FetchError {
    /// HTTP status for this failure, or [`CONNECTION_FAILED`] when the
    /// request never got a response.
    pub fn status_code(&self) -> u16 {
        match self {
            FetchError::HttpStatus(code) => *code,
            FetchError::Network(e) => e.status().map_or(CONNECTION_FAILED, |s| s.as_u16()),
            _ => CONNECTION_FAILED,
        }
    }
}

/// HTTP Basic credentials. The password never shows up in `Debug` output.
pub struct HttpAuth {
    pub username: String,
    pub password: SecretString,
}

impl HttpAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// What a success callback gets to see for one URL.
#[derive(Debug, Clone, Copy)]
pub enum Fetched<'a> {
    Raw(&'a RawBody),
    Feed(&'a Feed),
}

/// Types a batch can produce per URL.
pub trait AsFetched {
    fn as_fetched(&self) -> Fetched<'_>;
}

impl AsFetched for RawBody {
    fn as_fetched(&self) -> Fetched<'_> {
        Fetched::Raw(self)
    }
}

impl AsFetched for Feed {
    fn as_fetched(&self) -> Fetched<'_> {
        Fetched::Feed(self)
    }
}

pub type SuccessCallback = Arc<dyn Fn(&str, Fetched<'_>) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(&str, &FetchError) + Send + Sync>;

/// Per-call fetch configuration. Every field has a default.
#[derive(Clone)]
pub struct FetchOptions {
    /// `User-Agent` header; [`DEFAULT_USER_AGENT`] when unset
    pub user_agent: Option<String>,
    /// Sent as `If-Modified-Since` unless the request carries its own stored value
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Sent as `If-None-Match` unless the request carries its own stored value
    pub if_none_match: Option<String>,
    pub http_auth: Option<Arc<HttpAuth>>,
    pub on_success: Option<SuccessCallback>,
    pub on_failure: Option<FailureCallback>,
    /// Request `gzip, deflate` transfer compression
    pub compress: bool,
    /// Maximum simultaneous requests, also the batch size
    pub max_concurrency: usize,
    /// Per-request timeout, covering connect, headers and body
    pub timeout: Duration,
    /// Upper bound on a response body, before and after decoding
    pub max_body_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            if_modified_since: None,
            if_none_match: None,
            http_auth: None,
            on_success: None,
            on_failure: None,
            compress: true,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: MAX_FEED_SIZE,
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("user_agent", &self.user_agent)
            .field("if_modified_since", &self.if_modified_since)
            .field("if_none_match", &self.if_none_match)
            .field("http_auth", &self.http_auth)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("compress", &self.compress)
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout", &self.timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl FetchOptions {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_if_modified_since(mut self, at: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(at);
        self
    }

    pub fn with_if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    pub fn with_http_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.http_auth = Some(Arc::new(HttpAuth::new(username, password)));
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&str, Fetched<'_>) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_failure(mut self, callback: impl Fn(&str, &FetchError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_max_concurrency(mut self, width: usize) -> Self {
        self.max_concurrency = width;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}

/// One URL to fetch, with the freshness values stored from its last fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            etag: None,
            last_modified: None,
        }
    }

    /// Re-fetch request for a previously fetched feed; `None` without a `feed_url`.
    pub fn for_feed(feed: &Feed) -> Option<Self> {
        Some(Self {
            url: feed.feed_url.clone()?,
            etag: feed.etag.clone(),
            last_modified: feed.last_modified,
        })
    }
}

/// Outcome of fetching one URL.
pub type FetchOutcome<T> = Result<T, FetchError>;

/// Splits `total` items into consecutive batches of at most `width`.
pub fn plan_batches(total: usize, width: usize) -> Vec<Range<usize>> {
    let width = width.max(1);
    (0..total)
        .step_by(width)
        .map(|start| start..(start + width).min(total))
        .collect()
}

/// Builds the shared HTTP client. Redirects are followed up to `max_redirects`.
///
/// Transfer compression is negotiated and decoded by [`Fetcher`] itself, so
/// the client is built without automatic decompression.
pub fn build_client(max_redirects: usize) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(max_redirects))
        .build()
}

/// Concurrent, batched feed retrieval over one shared HTTP client.
///
/// URLs are processed in consecutive batches of at most
/// `FetchOptions::max_concurrency`; requests inside a batch run concurrently
/// and the whole batch completes before the next one starts.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    registry: SharedRegistry,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, registry: SharedRegistry) -> Self {
        Self { client, registry }
    }

    /// Fetches one URL and returns its decoded body.
    pub async fn fetch_raw(&self, url: &str, options: &FetchOptions) -> FetchOutcome<RawBody> {
        let request = FetchRequest::new(url);
        let outcome = self.fetch_one(&request, options).await;
        notify(&request.url, &outcome, options);
        outcome
    }

    /// Fetches every URL, returning decoded bodies keyed by URL.
    pub async fn fetch_raw_all<I, S>(&self, urls: I, options: &FetchOptions) -> HashMap<String, FetchOutcome<RawBody>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = urls.into_iter().map(FetchRequest::new).collect();
        self.run_batches(requests, options, |_, body| Ok(body)).await
    }

    /// Fetches and parses one URL.
    pub async fn fetch_and_parse(&self, url: &str, options: &FetchOptions) -> FetchOutcome<Feed> {
        self.fetch_request(&FetchRequest::new(url), options).await
    }

    /// Fetches and parses one prepared request.
    pub async fn fetch_request(&self, request: &FetchRequest, options: &FetchOptions) -> FetchOutcome<Feed> {
        let outcome = match self.fetch_one(request, options).await {
            Ok(body) => self.parse_body(request, body),
            Err(e) => Err(e),
        };
        notify(&request.url, &outcome, options);
        outcome
    }

    /// Fetches and parses every URL, returning feeds keyed by URL.
    pub async fn fetch_and_parse_all<I, S>(&self, urls: I, options: &FetchOptions) -> HashMap<String, FetchOutcome<Feed>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = urls.into_iter().map(FetchRequest::new).collect();
        self.fetch_requests(requests, options).await
    }

    /// Fetches and parses prepared requests, each with its own stored freshness values.
    pub async fn fetch_requests(&self, requests: Vec<FetchRequest>, options: &FetchOptions) -> HashMap<String, FetchOutcome<Feed>> {
        self.run_batches(requests, options, |request, body| self.parse_body(request, body))
            .await
    }

    async fn run_batches<T, F>(
        &self,
        requests: Vec<FetchRequest>,
        options: &FetchOptions,
        finish: F,
    ) -> HashMap<String, FetchOutcome<T>>
    where
        T: AsFetched,
        F: Fn(&FetchRequest, RawBody) -> FetchOutcome<T>,
    {
        let requests = dedup_requests(requests);
        let width = options.max_concurrency.max(1);
        let batches = plan_batches(requests.len(), width);
        let mut outcomes = HashMap::with_capacity(requests.len());

        for (index, range) in batches.iter().enumerate() {
            let batch = &requests[range.clone()];
            tracing::debug!(
                batch = index + 1,
                batches = batches.len(),
                size = batch.len(),
                "Starting fetch batch"
            );

            let finish = &finish;
            let results: Vec<(String, FetchOutcome<T>)> = stream::iter(batch)
                .map(|request| async move {
                    let outcome = match self.fetch_one(request, options).await {
                        Ok(body) => finish(request, body),
                        Err(e) => Err(e),
                    };
                    notify(&request.url, &outcome, options);
                    (request.url.clone(), outcome)
                })
                .buffer_unordered(width)
                .collect()
                .await;

            outcomes.extend(results);
        }

        outcomes
    }

    async fn fetch_one(&self, request: &FetchRequest, options: &FetchOptions) -> FetchOutcome<RawBody> {
        tokio::time::timeout(options.timeout, self.transfer(request, options))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn transfer(&self, request: &FetchRequest, options: &FetchOptions) -> FetchOutcome<RawBody> {
        let url = validate_url(&request.url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let mut builder = self
            .client
            .get(url)
            .header(USER_AGENT, options.user_agent());
        if options.compress {
            builder = builder.header(ACCEPT_ENCODING, ACCEPTED_ENCODINGS);
        }

        // Stored per-feed values take precedence over call-wide options
        let etag = request.etag.as_deref().or(options.if_none_match.as_deref());
        let last_modified = request.last_modified.or(options.if_modified_since);
        builder = builder.headers(conditional_headers(etag, last_modified));

        if let Some(auth) = &options.http_auth {
            builder = builder.basic_auth(&auth.username, Some(auth.password.expose_secret()));
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers();
        let header_str = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let content_type = header_str(CONTENT_TYPE);
        let encoding = header_str(CONTENT_ENCODING);
        let response_etag = etag_from_map(headers);
        let response_last_modified = last_modified_from_map(headers);

        if status == reqwest::StatusCode::NOT_MODIFIED {
            tracing::debug!(url = %request.url, "Not modified");
            // 304s often omit validators; the ones we sent are still current
            return Ok(RawBody {
                status: status.as_u16(),
                bytes: Vec::new(),
                content_type,
                etag: response_etag.or_else(|| etag.map(str::to_owned)),
                last_modified: response_last_modified.or(last_modified),
            });
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = read_body(response, options.max_body_bytes).await?;
        let decoded = decode_content(encoding.as_deref(), &bytes, options.max_body_bytes)
            .map_err(|e| match e {
                DecodeError::TooLarge { .. } => FetchError::ResponseTooLarge,
                e => FetchError::Decode(e),
            })?;

        Ok(RawBody {
            status: status.as_u16(),
            bytes: decoded.into_owned(),
            content_type,
            etag: response_etag,
            last_modified: response_last_modified,
        })
    }

    fn parse_body(&self, request: &FetchRequest, body: RawBody) -> FetchOutcome<Feed> {
        if body.is_not_modified() {
            return Ok(Feed::not_modified(
                request.url.clone(),
                body.etag,
                body.last_modified,
            ));
        }

        let text = String::from_utf8_lossy(&body.bytes);
        let descriptor = classify_with(&self.registry, &text)?;
        let mut feed = descriptor.parse(&body.bytes)?;
        tracing::debug!(
            url = %request.url,
            parser = descriptor.name(),
            entries = feed.entries.len(),
            "Parsed feed"
        );

        feed.feed_url = Some(request.url.clone());
        feed.etag = body.etag;
        feed.last_modified = body.last_modified;
        Ok(feed)
    }
}

fn notify<T: AsFetched>(url: &str, outcome: &FetchOutcome<T>, options: &FetchOptions) {
    match outcome {
        Ok(value) => {
            if let Some(callback) = &options.on_success {
                callback(url, value.as_fetched());
            }
        }
        Err(e) => {
            tracing::warn!(url = %url, status = e.status_code(), error = %e, "Feed fetch failed");
            if let Some(callback) = &options.on_failure {
                callback(url, e);
            }
        }
    }
}

/// Drops repeated URLs, keeping the first occurrence and the input order.
fn dedup_requests(requests: Vec<FetchRequest>) -> Vec<FetchRequest> {
    let mut seen = HashSet::with_capacity(requests.len());
    requests
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

/// Streams the body into memory, refusing anything past `limit` bytes and
/// anything shorter than its declared `Content-Length`.
async fn read_body(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let declared = response.content_length();
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(FetchError::ResponseTooLarge);
    }

    let mut body = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if body.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        body.extend_from_slice(&chunk);
    }

    match declared {
        Some(expected) if (body.len() as u64) < expected => Err(FetchError::IncompleteResponse {
            expected,
            received: body.len(),
        }),
        _ => Ok(body),
    }
}
