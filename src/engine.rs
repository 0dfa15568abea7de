//! [`FeedEngine`]: the entry point tying detection, retrieval and
//! reconciliation together behind one configured object.

use crate::config::Config;
use crate::feed::fetcher::{build_client, FetchError, FetchOptions, FetchOutcome, FetchRequest, Fetcher};
use crate::feed::model::{Feed, RawBody};
use crate::feed::reconcile::{reconcile, ReconcileOptions, Reconciled};
use crate::feed::registry::{self, classify_with, ParseError, ParserDescriptor, SharedRegistry};
use std::collections::HashMap;
use std::sync::PoisonError;

/// Configured feed engine.
///
/// Cheap to clone; clones share the HTTP connection pool and the registry.
#[derive(Debug, Clone)]
pub struct FeedEngine {
    config: Config,
    registry: SharedRegistry,
    fetcher: Fetcher,
    reconcile: ReconcileOptions,
}

impl FeedEngine {
    /// Engine using the process-wide parser registry.
    pub fn new(config: Config) -> Result<Self, FetchError> {
        Self::with_registry(config, registry::global())
    }

    /// Engine with its own registry, isolated from [`registry::add_parser`].
    pub fn with_registry(config: Config, registry: SharedRegistry) -> Result<Self, FetchError> {
        let client = build_client(config.max_redirects)?;
        let reconcile = config.reconcile_options();
        Ok(Self {
            fetcher: Fetcher::new(client, registry.clone()),
            registry,
            reconcile,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Fetch options seeded from the engine's configuration.
    pub fn default_options(&self) -> FetchOptions {
        self.config.fetch_options()
    }

    /// Parses an in-memory document with the first matching descriptor.
    pub fn parse(&self, xml: &str) -> Result<Feed, ParseError> {
        self.parse_bytes(xml.as_bytes())
    }

    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Feed, ParseError> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .parse(bytes)
    }

    /// Names the descriptor that would handle `xml`.
    pub fn determine_parser(&self, xml: &str) -> Result<ParserDescriptor, ParseError> {
        classify_with(&self.registry, xml)
    }

    pub async fn fetch_raw(&self, url: &str, options: &FetchOptions) -> FetchOutcome<RawBody> {
        self.fetcher.fetch_raw(url, options).await
    }

    pub async fn fetch_raw_all<I, S>(&self, urls: I, options: &FetchOptions) -> HashMap<String, FetchOutcome<RawBody>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fetcher.fetch_raw_all(urls, options).await
    }

    pub async fn fetch_and_parse(&self, url: &str, options: &FetchOptions) -> FetchOutcome<Feed> {
        self.fetcher.fetch_and_parse(url, options).await
    }

    pub async fn fetch_and_parse_all<I, S>(&self, urls: I, options: &FetchOptions) -> HashMap<String, FetchOutcome<Feed>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fetcher.fetch_and_parse_all(urls, options).await
    }

    /// Re-fetches `feed` from its `feed_url` and merges the result into it.
    ///
    /// The feed's stored ETag and Last-Modified are sent as conditional
    /// headers; a 304 yields a [`Reconciled`] with no new entries.
    ///
    /// # Errors
    ///
    /// [`FetchError::MissingFeedUrl`] when the feed was never fetched from a
    /// URL, otherwise whatever the fetch or parse step produced.
    pub async fn update(&self, feed: &Feed, options: &FetchOptions) -> FetchOutcome<Reconciled> {
        let request = FetchRequest::for_feed(feed).ok_or(FetchError::MissingFeedUrl)?;
        let fresh = self.fetcher.fetch_request(&request, options).await?;
        Ok(reconcile(feed, &fresh, &self.reconcile))
    }

    /// Updates every feed in batches, keyed by `feed_url`.
    ///
    /// Feeds without a `feed_url` have no key to report under; they are
    /// skipped with a warning. When two feeds share a `feed_url` the first
    /// one is the one updated.
    pub async fn update_all(&self, feeds: Vec<Feed>, options: &FetchOptions) -> HashMap<String, FetchOutcome<Reconciled>> {
        let mut stored: HashMap<String, Feed> = HashMap::with_capacity(feeds.len());
        let mut requests = Vec::with_capacity(feeds.len());

        for feed in feeds {
            let Some(request) = FetchRequest::for_feed(&feed) else {
                tracing::warn!(title = ?feed.title, "Skipping feed without a feed URL");
                continue;
            };
            if stored.contains_key(&request.url) {
                continue;
            }
            stored.insert(request.url.clone(), feed);
            requests.push(request);
        }

        let fetched = self.fetcher.fetch_requests(requests, options).await;

        fetched
            .into_iter()
            .filter_map(|(url, outcome)| {
                let existing = stored.get(&url)?;
                let merged = outcome.map(|fresh| reconcile(existing, &fresh, &self.reconcile));
                Some((url, merged))
            })
            .collect()
    }
}
