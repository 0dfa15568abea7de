//! Merging a freshly fetched feed into a previously stored one.

use crate::feed::model::{Entry, Feed};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::{HashMap, HashSet};

/// What happens to an entry that exists in both the stored and the fresh feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep the stored copy untouched
    #[default]
    FirstSeen,
    /// Take the fresh text and timestamps, keep the stored identity and publish time
    PreferFresh,
}

/// Entry field used to recognise the same entry across polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    Id,
    Link,
    Title,
    /// SHA-256 of link, title and publish time; always available
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub policy: MergePolicy,
    /// Fields tried in order; the first non-empty one identifies the entry
    pub identity: Vec<IdentityKey>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            policy: MergePolicy::FirstSeen,
            identity: vec![
                IdentityKey::Id,
                IdentityKey::Link,
                IdentityKey::Title,
                IdentityKey::Digest,
            ],
        }
    }
}

/// Identity of one entry, tagged by the field it came from so an id never
/// collides with a title that happens to read the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey(IdentityKey, String);

impl EntryKey {
    pub fn kind(&self) -> IdentityKey {
        self.0
    }

    pub fn value(&self) -> &str {
        &self.1
    }
}

/// Computes the identity of `entry` under the configured key order.
///
/// Falls back to [`IdentityKey::Digest`] when every configured field is empty.
pub fn entry_key(entry: &Entry, identity: &[IdentityKey]) -> EntryKey {
    identity
        .iter()
        .find_map(|&kind| {
            let field = match kind {
                IdentityKey::Id => entry.id.as_deref(),
                IdentityKey::Link => entry.url.as_deref(),
                IdentityKey::Title => entry.title.as_deref(),
                IdentityKey::Digest => return Some(EntryKey(kind, digest(entry))),
            };
            field
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| EntryKey(kind, value.to_owned()))
        })
        .unwrap_or_else(|| EntryKey(IdentityKey::Digest, digest(entry)))
}

fn digest(entry: &Entry) -> String {
    let input = format!(
        "{}|{}|{}",
        entry.url.as_deref().unwrap_or(""),
        entry.title.as_deref().unwrap_or(""),
        entry
            .published
            .map(|p| p.timestamp().to_string())
            .unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Result of [`reconcile`]: the merged feed plus what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub feed: Feed,
    /// Entries not present before, in fresh-document order
    pub new_entries: Vec<Entry>,
    /// Stored entries rewritten under [`MergePolicy::PreferFresh`]
    pub updated_entries: usize,
    /// Whether any feed-level attribute changed
    pub metadata_changed: bool,
}

/// Result of [`reconcile_in_place`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileSummary {
    pub new_entries: Vec<Entry>,
    pub updated_entries: usize,
    pub metadata_changed: bool,
}

/// Merges `fresh` into a copy of `existing`.
pub fn reconcile(existing: &Feed, fresh: &Feed, options: &ReconcileOptions) -> Reconciled {
    let mut feed = existing.clone();
    let summary = reconcile_in_place(&mut feed, fresh, options);
    Reconciled {
        feed,
        new_entries: summary.new_entries,
        updated_entries: summary.updated_entries,
        metadata_changed: summary.metadata_changed,
    }
}

/// Merges `fresh` into `existing`.
///
/// A fresh feed without entries (a 304, or an empty document) leaves
/// `existing` exactly as it was. Otherwise unseen entries are prepended in
/// fresh order, matching entries are handled per [`MergePolicy`], and the
/// feed-level attributes the fresh copy carries replace the stored ones.
/// The merged entry list never holds two entries with the same key.
pub fn reconcile_in_place(
    existing: &mut Feed,
    fresh: &Feed,
    options: &ReconcileOptions,
) -> ReconcileSummary {
    if fresh.is_empty() {
        return ReconcileSummary::default();
    }

    let key = |entry: &Entry| entry_key(entry, &options.identity);

    let mut seen = HashSet::with_capacity(existing.entries.len());
    existing.entries.retain(|entry| seen.insert(key(entry)));

    let mut new_entries = Vec::new();
    let mut matched: HashMap<EntryKey, &Entry> = HashMap::new();
    for entry in &fresh.entries {
        let k = key(entry);
        if seen.contains(&k) {
            matched.entry(k).or_insert(entry);
        } else {
            seen.insert(k);
            new_entries.push(entry.clone());
        }
    }

    let mut updated_entries = 0;
    if options.policy == MergePolicy::PreferFresh {
        for stored in existing.entries.iter_mut() {
            if let Some(incoming) = matched.get(&key(&*stored)) {
                if refresh_entry(stored, incoming) {
                    updated_entries += 1;
                }
            }
        }
    }

    if !new_entries.is_empty() {
        existing.entries.splice(0..0, new_entries.iter().cloned());
    }

    let metadata_changed = refresh_metadata(existing, fresh);

    tracing::debug!(
        feed = ?existing.feed_url,
        new = new_entries.len(),
        updated = updated_entries,
        metadata_changed,
        "Reconciled feed"
    );

    ReconcileSummary {
        new_entries,
        updated_entries,
        metadata_changed,
    }
}

fn refresh_entry(stored: &mut Entry, incoming: &Entry) -> bool {
    let before = stored.clone();
    replace_if_some(&mut stored.title, &incoming.title);
    replace_if_some(&mut stored.summary, &incoming.summary);
    replace_if_some(&mut stored.content, &incoming.content);
    replace_if_some(&mut stored.updated, &incoming.updated);
    replace_if_some(&mut stored.author, &incoming.author);
    if !incoming.categories.is_empty() {
        stored.categories.clone_from(&incoming.categories);
    }
    *stored != before
}

fn refresh_metadata(existing: &mut Feed, fresh: &Feed) -> bool {
    let before = (
        existing.title.clone(),
        existing.url.clone(),
        existing.feed_url.clone(),
        existing.description.clone(),
        existing.ttl,
        existing.etag.clone(),
        existing.last_modified,
    );

    replace_if_some(&mut existing.title, &fresh.title);
    replace_if_some(&mut existing.url, &fresh.url);
    replace_if_some(&mut existing.feed_url, &fresh.feed_url);
    replace_if_some(&mut existing.description, &fresh.description);
    replace_if_some(&mut existing.ttl, &fresh.ttl);
    replace_if_some(&mut existing.etag, &fresh.etag);
    replace_if_some(&mut existing.last_modified, &fresh.last_modified);
    replace_if_some(&mut existing.parser, &fresh.parser);

    before
        != (
            existing.title.clone(),
            existing.url.clone(),
            existing.feed_url.clone(),
            existing.description.clone(),
            existing.ttl,
            existing.etag.clone(),
            existing.last_modified,
        )
}

fn replace_if_some<T: Clone>(slot: &mut Option<T>, fresh: &Option<T>) {
    if let Some(value) = fresh {
        *slot = Some(value.clone());
    }
}
