//! Built-in feed dialects.
//!
//! Field extraction is delegated to `feed-rs`; each dialect only decides
//! whether a payload is its own and how the generic model maps onto
//! [`Feed`] / [`Entry`].

use crate::feed::model::{Entry, Feed};
use crate::feed::registry::{ParseError, ParserDescriptor};
use crate::feed::sniff::{root_element, RootElement};
use feed_rs::model;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

/// RSS 0.9x / 2.0 and RDF (RSS 1.0), including FeedBurner-served RSS.
pub const RSS: ParserDescriptor = ParserDescriptor::new("rss", sniff_rss, parse_rss);
/// RSS carrying the iTunes podcast namespace.
pub const ITUNES_RSS: ParserDescriptor =
    ParserDescriptor::new("itunes-rss", sniff_itunes_rss, parse_itunes_rss);
/// Atom 1.0.
pub const ATOM: ParserDescriptor = ParserDescriptor::new("atom", sniff_atom, parse_atom);
/// Atom served through FeedBurner.
pub const ATOM_FEEDBURNER: ParserDescriptor =
    ParserDescriptor::new("atom-feedburner", sniff_atom_feedburner, parse_atom);

/// Built-in descriptors, highest priority first.
///
/// More specific dialects sit in front of the general ones they overlap with.
pub fn builtins() -> Vec<ParserDescriptor> {
    vec![ITUNES_RSS, RSS, ATOM_FEEDBURNER, ATOM]
}

fn is_rss_root(root: &RootElement) -> bool {
    matches!(root.local_name(), "rss" | "RDF")
}

fn is_atom_root(root: &RootElement) -> bool {
    root.local_name() == "feed" && root.namespace() == Some(ATOM_NS)
}

fn sniff_rss(xml: &str) -> bool {
    root_element(xml).is_some_and(|root| is_rss_root(&root))
}

fn sniff_itunes_rss(xml: &str) -> bool {
    root_element(xml).is_some_and(|root| {
        is_rss_root(&root)
            && root.attributes.iter().any(|(key, value)| {
                key.starts_with("xmlns:") && value.eq_ignore_ascii_case(ITUNES_NS)
            })
    })
}

fn sniff_atom(xml: &str) -> bool {
    root_element(xml).is_some_and(|root| is_atom_root(&root))
}

fn sniff_atom_feedburner(xml: &str) -> bool {
    sniff_atom(xml) && xml.contains("feedburner")
}

/// How the generic `feed-rs` model maps onto ours for one dialect.
#[derive(Debug, Clone, Copy, Default)]
struct Mapping {
    /// Pick `rel="alternate"` links over whatever comes first
    prefer_alternate: bool,
    /// Entries without an author inherit the channel author
    inherit_author: bool,
    /// Fall back to media descriptions (itunes:summary) for summaries
    media_summary: bool,
}

fn parse_rss(bytes: &[u8]) -> Result<Feed, ParseError> {
    parse_with(bytes, Mapping::default())
}

fn parse_itunes_rss(bytes: &[u8]) -> Result<Feed, ParseError> {
    parse_with(
        bytes,
        Mapping {
            inherit_author: true,
            media_summary: true,
            ..Mapping::default()
        },
    )
}

fn parse_atom(bytes: &[u8]) -> Result<Feed, ParseError> {
    parse_with(
        bytes,
        Mapping {
            prefer_alternate: true,
            ..Mapping::default()
        },
    )
}

fn parse_with(bytes: &[u8], mapping: Mapping) -> Result<Feed, ParseError> {
    // No synthesized ids: an entry without guid/id keeps `id: None` so
    // reconciliation falls back to its link or title
    let parsed = feed_rs::parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| ParseError::Malformed(e.to_string()))?;

    let feed_author = parsed.authors.first().map(|p| p.name.clone());
    let entries = parsed
        .entries
        .into_iter()
        .map(|entry| map_entry(entry, mapping, feed_author.as_deref()))
        .collect();

    Ok(Feed {
        title: parsed.title.map(|t| t.content),
        url: select_link(&parsed.links, mapping),
        feed_url: None,
        description: parsed.description.map(|d| d.content),
        etag: None,
        last_modified: None,
        ttl: parsed.ttl,
        parser: None,
        entries,
    })
}

fn map_entry(entry: model::Entry, mapping: Mapping, feed_author: Option<&str>) -> Entry {
    let id = Some(entry.id.trim().to_owned()).filter(|id| !id.is_empty());
    let url = select_link(&entry.links, mapping);
    let author = entry
        .authors
        .first()
        .map(|p| p.name.clone())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            mapping
                .inherit_author
                .then(|| feed_author.map(str::to_owned))
                .flatten()
        });

    let summary = entry.summary.map(|s| s.content).or_else(|| {
        if !mapping.media_summary {
            return None;
        }
        entry
            .media
            .iter()
            .find_map(|m| m.description.as_ref().map(|d| d.content.clone()))
    });

    Entry {
        id,
        title: entry.title.map(|t| t.content),
        url,
        author,
        summary,
        content: entry.content.and_then(|c| c.body),
        published: entry.published.or(entry.updated),
        updated: entry.updated,
        categories: entry.categories.into_iter().map(|c| c.term).collect(),
    }
}

fn select_link(links: &[model::Link], mapping: Mapping) -> Option<String> {
    let alternate = || {
        links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
    };
    let chosen = if mapping.prefer_alternate {
        alternate().or_else(|| links.first())
    } else {
        links.first()
    };
    chosen.map(|l| l.href.clone())
}
