//! Priority-ordered registry of feed parser descriptors.
//!
//! A descriptor pairs a cheap sniff predicate with a parse function. The
//! registry walks descriptors from highest to lowest priority and hands the
//! payload to the first one whose predicate accepts it. Newly added
//! descriptors take the highest priority, so callers can shadow the built-ins.
//!
//! The process-wide registry returned by [`global`] is shared by every
//! [`FeedEngine`](crate::FeedEngine) that does not bring its own. Treat
//! mutation of it as setup-time work: a registration racing a batch that is
//! classifying responses may or may not be observed by that batch.

use crate::feed::dialects;
use crate::feed::model::Feed;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use thiserror::Error;

/// Errors raised while turning a payload into a [`Feed`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// No registered descriptor recognises the payload
    #[error("No parser available for this document")]
    NoParserAvailable,
    /// A descriptor accepted the payload but could not parse it
    #[error("Malformed feed: {0}")]
    Malformed(String),
}

/// Cheap structural check: does this payload look like my dialect?
pub type SniffFn = fn(&str) -> bool;
/// Full parse of a payload into the normalized model.
pub type ParseFn = fn(&[u8]) -> Result<Feed, ParseError>;

/// Identifies one feed dialect: a sniff predicate plus a parse function.
///
/// Descriptors compare equal by name; the name doubles as the identity token
/// reported by [`ParserRegistry::classify`] and stored in [`Feed::parser`].
#[derive(Clone, Copy)]
pub struct ParserDescriptor {
    name: &'static str,
    sniff: SniffFn,
    parse: ParseFn,
}

impl ParserDescriptor {
    pub const fn new(name: &'static str, sniff: SniffFn, parse: ParseFn) -> Self {
        Self { name, sniff, parse }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn can_parse(&self, xml: &str) -> bool {
        (self.sniff)(xml)
    }

    /// Parses `bytes`, stamping the result with this descriptor's name.
    pub fn parse(&self, bytes: &[u8]) -> Result<Feed, ParseError> {
        let mut feed = (self.parse)(bytes)?;
        if feed.parser.is_none() {
            feed.parser = Some(self.name.to_owned());
        }
        Ok(feed)
    }
}

impl fmt::Debug for ParserDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ParserDescriptor").field(&self.name).finish()
    }
}

impl PartialEq for ParserDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ParserDescriptor {}

/// Ordered collection of descriptors, highest priority first.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    descriptors: Vec<ParserDescriptor>,
}

impl ParserRegistry {
    /// A registry with no descriptors at all.
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// A registry holding the built-in dialects in their default order.
    pub fn with_builtins() -> Self {
        Self {
            descriptors: dialects::builtins(),
        }
    }

    /// Registers `descriptor` at the highest priority.
    ///
    /// A descriptor already registered under the same name is moved to the
    /// front rather than duplicated.
    pub fn add(&mut self, descriptor: ParserDescriptor) {
        self.descriptors.retain(|d| d.name != descriptor.name);
        self.descriptors.insert(0, descriptor);
        tracing::debug!(parser = descriptor.name, "Registered feed parser");
    }

    /// Removes the descriptor registered under `name`, returning it.
    pub fn remove(&mut self, name: &str) -> Option<ParserDescriptor> {
        let index = self.descriptors.iter().position(|d| d.name == name)?;
        Some(self.descriptors.remove(index))
    }

    /// Returns the first descriptor, in priority order, that accepts `xml`.
    ///
    /// # Errors
    ///
    /// [`ParseError::NoParserAvailable`] when nothing matches. No default is guessed.
    pub fn classify(&self, xml: &str) -> Result<ParserDescriptor, ParseError> {
        self.descriptors
            .iter()
            .find(|d| d.can_parse(xml))
            .copied()
            .ok_or(ParseError::NoParserAvailable)
    }

    /// Classifies then parses `bytes`.
    pub fn parse(&self, bytes: &[u8]) -> Result<Feed, ParseError> {
        let text = String::from_utf8_lossy(bytes);
        self.classify(&text)?.parse(bytes)
    }

    /// Descriptor names, highest priority first.
    pub fn names(&self) -> Vec<&'static str> {
        self.descriptors.iter().map(|d| d.name).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Registry handle shared between engines and fetch batches.
pub type SharedRegistry = Arc<RwLock<ParserRegistry>>;

static GLOBAL: LazyLock<SharedRegistry> =
    LazyLock::new(|| Arc::new(RwLock::new(ParserRegistry::with_builtins())));

/// The process-wide registry, initialised with the built-ins on first use.
pub fn global() -> SharedRegistry {
    Arc::clone(&GLOBAL)
}

/// Adds `descriptor` to the process-wide registry at the highest priority.
pub fn add_parser(descriptor: ParserDescriptor) {
    write(&GLOBAL).add(descriptor);
}

/// Removes a descriptor from the process-wide registry.
pub fn remove_parser(name: &str) -> Option<ParserDescriptor> {
    write(&GLOBAL).remove(name)
}

/// Classifies `xml` against the process-wide registry.
pub fn determine_parser(xml: &str) -> Result<ParserDescriptor, ParseError> {
    classify_with(&GLOBAL, xml)
}

// A poisoned lock still holds a consistent list (mutations are single Vec ops).
pub(crate) fn classify_with(
    registry: &RwLock<ParserRegistry>,
    xml: &str,
) -> Result<ParserDescriptor, ParseError> {
    registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .classify(xml)
}

fn write(registry: &RwLock<ParserRegistry>) -> std::sync::RwLockWriteGuard<'_, ParserRegistry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom"><title>t</title></feed>"#;

    fn accept_all(_: &str) -> bool {
        true
    }

    fn parse_marker(_: &[u8]) -> Result<Feed, ParseError> {
        Ok(Feed {
            title: Some("marker".into()),
            ..Feed::default()
        })
    }

    #[test]
    fn test_added_descriptor_shadows_builtin() {
        let mut registry = ParserRegistry::with_builtins();
        assert_eq!(registry.classify(ATOM).unwrap().name(), "atom");

        registry.add(ParserDescriptor::new("catch-all", accept_all, parse_marker));
        assert_eq!(registry.classify(ATOM).unwrap().name(), "catch-all");

        let removed = registry.remove("catch-all").unwrap();
        assert_eq!(removed.name(), "catch-all");
        assert_eq!(registry.classify(ATOM).unwrap().name(), "atom");
    }

    #[test]
    fn test_readding_moves_to_front_without_duplicates() {
        let mut registry = ParserRegistry::with_builtins();
        let before = registry.len();
        let atom = registry.remove("atom").unwrap();
        registry.add(atom);
        registry.add(atom);
        assert_eq!(registry.len(), before);
        assert_eq!(registry.names()[0], "atom");
    }

    #[test]
    fn test_empty_registry_finds_nothing() {
        let registry = ParserRegistry::empty();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.classify(ATOM),
            Err(ParseError::NoParserAvailable)
        ));
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let mut registry = ParserRegistry::with_builtins();
        assert!(registry.remove("does-not-exist").is_none());
    }

    #[test]
    fn test_parse_stamps_descriptor_name() {
        let mut registry = ParserRegistry::empty();
        registry.add(ParserDescriptor::new("catch-all", accept_all, parse_marker));
        let feed = registry.parse(b"anything").unwrap();
        assert_eq!(feed.parser.as_deref(), Some("catch-all"));
        assert_eq!(feed.title.as_deref(), Some("marker"));
    }

    #[test]
    fn test_global_registration_round_trip() {
        fn sniff_marker(xml: &str) -> bool {
            xml.contains("<registry-global-marker")
        }
        let payload = "<registry-global-marker/>";

        assert!(determine_parser(payload).is_err());
        add_parser(ParserDescriptor::new("global-marker", sniff_marker, parse_marker));
        assert_eq!(determine_parser(payload).unwrap().name(), "global-marker");
        assert!(remove_parser("global-marker").is_some());
        assert!(determine_parser(payload).is_err());
    }
}
