//! Cheap structural inspection of XML payloads.
//!
//! Classification must stay fast and side-effect free even on garbage input,
//! so nothing here builds a document tree: the reader stops at the root start tag.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Upper bound on prolog events (comments, PIs, doctype) read before giving up.
const MAX_PROLOG_EVENTS: usize = 64;

/// The root start tag of a document: its qualified name and raw attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
}

impl RootElement {
    /// Name without its namespace prefix (`rdf:RDF` -> `RDF`).
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Namespace URI the root element itself lives in, if declared on it.
    pub fn namespace(&self) -> Option<&str> {
        let wanted = match self.prefix() {
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_owned(),
        };
        self.attribute(&wanted)
    }

    /// True if any `xmlns` / `xmlns:*` attribute on the root binds `uri`.
    pub fn declares_namespace(&self, uri: &str) -> bool {
        self.attributes
            .iter()
            .any(|(key, value)| (key == "xmlns" || key.starts_with("xmlns:")) && value == uri)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Returns the root element of `xml`, or `None` for non-XML or malformed input.
pub fn root_element(xml: &str) -> Option<RootElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    for _ in 0..MAX_PROLOG_EVENTS {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => return Some(describe(&e, &reader)),
            Ok(Event::Eof) | Err(_) => return None,
            // Declaration, comments, doctype, PIs, stray text
            Ok(_) => {}
        }
    }
    None
}

fn describe(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> RootElement {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attributes = e
        .attributes()
        .filter_map(Result::ok)
        .filter_map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .ok()?
                .into_owned();
            Some((key, value))
        })
        .collect();
    RootElement { name, attributes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_skips_prolog() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generator -->
<?xml-stylesheet type="text/xsl" href="rss.xsl"?>
<rss version="2.0"><channel/></rss>"#;
        let root = root_element(xml).unwrap();
        assert_eq!(root.name, "rss");
        assert_eq!(root.attribute("version"), Some("2.0"));
    }

    #[test]
    fn test_prefixed_root_namespace() {
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/"></rdf:RDF>"#;
        let root = root_element(xml).unwrap();
        assert_eq!(root.local_name(), "RDF");
        assert_eq!(
            root.namespace(),
            Some("http://www.w3.org/1999/02/22-rdf-syntax-ns#")
        );
        assert!(root.declares_namespace("http://purl.org/rss/1.0/"));
    }

    #[test]
    fn test_default_namespace() {
        let root = root_element(r#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#).unwrap();
        assert_eq!(root.local_name(), "feed");
        assert_eq!(root.namespace(), Some("http://www.w3.org/2005/Atom"));
    }

    #[test]
    fn test_plain_text_has_no_root() {
        assert!(root_element("I'm an invalid feed").is_none());
        assert!(root_element("").is_none());
    }

    #[test]
    fn test_garbage_does_not_panic() {
        for input in ["<", "<<>>", "<?xml", "<!-- never closed", "\u{0}\u{1}<a"] {
            let _ = root_element(input);
        }
    }
}
