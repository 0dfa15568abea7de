//! Feed ingestion: format detection, retrieval and reconciliation.
//!
//! - **Detection**: [`registry`] holds priority-ordered parser descriptors;
//!   [`sniff`] reads just enough XML to tell the dialects in [`dialects`] apart
//! - **Retrieval**: [`fetcher`] runs batched concurrent HTTP GETs with
//!   conditional headers ([`headers`]) and transfer decoding ([`decode`])
//! - **Reconciliation**: [`reconcile`] merges a fresh copy into a stored one
//!
//! # Example
//!
//! ```ignore
//! use feedpull::feed::{ParserRegistry, reconcile, ReconcileOptions};
//!
//! let registry = ParserRegistry::with_builtins();
//! let fresh = registry.parse(bytes)?;
//! let merged = reconcile(&stored, &fresh, &ReconcileOptions::default());
//! ```

pub mod decode;
pub mod dialects;
pub mod fetcher;
pub mod headers;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod sniff;

pub use decode::{decode_content, DecodeError};
pub use fetcher::{
    FetchError, FetchOptions, FetchOutcome, FetchRequest, Fetched, Fetcher, HttpAuth,
    CONNECTION_FAILED, DEFAULT_MAX_CONCURRENCY, DEFAULT_USER_AGENT,
};
pub use headers::{etag_from_header, last_modified_from_header};
pub use model::{Entry, Feed, RawBody};
pub use reconcile::{
    reconcile, reconcile_in_place, IdentityKey, MergePolicy, ReconcileOptions, ReconcileSummary,
    Reconciled,
};
pub use registry::{
    add_parser, determine_parser, remove_parser, ParseError, ParserDescriptor, ParserRegistry,
    SharedRegistry,
};
