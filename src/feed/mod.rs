//! Bulletin feed handling: fetching, parsing, timestamp correction and
//! serialization.
//!
//! # Architecture
//!
//! - [`model`] - untyped XML tree plus the validated `Feed`/`FeedItem` records
//! - [`codec`] - XML text to model and back, using `quick-xml`
//! - [`extract`] - first-paragraph text of an entry's HTML body
//! - [`published`] - `"Published: <date>"` parsing and timestamp formatting
//! - [`reformat`] - per-entry timestamp correction and CDATA wrapping
//! - [`fetcher`] - the [`FeedSource`] seam and its HTTP/file implementations
//!
//! # Example
//!
//! ```ignore
//! use bulletin_relay::feed::{parse, reformat, serialize, ReformatOptions};
//!
//! let feed = parse(&raw_xml)?;
//! let corrected = reformat(&feed, ReformatOptions::default());
//! let body = serialize(&corrected)?;
//! ```

pub mod codec;
pub mod extract;
pub mod fetcher;
pub mod model;
pub mod published;
pub mod reformat;

pub use codec::{parse, serialize, CodecError};
pub use extract::first_paragraph_text;
pub use fetcher::{FeedSource, FetchError, FileSource, HttpFetcher, MAX_FEED_SIZE};
pub use model::{Content, Feed, FeedItem, Leaf, Node, ShapeError};
pub use published::resolve_publish_timestamp;
pub use reformat::{reformat, ReformatOptions};
