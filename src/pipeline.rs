//! Request-scoped composition of the feed stages.
//!
//! fetch → parse → reformat → serialize, strictly in that order, with nothing
//! kept between calls.

use std::fmt::Write as _;

use thiserror::Error;

use crate::feed::{self, CodecError, Feed, FeedSource, FetchError, ReformatOptions};

/// Declaration line written ahead of every serialized feed. The codec does not
/// write one itself.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upstream feed could not be retrieved.
    #[error("Failed to fetch feed: {0}")]
    Fetch(#[from] FetchError),

    /// The upstream feed is not well-formed XML or not the expected shape.
    #[error("Failed to parse feed: {0}")]
    Parse(#[source] CodecError),

    /// The reformatted feed could not be written.
    #[error("Failed to serialize feed: {0}")]
    Serialize(#[source] CodecError),
}

/// Fetches and parses the feed from `source`.
pub async fn load(source: &dyn FeedSource) -> Result<Feed, PipelineError> {
    let raw = source.fetch().await.inspect_err(|e| {
        tracing::warn!(source = %source.describe(), error = %e, "Feed fetch failed");
    })?;

    let feed = feed::parse(&raw).map_err(|e| {
        tracing::warn!(source = %source.describe(), error = %e, "Feed parse failed");
        PipelineError::Parse(e)
    })?;

    tracing::info!(
        source = %source.describe(),
        entries = feed.entries.len(),
        updated = %feed.updated,
        "Loaded feed"
    );
    Ok(feed)
}

/// Serializes a feed with the declaration line in front.
pub fn render(feed: &Feed) -> Result<String, CodecError> {
    let body = feed::serialize(feed)?;
    let mut out = String::with_capacity(XML_DECLARATION.len() + 1 + body.len());
    out.push_str(XML_DECLARATION);
    out.push('\n');
    out.push_str(&body);
    Ok(out)
}

/// Runs the whole pipeline once and returns the XML response body.
pub async fn run(source: &dyn FeedSource, options: ReformatOptions) -> Result<String, PipelineError> {
    let feed = load(source).await?;
    let corrected = feed::reformat(&feed, options);
    render(&corrected).map_err(PipelineError::Serialize)
}

/// One tab-separated line per entry: id, corrected `updated`, title.
pub fn inspection_report(feed: &Feed) -> String {
    let mut out = String::new();
    for entry in &feed.entries {
        let _ = writeln!(out, "{}\t{}\t{}", entry.id, entry.updated, entry.title);
    }
    out
}
