use super::codec::{CDATA_CLOSE, CDATA_OPEN};
use super::extract::first_paragraph_text;
use super::model::{Content, Feed, FeedItem};
use super::published::resolve_publish_timestamp;

/// Knobs for [`reformat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReformatOptions {
    /// Wrap entry bodies in `<![CDATA[`…`]]>` so the serializer emits them
    /// unescaped. Disabled for inspection output.
    pub wrap_content: bool,
}

impl Default for ReformatOptions {
    fn default() -> Self {
        Self { wrap_content: true }
    }
}

impl ReformatOptions {
    /// Options for printing entries rather than re-serializing the feed.
    pub fn inspection() -> Self {
        Self {
            wrap_content: false,
        }
    }
}

/// Rewrites every entry's `updated` from the publish date in its body.
///
/// The fallback for entries without a usable date is the feed-level `updated`
/// as it is on input. It is captured once and shared by all entries, so one
/// entry's result never changes another's. Feed-level `updated` and every
/// other field pass through unchanged; entry order and count are preserved.
///
/// The declaration node is dropped: serialized output gets its declaration
/// from the pipeline.
pub fn reformat(feed: &Feed, options: ReformatOptions) -> Feed {
    let fallback = feed.updated.as_str();
    let entries: Vec<FeedItem> = feed
        .entries
        .iter()
        .map(|entry| reformat_entry(entry, fallback, options))
        .collect();

    tracing::debug!(entries = entries.len(), fallback = %fallback, "Reformatted feed entries");

    Feed {
        declaration: None,
        id: feed.id.clone(),
        title: feed.title.clone(),
        link: feed.link.clone(),
        author: feed.author.clone(),
        updated: feed.updated.clone(),
        entries,
        extra: feed.extra.clone(),
    }
}

/// Rebuilds one entry with its corrected timestamp and re-encoded body.
pub fn reformat_entry(entry: &FeedItem, fallback: &str, options: ReformatOptions) -> FeedItem {
    let paragraph = first_paragraph_text(&entry.content.text);
    let updated = resolve_publish_timestamp(paragraph.as_deref(), fallback);
    if paragraph.is_none() {
        tracing::debug!(id = %entry.id, "No paragraph text in entry, using feed timestamp");
    }

    let text = if options.wrap_content {
        wrap_cdata(&entry.content.text)
    } else {
        entry.content.text.clone()
    };

    FeedItem {
        id: entry.id.clone(),
        title: entry.title.clone(),
        updated,
        content: Content { text },
        extra: entry.extra.clone(),
    }
}

/// Wraps text in the literal `<![CDATA[`…`]]>` markers.
pub fn wrap_cdata(text: &str) -> String {
    format!("{}{}{}", CDATA_OPEN, text, CDATA_CLOSE)
}
