//! Plain-text extraction from the HTML bodies of feed entries.
//!
//! Entry bodies are HTML fragments, not XML: end tags may be missing, void
//! elements (`<br>`) are never closed and named entities such as `&nbsp;`
//! appear freely. The reader is configured leniently and any remaining parse
//! error simply yields "no text".

use std::borrow::Cow;

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;

/// Returns the text content of the first `<p>` element in an HTML fragment.
///
/// Descendant markup is stripped and entities are decoded, keeping the
/// character order of the source. A paragraph ends at its closing tag, at the
/// next `<p>` or at the end of input.
///
/// Returns `None` when there is no paragraph, when the first paragraph has no
/// text, or when the markup cannot be read at all.
///
/// # Examples
///
/// ```
/// use bulletin_relay::feed::first_paragraph_text;
///
/// let html = "<p>Published: <b>2024-03-01</b></p><p>Summary</p>";
/// assert_eq!(first_paragraph_text(html).as_deref(), Some("Published: 2024-03-01"));
/// assert_eq!(first_paragraph_text("<div>No paragraph here</div>"), None);
/// ```
pub fn first_paragraph_text(html: &str) -> Option<String> {
    let mut reader = Reader::from_str(html);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut buf = Vec::new();
    let mut inside = false;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            // `<p/>` still opens a paragraph in HTML
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if is_paragraph(&e) => {
                if inside {
                    break;
                }
                inside = true;
            }
            Ok(Event::End(e)) if e.local_name().as_ref().eq_ignore_ascii_case(b"p") => {
                if inside {
                    break;
                }
            }
            Ok(Event::Text(e)) if inside => text.push_str(&decode_text(&e)),
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::trace!(error = %e, "Unreadable entry markup, no paragraph text");
                return None;
            }
            _ => {}
        }
        buf.clear();
    }

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn is_paragraph(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref().eq_ignore_ascii_case(b"p")
}

/// Decodes XML and common HTML entities. Text with an unknown entity is kept
/// as written rather than dropped.
fn decode_text<'a>(e: &'a BytesText<'a>) -> Cow<'a, str> {
    match e.unescape_with(|entity| resolve_predefined_entity(entity).or_else(|| html_entity(entity))) {
        Ok(text) => text,
        Err(_) => String::from_utf8_lossy(e),
    }
}

/// Named HTML entities commonly found in bulletin bodies.
fn html_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "bull" => "\u{2022}",
        "middot" => "\u{b7}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        _ => return None,
    };
    Some(value)
}
