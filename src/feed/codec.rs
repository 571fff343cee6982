use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use super::model::{Feed, Leaf, Node, ShapeError, ATTRIBUTE_PREFIX, TEXT_KEY};

/// Opening marker of a CDATA-wrapped text leaf.
pub const CDATA_OPEN: &str = "<![CDATA[";
/// Closing marker of a CDATA-wrapped text leaf.
pub const CDATA_CLOSE: &str = "]]>";

/// Errors that can occur while converting between XML text and the feed model.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Input is not well-formed XML.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Input is well-formed but is not a bulletin feed.
    #[error("Unexpected feed structure: {0}")]
    Shape(#[from] ShapeError),

    /// Writing the output document failed.
    #[error("XML write error: {0}")]
    XmlWrite(String),
}

/// Parses feed XML into a validated [`Feed`].
///
/// Comments, doctype and processing instructions are dropped. Text is kept
/// verbatim, with no numeric or boolean coercion.
///
/// # Errors
///
/// - [`CodecError::XmlParse`] for malformed XML (mismatched or unclosed tags,
///   unknown entities, bad attributes)
/// - [`CodecError::Shape`] when the document lacks the feed/entry/content shape
pub fn parse(xml: &str) -> Result<Feed, CodecError> {
    let document = parse_document(xml)?;
    Ok(Feed::from_document(&document)?)
}

/// Serializes the `feed` element of a [`Feed`].
///
/// The XML declaration is NOT written; callers prepend their own. Text leaves
/// wrapped in `<![CDATA[`…`]]>` are emitted as CDATA sections instead of being
/// escaped.
pub fn serialize(feed: &Feed) -> Result<String, CodecError> {
    let mut writer = Writer::new(Vec::new());
    write_node(&mut writer, "feed", &feed.to_document())?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| CodecError::XmlWrite(format!("Generated XML contains invalid UTF-8: {}", e)))
}

/// An element whose end tag has not been read yet.
struct OpenElement {
    name: String,
    fields: Vec<(String, Node)>,
    text: String,
}

impl OpenElement {
    fn into_node(self) -> Node {
        if self.fields.is_empty() {
            return if self.text.is_empty() {
                Node::null()
            } else {
                Node::text(self.text)
            };
        }
        let mut fields = self.fields;
        if !self.text.is_empty() {
            fields.push((TEXT_KEY.to_string(), Node::text(self.text)));
        }
        Node::Map(fields)
    }
}

/// Parses XML text into the untyped tree: a map holding the declaration (`xml`)
/// and the root element keyed by its tag name.
pub fn parse_document(xml: &str) -> Result<Node, CodecError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations, so a
    // DOCTYPE cannot smuggle external content into the feed.
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root: Vec<(String, Node)> = Vec::new();
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Decl(decl)) => {
                let mut fields = Vec::new();
                let version = decl
                    .version()
                    .map_err(|e| CodecError::XmlParse(e.to_string()))?;
                fields.push((
                    "@version".to_string(),
                    Node::text(String::from_utf8_lossy(&version)),
                ));
                if let Some(encoding) = decl.encoding() {
                    let encoding = encoding.map_err(|e| CodecError::XmlParse(e.to_string()))?;
                    fields.push((
                        "@encoding".to_string(),
                        Node::text(String::from_utf8_lossy(&encoding)),
                    ));
                }
                insert_field(&mut root, "xml".to_string(), Node::Map(fields));
            }
            Ok(Event::Start(e)) => {
                stack.push(open_element(&e, &reader)?);
            }
            Ok(Event::Empty(e)) => {
                let element = open_element(&e, &reader)?;
                close_element(element, &mut stack, &mut root);
            }
            Ok(Event::End(_)) => {
                // Name mismatches are rejected by the reader itself
                let element = stack.pop().ok_or_else(|| {
                    CodecError::XmlParse("closing tag without matching opening tag".to_string())
                })?;
                close_element(element, &mut stack, &mut root);
            }
            Ok(Event::Text(e)) => {
                if let Some(open) = stack.last_mut() {
                    let text = e
                        .unescape()
                        .map_err(|e| CodecError::XmlParse(e.to_string()))?;
                    open.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(open) = stack.last_mut() {
                    let text = std::str::from_utf8(&e)
                        .map_err(|e| CodecError::XmlParse(e.to_string()))?;
                    open.text.push_str(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CodecError::XmlParse(e.to_string())),
            // Comments, doctype and processing instructions
            Ok(_) => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(CodecError::XmlParse(format!(
            "unexpected end of document inside <{}>",
            open.name
        )));
    }

    Ok(Node::Map(root))
}

fn open_element(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<OpenElement, CodecError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut fields = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|e| CodecError::XmlParse(e.to_string()))?;
        let key = format!(
            "{}{}",
            ATTRIBUTE_PREFIX,
            String::from_utf8_lossy(attr.key.as_ref())
        );
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| CodecError::XmlParse(e.to_string()))?;
        insert_field(&mut fields, key, Node::text(value));
    }

    Ok(OpenElement {
        name,
        fields,
        text: String::new(),
    })
}

fn close_element(element: OpenElement, stack: &mut [OpenElement], root: &mut Vec<(String, Node)>) {
    let name = element.name.clone();
    let node = element.into_node();
    match stack.last_mut() {
        Some(parent) => insert_field(&mut parent.fields, name, node),
        None => insert_field(root, name, node),
    }
}

/// Adds a field, turning repeated keys into an ordered [`Node::List`].
fn insert_field(fields: &mut Vec<(String, Node)>, key: String, node: Node) {
    match fields.iter_mut().find(|(k, _)| *k == key) {
        Some((_, Node::List(items))) => items.push(node),
        Some((_, existing)) => {
            let first = std::mem::replace(existing, Node::null());
            *existing = Node::List(vec![first, node]);
        }
        None => fields.push((key, node)),
    }
}

fn write_node(writer: &mut Writer<Vec<u8>>, name: &str, node: &Node) -> Result<(), CodecError> {
    match node {
        Node::Leaf(Leaf::Null) => write_event(writer, Event::Empty(BytesStart::new(name))),
        Node::Leaf(leaf) => {
            write_event(writer, Event::Start(BytesStart::new(name)))?;
            write_text(writer, &leaf.to_text())?;
            write_event(writer, Event::End(BytesEnd::new(name)))
        }
        Node::List(items) => items
            .iter()
            .try_for_each(|item| write_node(writer, name, item)),
        Node::Map(fields) => {
            let mut start = BytesStart::new(name);
            let mut children = Vec::new();
            for (key, value) in fields {
                match key.strip_prefix(ATTRIBUTE_PREFIX) {
                    Some(attr) => {
                        let value = value.leaf_text().ok_or_else(|| {
                            CodecError::XmlWrite(format!("attribute {} of <{}> is not a scalar", key, name))
                        })?;
                        start.push_attribute((attr, value.as_str()));
                    }
                    None => children.push((key, value)),
                }
            }

            if children.is_empty() {
                return write_event(writer, Event::Empty(start));
            }

            write_event(writer, Event::Start(start))?;
            for (key, value) in children {
                if key == TEXT_KEY {
                    let text = value.leaf_text().ok_or_else(|| {
                        CodecError::XmlWrite(format!("text of <{}> is not a scalar", name))
                    })?;
                    write_text(writer, &text)?;
                } else {
                    write_node(writer, key, value)?;
                }
            }
            write_event(writer, Event::End(BytesEnd::new(name)))
        }
    }
}

fn write_text(writer: &mut Writer<Vec<u8>>, text: &str) -> Result<(), CodecError> {
    match unwrap_cdata(text) {
        Some(inner) => cdata_sections(inner)
            .into_iter()
            .try_for_each(|section| write_event(writer, Event::CData(BytesCData::new(section)))),
        None if text.is_empty() => Ok(()),
        None => write_event(writer, Event::Text(BytesText::new(text))),
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), CodecError> {
    writer
        .write_event(event)
        .map_err(|e| CodecError::XmlWrite(e.to_string()))
}

/// Returns the text between the CDATA markers, if `text` is wrapped in them.
pub fn unwrap_cdata(text: &str) -> Option<&str> {
    text.strip_prefix(CDATA_OPEN)?.strip_suffix(CDATA_CLOSE)
}

/// Splits text so that no section contains the `]]>` terminator.
///
/// `a]]>b` becomes `a]]` and `>b`, which re-join to the original on parse.
fn cdata_sections(inner: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut rest = inner;
    while let Some(pos) = rest.find(CDATA_CLOSE) {
        sections.push(&rest[..pos + 2]);
        rest = &rest[pos + 2..];
    }
    sections.push(rest);
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BULLETINS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generated upstream -->
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>tag:google.com,2016:google-cloud-security-bulletins</id>
  <title>Google Cloud Security Bulletins</title>
  <link href="https://cloud.google.com/support/bulletins" rel="self"/>
  <author><name>Google Cloud</name></author>
  <updated>2020-01-01T00:00:00.000+00:00</updated>
  <entry>
    <title>GCP-2024-001</title>
    <id>https://cloud.google.com/support/bulletins#gcp-2024-001</id>
    <updated>2024-03-02T00:00:00.000+00:00</updated>
    <link href="https://cloud.google.com/support/bulletins#gcp-2024-001"/>
    <content type="html">&lt;p&gt;Published: 2024-03-01T10:00:00Z&lt;/p&gt;&lt;p&gt;Summary&lt;/p&gt;</content>
  </entry>
  <entry>
    <title>GCP-2024-002</title>
    <id>https://cloud.google.com/support/bulletins#gcp-2024-002</id>
    <updated>2024-04-02T00:00:00.000+00:00</updated>
    <content type="html"><![CDATA[<div>No paragraph here</div>]]></content>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_bulletin_feed() {
        let feed = parse(BULLETINS).expect("Failed to parse bulletin feed");

        assert_eq!(feed.id, "tag:google.com,2016:google-cloud-security-bulletins");
        assert_eq!(feed.title, "Google Cloud Security Bulletins");
        assert_eq!(feed.updated, "2020-01-01T00:00:00.000+00:00");
        assert_eq!(
            feed.link.get("@href").and_then(Node::leaf_text).as_deref(),
            Some("https://cloud.google.com/support/bulletins")
        );
        assert_eq!(
            feed.author.get("name").and_then(Node::leaf_text).as_deref(),
            Some("Google Cloud")
        );
        assert_eq!(feed.entries.len(), 2);
        assert_eq!(feed.entries[0].title, "GCP-2024-001");
        assert_eq!(
            feed.entries[0].content.text,
            "<p>Published: 2024-03-01T10:00:00Z</p><p>Summary</p>"
        );
        assert_eq!(feed.entries[1].content.text, "<div>No paragraph here</div>");
        assert_eq!(
            feed.extra,
            vec![(
                "@xmlns".to_string(),
                Node::text("http://www.w3.org/2005/Atom")
            )]
        );
    }

    #[test]
    fn test_declaration_surfaced_as_xml_node() {
        let feed = parse(BULLETINS).unwrap();
        let decl = feed.declaration.expect("declaration should be captured");
        assert_eq!(decl.get("@version").and_then(Node::leaf_text).as_deref(), Some("1.0"));
        assert_eq!(decl.get("@encoding").and_then(Node::leaf_text).as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_repeated_siblings_collected_in_order() {
        let doc = parse_document("<r><a>1</a><b/><a>2</a><a>3</a></r>").unwrap();
        let r = doc.get("r").unwrap();
        assert_eq!(
            r.get("a"),
            Some(&Node::List(vec![Node::text("1"), Node::text("2"), Node::text("3")]))
        );
        assert_eq!(r.get("b"), Some(&Node::null()));
    }

    #[test]
    fn test_text_is_not_coerced() {
        let doc = parse_document(r#"<r n="42"><flag>true</flag><num>007</num></r>"#).unwrap();
        let r = doc.get("r").unwrap();
        assert_eq!(r.get("@n"), Some(&Node::text("42")));
        assert_eq!(r.get("flag"), Some(&Node::text("true")));
        assert_eq!(r.get("num"), Some(&Node::text("007")));
    }

    #[test]
    fn test_attribute_and_child_with_same_name_do_not_collide() {
        let doc = parse_document(r#"<r type="attr"><type>child</type></r>"#).unwrap();
        let r = doc.get("r").unwrap();
        assert_eq!(r.get("@type"), Some(&Node::text("attr")));
        assert_eq!(r.get("type"), Some(&Node::text("child")));
    }

    #[test]
    fn test_comments_are_ignored() {
        let doc = parse_document("<r><!-- note --><a>x</a><!-- tail --></r>").unwrap();
        assert_eq!(doc.get("r"), Some(&Node::Map(vec![("a".to_string(), Node::text("x"))])));
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(matches!(parse("<feed><id>x</feed>"), Err(CodecError::XmlParse(_))));
        assert!(matches!(parse("<feed><id>x</id>"), Err(CodecError::XmlParse(_))));
        assert!(matches!(parse("<not valid xml"), Err(CodecError::XmlParse(_))));
    }

    #[test]
    fn test_wrong_shape_error() {
        let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel/></rss>"#;
        assert!(matches!(
            parse(rss),
            Err(CodecError::Shape(ShapeError::Missing(ref path))) if path == "feed"
        ));
    }

    #[test]
    fn test_xxe_entity_not_expanded() {
        let payload = r#"<?xml version="1.0"?>
<!DOCTYPE feed [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<feed><id>&xxe;</id><title>t</title><updated>u</updated></feed>"#;
        assert!(parse(payload).is_err());
    }

    #[test]
    fn test_serialize_omits_declaration() {
        let feed = parse(BULLETINS).unwrap();
        let xml = serialize(&feed).unwrap();
        assert!(xml.starts_with("<feed xmlns=\"http://www.w3.org/2005/Atom\">"));
        assert!(!xml.contains("<?xml"));
    }

    #[test]
    fn test_serialize_wrapped_text_as_cdata() {
        let mut feed = parse(BULLETINS).unwrap();
        feed.entries[0].content.text = format!("{}<p>a &amp; b</p>{}", CDATA_OPEN, CDATA_CLOSE);
        feed.entries[1].content.text = "<b>escaped</b>".to_string();

        let xml = serialize(&feed).unwrap();
        assert!(xml.contains(r#"<content type="html"><![CDATA[<p>a &amp; b</p>]]></content>"#));
        assert!(xml.contains(r#"<content type="html">&lt;b&gt;escaped&lt;/b&gt;</content>"#));
    }

    #[test]
    fn test_round_trip_preserves_entries() {
        let mut feed = parse(BULLETINS).unwrap();
        let original: Vec<String> = feed.entries.iter().map(|e| e.content.text.clone()).collect();
        for entry in &mut feed.entries {
            entry.content.text = format!("{}{}{}", CDATA_OPEN, entry.content.text, CDATA_CLOSE);
        }

        let reparsed = parse(&serialize(&feed).unwrap()).unwrap();
        assert_eq!(reparsed.entries.len(), feed.entries.len());
        for ((before, after), text) in feed.entries.iter().zip(&reparsed.entries).zip(&original) {
            assert_eq!(before.id, after.id);
            assert_eq!(before.title, after.title);
            assert_eq!(before.updated, after.updated);
            assert_eq!(&after.content.text, text);
            assert_eq!(before.extra, after.extra);
        }
        assert_eq!(reparsed.link, feed.link);
        assert_eq!(reparsed.author, feed.author);
        assert_eq!(reparsed.extra, feed.extra);
    }

    #[test]
    fn test_cdata_terminator_inside_content_survives() {
        let mut feed = parse(BULLETINS).unwrap();
        let tricky = "<p>x]]>y</p>";
        feed.entries[0].content.text = format!("{}{}{}", CDATA_OPEN, tricky, CDATA_CLOSE);

        let reparsed = parse(&serialize(&feed).unwrap()).unwrap();
        assert_eq!(reparsed.entries[0].content.text, tricky);
    }

    #[test]
    fn test_cdata_sections_split() {
        assert_eq!(cdata_sections("plain"), vec!["plain"]);
        assert_eq!(cdata_sections("a]]>b"), vec!["a]]", ">b"]);
        assert_eq!(cdata_sections("]]>]]>"), vec!["]]", ">]]", ">"]);
    }

    #[test]
    fn test_number_leaf_serialized_as_text() {
        let mut feed = parse(BULLETINS).unwrap();
        feed.extra.push(("count".to_string(), Node::Leaf(Leaf::Number(2.0))));
        let xml = serialize(&feed).unwrap();
        assert!(xml.contains("<count>2</count>"));
    }
}
