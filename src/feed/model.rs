//! In-memory representation of the bulletin feed.
//!
//! The codec produces an untyped XML tree ([`Node`]). [`Feed::from_document`]
//! validates that tree into typed records at the parse boundary, so later
//! stages never have to probe for missing fields. [`Feed::to_document`] turns
//! the records back into a tree for serialization.
//!
//! Tree conventions:
//!
//! - attributes are keyed `@name`
//! - text inside an element that also has attributes or children is keyed `#text`
//! - an element with only text is a [`Leaf::Text`], an empty element is [`Leaf::Null`]
//! - repeated sibling tags are collected into a [`Node::List`] in document order

use thiserror::Error;

/// Key prefix marking an attribute in a [`Node::Map`].
pub const ATTRIBUTE_PREFIX: char = '@';
/// Key holding the text of an element that also has attributes or children.
pub const TEXT_KEY: &str = "#text";
/// The only content type this feed carries.
pub const CONTENT_TYPE_HTML: &str = "html";

/// Untyped scalar value of an attribute or text-only element.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    Number(f64),
    Text(String),
    Null,
}

impl Leaf {
    /// Renders the leaf as element or attribute text. `Null` renders empty.
    pub fn to_text(&self) -> String {
        match self {
            Leaf::Number(n) => n.to_string(),
            Leaf::Text(s) => s.clone(),
            Leaf::Null => String::new(),
        }
    }
}

/// Recursive XML tree node. Map keys keep document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Map(Vec<(String, Node)>),
    List(Vec<Node>),
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Leaf(Leaf::Text(value.into()))
    }

    pub fn null() -> Self {
        Node::Leaf(Leaf::Null)
    }

    /// Looks up a field of a map node. Non-map nodes have no fields.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Map(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns the scalar text of a leaf node.
    pub fn leaf_text(&self) -> Option<String> {
        match self {
            Node::Leaf(leaf) => Some(leaf.to_text()),
            _ => None,
        }
    }
}

/// Structural mismatch between a parsed document and the expected feed shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("missing required element {0}")]
    Missing(String),

    #[error("{0} must be a text element")]
    NotText(String),

    #[error("{0} must contain child elements")]
    NotElement(String),

    #[error("{path} has unsupported content type {found:?} (expected \"html\")")]
    ContentType { path: String, found: String },
}

/// The `content` element of an entry. Its `type` attribute is always `html`.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    /// HTML-formatted body. Holds a CDATA-wrapped string after reformatting.
    pub text: String,
}

/// One bulletin entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub updated: String,
    pub content: Content,
    /// Attributes and children other than the four above, in document order.
    pub extra: Vec<(String, Node)>,
}

/// The whole feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    /// The `<?xml ...?>` declaration as seen on input, if any.
    pub declaration: Option<Node>,
    pub id: String,
    pub title: String,
    pub link: Node,
    pub author: Node,
    /// Feed-level timestamp. Used as the fallback for entries without a
    /// publish date.
    pub updated: String,
    pub entries: Vec<FeedItem>,
    /// Attributes (e.g. `@xmlns`) and unrecognized children, in document order.
    pub extra: Vec<(String, Node)>,
}

const FEED_FIELDS: [&str; 6] = ["id", "title", "link", "author", "updated", "entry"];
const ENTRY_FIELDS: [&str; 4] = ["id", "title", "updated", "content"];

impl Feed {
    /// Validates a parsed document (the map holding `xml` and `feed`) into a [`Feed`].
    pub fn from_document(document: &Node) -> Result<Self, ShapeError> {
        let declaration = document.get("xml").cloned();
        let feed = document
            .get("feed")
            .ok_or_else(|| ShapeError::Missing("feed".to_string()))?;
        let Node::Map(fields) = feed else {
            return Err(ShapeError::NotElement("feed".to_string()));
        };

        let entries = match feed.get("entry") {
            None => Vec::new(),
            Some(Node::List(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| FeedItem::from_node(item, &format!("feed.entry[{}]", i)))
                .collect::<Result<Vec<_>, _>>()?,
            Some(item) => vec![FeedItem::from_node(item, "feed.entry[0]")?],
        };

        Ok(Feed {
            declaration,
            id: required_text(feed, "id", "feed")?,
            title: required_text(feed, "title", "feed")?,
            link: feed.get("link").cloned().unwrap_or_else(Node::null),
            author: feed.get("author").cloned().unwrap_or_else(Node::null),
            updated: required_text(feed, "updated", "feed")?,
            entries,
            extra: extra_fields(fields, &FEED_FIELDS),
        })
    }

    /// Builds the `feed` element tree. The declaration is not part of it.
    pub fn to_document(&self) -> Node {
        let mut fields: Vec<(String, Node)> = Vec::with_capacity(self.extra.len() + 6);
        let (attributes, children): (Vec<_>, Vec<_>) = self
            .extra
            .iter()
            .cloned()
            .partition(|(k, _)| k.starts_with(ATTRIBUTE_PREFIX));

        fields.extend(attributes);
        fields.push(("id".to_string(), Node::text(&self.id)));
        fields.push(("title".to_string(), Node::text(&self.title)));
        fields.push(("link".to_string(), self.link.clone()));
        fields.push(("author".to_string(), self.author.clone()));
        fields.extend(children);
        fields.push(("updated".to_string(), Node::text(&self.updated)));
        if !self.entries.is_empty() {
            let entries = self.entries.iter().map(FeedItem::to_node).collect();
            fields.push(("entry".to_string(), Node::List(entries)));
        }

        Node::Map(fields)
    }
}

impl FeedItem {
    fn from_node(node: &Node, path: &str) -> Result<Self, ShapeError> {
        let Node::Map(fields) = node else {
            return Err(ShapeError::NotElement(path.to_string()));
        };

        Ok(FeedItem {
            id: required_text(node, "id", path)?,
            title: required_text(node, "title", path)?,
            updated: required_text(node, "updated", path)?,
            content: Content::from_node(node.get("content"), &format!("{}.content", path))?,
            extra: extra_fields(fields, &ENTRY_FIELDS),
        })
    }

    fn to_node(&self) -> Node {
        let (attributes, children): (Vec<_>, Vec<_>) = self
            .extra
            .iter()
            .cloned()
            .partition(|(k, _)| k.starts_with(ATTRIBUTE_PREFIX));

        let mut fields = attributes;
        fields.push(("id".to_string(), Node::text(&self.id)));
        fields.push(("title".to_string(), Node::text(&self.title)));
        fields.extend(children);
        fields.push(("updated".to_string(), Node::text(&self.updated)));
        fields.push(("content".to_string(), self.content.to_node()));
        Node::Map(fields)
    }
}

impl Content {
    fn from_node(node: Option<&Node>, path: &str) -> Result<Self, ShapeError> {
        let node = node.ok_or_else(|| ShapeError::Missing(path.to_string()))?;
        let kind = node
            .get("@type")
            .and_then(Node::leaf_text)
            .ok_or_else(|| ShapeError::Missing(format!("{}@type", path)))?;
        if kind != CONTENT_TYPE_HTML {
            return Err(ShapeError::ContentType {
                path: path.to_string(),
                found: kind,
            });
        }

        let text = match node.get(TEXT_KEY) {
            None => String::new(),
            Some(text) => text
                .leaf_text()
                .ok_or_else(|| ShapeError::NotText(path.to_string()))?,
        };
        Ok(Content { text })
    }

    fn to_node(&self) -> Node {
        Node::Map(vec![
            ("@type".to_string(), Node::text(CONTENT_TYPE_HTML)),
            (TEXT_KEY.to_string(), Node::text(&self.text)),
        ])
    }
}

fn required_text(parent: &Node, key: &str, path: &str) -> Result<String, ShapeError> {
    let node = parent
        .get(key)
        .ok_or_else(|| ShapeError::Missing(format!("{}.{}", path, key)))?;
    node.leaf_text()
        .ok_or_else(|| ShapeError::NotText(format!("{}.{}", path, key)))
}

fn extra_fields(fields: &[(String, Node)], known: &[&str]) -> Vec<(String, Node)> {
    fields
        .iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .cloned()
        .collect()
}
