use crate::utils::error::{EtlError, Result};
use std::fmt;

/// Separator between element name and value in a rendered occurrence key.
pub const KEY_DELIMITER: char = ':';

/// Deepest element nesting `DocumentNode::parse_xml` accepts. Parsing and the
/// tree walks recurse once per level and must fit a 2 MiB worker stack.
pub const MAX_XML_DEPTH: usize = 128;

/// Identifier a connector hands out with each document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentUri(String);

impl DocumentUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An owned XML tree node.
///
/// `name` holds the qualified tag name for elements and the target for
/// processing instructions. `value` holds the character data of text,
/// comment and processing-instruction nodes. Namespace declarations are kept
/// as `xmlns` attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentNode {
    kind: NodeKind,
    name: String,
    value: String,
    attributes: Vec<Attribute>,
    children: Vec<DocumentNode>,
}

impl DocumentNode {
    pub fn document(children: Vec<DocumentNode>) -> Self {
        Self::with_parts(NodeKind::Document, String::new(), String::new(), Vec::new(), children)
    }

    pub fn element(
        name: impl Into<String>,
        attributes: Vec<Attribute>,
        children: Vec<DocumentNode>,
    ) -> Self {
        Self::with_parts(NodeKind::Element, name.into(), String::new(), attributes, children)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::with_parts(NodeKind::Text, String::new(), value.into(), Vec::new(), Vec::new())
    }

    pub fn comment(value: impl Into<String>) -> Self {
        Self::with_parts(NodeKind::Comment, String::new(), value.into(), Vec::new(), Vec::new())
    }

    pub fn processing_instruction(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_parts(
            NodeKind::ProcessingInstruction,
            target.into(),
            value.into(),
            Vec::new(),
            Vec::new(),
        )
    }

    pub(crate) fn with_parts(
        kind: NodeKind,
        name: String,
        value: String,
        attributes: Vec<Attribute>,
        children: Vec<DocumentNode>,
    ) -> Self {
        Self {
            kind,
            name,
            value,
            attributes,
            children,
        }
    }

    /// Parses a complete XML document into an owned tree rooted at a
    /// `Document` node.
    pub fn parse_xml(input: &str) -> Result<Self> {
        check_nesting_depth(input, MAX_XML_DEPTH)?;
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(input, options)?;
        Ok(from_roxml(doc.root()).unwrap_or_else(|| DocumentNode::document(Vec::new())))
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn children(&self) -> &[DocumentNode] {
        &self.children
    }

    /// The root element of a document node.
    pub fn document_element(&self) -> Option<&DocumentNode> {
        if self.kind != NodeKind::Document {
            return None;
        }
        self.children.iter().find(|c| c.kind == NodeKind::Element)
    }

    /// DOM `textContent`: descendant text concatenated in document order for
    /// documents and elements, the node's own data otherwise.
    pub fn text_content(&self) -> String {
        match self.kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                self.collect_text(&mut out);
                out
            }
            NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                self.value.clone()
            }
        }
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child.kind {
                NodeKind::Text => out.push_str(&child.value),
                NodeKind::Element => child.collect_text(out),
                _ => {}
            }
        }
    }
}

impl fmt::Display for DocumentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NodeKind::Document => match self.document_element() {
                Some(root) => write!(f, "document <{}>", root.name),
                None => f.write_str("empty document"),
            },
            NodeKind::Element => write!(f, "element <{}>", self.name),
            NodeKind::Text => write!(f, "text ({} bytes)", self.value.len()),
            NodeKind::Comment => f.write_str("comment"),
            NodeKind::ProcessingInstruction => write!(f, "processing instruction {}", self.name),
        }
    }
}

/// Rejects input whose element nesting exceeds `limit` before it reaches the
/// recursive parser. Comments, CDATA, processing instructions, declarations
/// and quoted attribute values are skipped.
fn check_nesting_depth(input: &str, limit: usize) -> Result<()> {
    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;

    while let Some(offset) = bytes[i..].iter().position(|&b| b == b'<') {
        i += offset;
        let rest = &bytes[i..];
        if rest.starts_with(b"<!--") {
            i = skip_past(bytes, i + 4, b"-->");
        } else if rest.starts_with(b"<![CDATA[") {
            i = skip_past(bytes, i + 9, b"]]>");
        } else if rest.starts_with(b"<?") {
            i = skip_past(bytes, i + 2, b"?>");
        } else if rest.starts_with(b"<!") {
            i = skip_declaration(bytes, i + 2);
        } else if rest.starts_with(b"</") {
            depth = depth.saturating_sub(1);
            i = skip_past(bytes, i + 2, b">");
        } else {
            let (end, self_closing) = scan_start_tag(bytes, i + 1);
            if !self_closing {
                depth += 1;
                if depth > limit {
                    return Err(EtlError::ProcessingError {
                        message: format!("XML nesting deeper than {} elements", limit),
                    });
                }
            }
            i = end;
        }
    }
    Ok(())
}

fn skip_past(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
    bytes
        .get(from..)
        .and_then(|rest| rest.windows(terminator.len()).position(|w| w == terminator))
        .map_or(bytes.len(), |p| from + p + terminator.len())
}

// `<!DOCTYPE ...>` may carry an internal subset in brackets.
fn skip_declaration(bytes: &[u8], from: usize) -> usize {
    let mut quote = None;
    let mut brackets = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'[' => brackets += 1,
                b']' => brackets = brackets.saturating_sub(1),
                b'>' if brackets == 0 => return i + 1,
                _ => {}
            },
        }
    }
    bytes.len()
}

/// Returns the position after the tag's `>` and whether it was `/>`.
fn scan_start_tag(bytes: &[u8], from: usize) -> (usize, bool) {
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return (i + 1, bytes[i - 1] == b'/'),
                _ => {}
            },
        }
    }
    (bytes.len(), false)
}

fn from_roxml(node: roxmltree::Node<'_, '_>) -> Option<DocumentNode> {
    use roxmltree::NodeType;

    match node.node_type() {
        NodeType::Root => Some(DocumentNode::document(
            node.children().filter_map(from_roxml).collect(),
        )),
        NodeType::Element => Some(DocumentNode::element(
            element_name(node),
            element_attributes(node),
            node.children().filter_map(from_roxml).collect(),
        )),
        NodeType::Text => Some(DocumentNode::text(node.text().unwrap_or_default())),
        NodeType::Comment => Some(DocumentNode::comment(node.text().unwrap_or_default())),
        NodeType::PI => node
            .pi()
            .map(|pi| DocumentNode::processing_instruction(pi.target, pi.value.unwrap_or_default())),
    }
}

/// The tag name exactly as the document wrote it. A namespace URI may be
/// bound to several prefixes, so the prefix cannot be recovered from the URI.
fn element_name(node: roxmltree::Node<'_, '_>) -> String {
    let local = node.tag_name().name();
    let written = node
        .document()
        .input_text()
        .get(node.range())
        .and_then(|tag| tag.strip_prefix('<'))
        .and_then(|tag| {
            tag.split(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .next()
        })
        .filter(|name| {
            name.rsplit_once(':')
                .map_or(*name, |(_, written_local)| written_local)
                == local
        });

    match written {
        Some(name) => name.to_string(),
        // Entity-expanded content has no source text of its own.
        None => qualified_name(node, node.tag_name().namespace(), local),
    }
}

fn qualified_name(node: roxmltree::Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    match namespace.and_then(|ns| node.lookup_prefix(ns)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
        _ => local.to_string(),
    }
}

fn element_attributes(node: roxmltree::Node<'_, '_>) -> Vec<Attribute> {
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|parent| parent.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();

    // Only declarations introduced on this element; `xml` is always bound.
    let mut attributes: Vec<Attribute> = node
        .namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| match ns.name() {
            Some(prefix) => Attribute::new(format!("xmlns:{}", prefix), ns.uri()),
            None => Attribute::new("xmlns", ns.uri()),
        })
        .collect();

    attributes.extend(node.attributes().map(|attr| {
        Attribute::new(
            qualified_name(node, attr.namespace(), attr.name()),
            attr.value(),
        )
    }));
    attributes
}

/// One input record as produced by a document source. Either half may be
/// missing when the source could not produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub uri: Option<DocumentUri>,
    pub node: Option<DocumentNode>,
}

impl DocumentRecord {
    pub fn new(uri: DocumentUri, node: DocumentNode) -> Self {
        Self {
            uri: Some(uri),
            node: Some(node),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameValuePair {
    pub name: String,
    pub value: String,
}

impl NameValuePair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Output key. Occurrence keys keep name and value apart so that a delimiter
/// inside either part cannot merge two different pairs while counting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatKey {
    /// Distinct-value count for an element name.
    Element(String),
    /// Occurrence count for one name/value pair.
    Occurrence { name: String, value: String },
}

impl StatKey {
    pub fn occurrence(pair: &NameValuePair) -> Self {
        StatKey::Occurrence {
            name: pair.name.clone(),
            value: pair.value.clone(),
        }
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatKey::Element(name) => f.write_str(name),
            StatKey::Occurrence { name, value } => write!(f, "{}{}{}", name, KEY_DELIMITER, value),
        }
    }
}

/// Result of the transform stage, sorted by rendered key.
#[derive(Debug, Clone, Default)]
pub struct ValueDistribution {
    pub entries: Vec<(StatKey, u64)>,
    pub documents_read: usize,
    pub documents_skipped: usize,
    pub pairs_extracted: usize,
}

impl ValueDistribution {
    /// One `(key,count)` line per entry.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (key, count) in &self.entries {
            out.push_str(&format!("({},{})\n", key, count));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xml_builds_document_tree() {
        let doc = DocumentNode::parse_xml(
            "<?xml version=\"1.0\"?><!-- lead --><book id=\"7\"><title>Dune</title>\n<year>1965</year></book>",
        )
        .unwrap();

        assert_eq!(doc.kind(), NodeKind::Document);
        assert_eq!(doc.children()[0].kind(), NodeKind::Comment);

        let root = doc.document_element().unwrap();
        assert_eq!(root.name(), "book");
        assert_eq!(root.attributes(), &[Attribute::new("id", "7")]);

        let kinds: Vec<NodeKind> = root.children().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![NodeKind::Element, NodeKind::Text, NodeKind::Element]);
    }

    #[test]
    fn test_text_content_concatenates_descendants() {
        let doc = DocumentNode::parse_xml(
            "<r><author><first>Frank</first> <!-- x --><last>Herbert</last></author></r>",
        )
        .unwrap();
        let author = &doc.document_element().unwrap().children()[0];
        assert_eq!(author.text_content(), "Frank Herbert");
    }

    #[test]
    fn test_prefixed_names_are_qualified() {
        let doc = DocumentNode::parse_xml(
            r#"<r xmlns="urn:default" xmlns:dc="urn:dc"><dc:title>T</dc:title><plain>P</plain></r>"#,
        )
        .unwrap();
        let root = doc.document_element().unwrap();
        assert_eq!(root.name(), "r");
        assert_eq!(root.children()[0].name(), "dc:title");
        assert_eq!(root.children()[1].name(), "plain");
        assert!(root
            .attributes()
            .contains(&Attribute::new("xmlns:dc", "urn:dc")));
        assert!(root.attributes().contains(&Attribute::new("xmlns", "urn:default")));
    }

    fn child_names(xml: &str) -> Vec<String> {
        let doc = DocumentNode::parse_xml(xml).unwrap();
        doc.document_element()
            .unwrap()
            .children()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    #[test]
    fn test_names_keep_written_prefix_when_default_namespace_shares_uri() {
        let names = child_names(r#"<r xmlns="urn:x" xmlns:p="urn:x"><a>1</a><p:b>2</p:b></r>"#);
        assert_eq!(names, vec!["a", "p:b"]);
    }

    #[test]
    fn test_names_keep_written_prefix_when_prefixes_share_uri() {
        let names = child_names(r#"<r xmlns:p="urn:x" xmlns:q="urn:x"><p:a>1</p:a><q:a>2</q:a></r>"#);
        assert_eq!(names, vec!["p:a", "q:a"]);
    }

    #[test]
    fn test_written_name_stops_at_attributes_and_self_closing() {
        let names = child_names(
            "<r xmlns:p=\"urn:p\"><p:a\n id=\"1\">x</p:a><b/><c\tk='v'/></r>",
        );
        assert_eq!(names, vec!["p:a", "b", "c"]);
    }

    fn nested(depth: usize) -> String {
        format!("{}{}", "<x>".repeat(depth), "</x>".repeat(depth))
    }

    #[test]
    fn test_nesting_at_limit_is_accepted() {
        let doc = DocumentNode::parse_xml(&nested(MAX_XML_DEPTH)).unwrap();
        assert_eq!(doc.document_element().unwrap().name(), "x");
    }

    #[test]
    fn test_nesting_past_limit_is_an_error() {
        let err = DocumentNode::parse_xml(&nested(MAX_XML_DEPTH + 1)).unwrap_err();
        assert!(matches!(err, EtlError::ProcessingError { .. }));

        let deep = format!("<r><a>{}</a></r>", nested(500));
        assert!(DocumentNode::parse_xml(&deep).is_err());
    }

    #[test]
    fn test_nesting_scan_ignores_markup_that_is_not_an_element() {
        let filler = "<!-- <x> --><![CDATA[<x><x>]]><?pi <x>?><e a=\"x>\" b='/>'/>";
        let xml = format!(
            "<!DOCTYPE x [<!ELEMENT x ANY>]>{}{}{}",
            "<x>".repeat(MAX_XML_DEPTH - 1),
            filler.repeat(20),
            "<x></x>".to_string() + &"</x>".repeat(MAX_XML_DEPTH - 1),
        );
        assert!(DocumentNode::parse_xml(&xml).is_ok());
    }

    #[test]
    fn test_parse_xml_rejects_malformed_input() {
        assert!(DocumentNode::parse_xml("<a><b></a>").is_err());
    }

    #[test]
    fn test_document_element_only_for_documents() {
        let element = DocumentNode::element("a", vec![], vec![]);
        assert!(element.document_element().is_none());
        assert!(DocumentNode::text("x").document_element().is_none());
    }

    #[test]
    fn test_stat_key_rendering() {
        assert_eq!(StatKey::Element("a".into()).to_string(), "a");
        assert_eq!(StatKey::occurrence(&NameValuePair::new("a", "x")).to_string(), "a:x");
    }

    #[test]
    fn test_value_distribution_to_text() {
        let distribution = ValueDistribution {
            entries: vec![
                (StatKey::Element("a".into()), 1),
                (StatKey::occurrence(&NameValuePair::new("a", "x")), 2),
            ],
            ..Default::default()
        };
        assert_eq!(distribution.to_text(), "(a,1)\n(a:x,2)\n");
    }
}
