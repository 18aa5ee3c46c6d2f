//! The per-record callbacks the pipeline is assembled from.

use crate::domain::model::{DocumentNode, DocumentRecord, NameValuePair, NodeKind, StatKey};
use std::collections::HashSet;
use std::hash::Hash;

/// Occurrence counts at or below this are dropped from the output.
pub const SIGNIFICANCE_THRESHOLD: u64 = 1;

/// The document element of a record, if the record carries a URI and an XML
/// document with a root element.
pub fn document_element(record: &DocumentRecord) -> Option<&DocumentNode> {
    record.uri.as_ref()?;
    let node = record.node.as_ref()?;
    if node.kind() != NodeKind::Document {
        return None;
    }
    node.document_element()
}

/// (name, textContent) for every element child of the document element.
/// Records that are not XML documents yield nothing and are logged.
pub fn extract_name_value_pairs(
    record: &DocumentRecord,
) -> impl Iterator<Item = NameValuePair> + '_ {
    let root = document_element(record);
    if root.is_none() {
        tracing::warn!(
            uri = %record.uri.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            node = %record.node.as_ref().map(|n| n.to_string()).unwrap_or_else(|| "<none>".to_string()),
            "Skipping record that is not an XML document"
        );
    }

    root.into_iter()
        .flat_map(|root| root.children().iter())
        .filter(|child| child.kind() == NodeKind::Element)
        .map(|child| NameValuePair::new(child.name(), child.text_content()))
}

pub fn occurrence_count(pair: &NameValuePair) -> (StatKey, u64) {
    (StatKey::occurrence(pair), 1)
}

/// Saturates at `u64::MAX`.
pub fn sum_counts(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

pub fn is_significant(entry: &(StatKey, u64)) -> bool {
    entry.1 > SIGNIFICANCE_THRESHOLD
}

pub fn distinct_value_count<I>(values: I) -> u64
where
    I: IntoIterator,
    I::Item: Eq + Hash,
{
    values.into_iter().collect::<HashSet<_>>().len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::DocumentUri;

    fn record(xml: &str) -> DocumentRecord {
        DocumentRecord::new(DocumentUri::new("/doc.xml"), DocumentNode::parse_xml(xml).unwrap())
    }

    #[test]
    fn test_extracts_only_element_children() {
        let doc = record("<r>lead<a>x</a><!--c--><b>y<i>z</i></b><?p q?>tail</r>");
        let pairs: Vec<_> = extract_name_value_pairs(&doc).collect();
        assert_eq!(
            pairs,
            vec![NameValuePair::new("a", "x"), NameValuePair::new("b", "yz")]
        );
    }

    #[test]
    fn test_extracts_repeated_names_each_time() {
        let doc = record("<r><a>x</a><a>x</a><a/></r>");
        let pairs: Vec<_> = extract_name_value_pairs(&doc).collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2], NameValuePair::new("a", ""));
    }

    #[test]
    fn test_skips_incomplete_records() {
        let no_uri = DocumentRecord {
            uri: None,
            node: Some(DocumentNode::parse_xml("<r><a>x</a></r>").unwrap()),
        };
        let no_node = DocumentRecord {
            uri: Some(DocumentUri::new("/missing.xml")),
            node: None,
        };
        let text_doc = DocumentRecord::new(DocumentUri::new("/a.txt"), DocumentNode::text("a b c"));
        let bare_element = DocumentRecord::new(
            DocumentUri::new("/e.xml"),
            DocumentNode::element("r", vec![], vec![DocumentNode::element("a", vec![], vec![])]),
        );

        for r in [no_uri, no_node, text_doc, bare_element] {
            assert!(document_element(&r).is_none());
            assert_eq!(extract_name_value_pairs(&r).count(), 0);
        }
    }

    #[test]
    fn test_occurrence_count_is_one() {
        let (key, count) = occurrence_count(&NameValuePair::new("a", "x"));
        assert_eq!(key.to_string(), "a:x");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_sum_counts_saturates() {
        assert_eq!(sum_counts(2, 3), 5);
        assert_eq!(sum_counts(u64::MAX, 1), u64::MAX);
    }

    #[test]
    fn test_significance_boundary() {
        let key = StatKey::Element("a".into());
        assert!(!is_significant(&(key.clone(), 0)));
        assert!(!is_significant(&(key.clone(), 1)));
        assert!(is_significant(&(key, 2)));
    }

    #[test]
    fn test_distinct_value_count() {
        assert_eq!(distinct_value_count(["x", "y", "x", "X"]), 3);
        assert_eq!(distinct_value_count(Vec::<String>::new()), 0);
    }
}
