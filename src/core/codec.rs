//! Binary encoding for the connector's document types, used when records are
//! moved across a repartition boundary.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! text   := len:u32 utf8-bytes
//! uri    := text
//! node   := kind:u8 name:text value:text n_attrs:u32 (text text)* n_children:u32 node*
//! record := flags:u8 [uri] [node]        flags bit 0 = uri, bit 1 = node
//! ```

use crate::domain::model::{
    Attribute, DocumentNode, DocumentRecord, DocumentUri, NodeKind, MAX_XML_DEPTH,
};
use crate::utils::error::{EtlError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rayon::prelude::*;
use std::hash::Hasher;

const HAS_URI: u8 = 0b01;
const HAS_NODE: u8 = 0b10;
// Document node above the elements, text below the deepest one.
const MAX_NODE_DEPTH: usize = MAX_XML_DEPTH + 1;

pub trait Codec: Sized {
    fn encode(&self, out: &mut BytesMut) -> Result<()>;
    fn decode(input: &mut Bytes) -> Result<Self>;
}

impl Codec for DocumentUri {
    fn encode(&self, out: &mut BytesMut) -> Result<()> {
        put_text(out, self.as_str())
    }

    fn decode(input: &mut Bytes) -> Result<Self> {
        Ok(DocumentUri::new(get_text(input)?))
    }
}

impl Codec for DocumentNode {
    fn encode(&self, out: &mut BytesMut) -> Result<()> {
        encode_node(self, out, 0)
    }

    fn decode(input: &mut Bytes) -> Result<Self> {
        decode_node(input, 0)
    }
}

impl Codec for DocumentRecord {
    fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let mut flags = 0;
        if self.uri.is_some() {
            flags |= HAS_URI;
        }
        if self.node.is_some() {
            flags |= HAS_NODE;
        }
        out.put_u8(flags);
        if let Some(uri) = &self.uri {
            uri.encode(out)?;
        }
        if let Some(node) = &self.node {
            node.encode(out)?;
        }
        Ok(())
    }

    fn decode(input: &mut Bytes) -> Result<Self> {
        let flags = get_u8(input)?;
        if flags & !(HAS_URI | HAS_NODE) != 0 {
            return Err(corrupt(format!("unknown record flags {:#04x}", flags)));
        }
        let uri = if flags & HAS_URI != 0 {
            Some(DocumentUri::decode(input)?)
        } else {
            None
        };
        let node = if flags & HAS_NODE != 0 {
            Some(DocumentNode::decode(input)?)
        } else {
            None
        };
        Ok(DocumentRecord { uri, node })
    }
}

/// Hash-partitions records by URI, encodes each partition and decodes the
/// partitions back in parallel. Output is partition-major.
pub fn repartition(records: Vec<DocumentRecord>, partitions: usize) -> Result<Vec<DocumentRecord>> {
    if partitions == 0 {
        return Err(EtlError::ProcessingError {
            message: "repartition needs at least one partition".to_string(),
        });
    }

    let mut buffers: Vec<BytesMut> = (0..partitions).map(|_| BytesMut::new()).collect();
    let mut counts = vec![0usize; partitions];
    for record in &records {
        let index = partition_for(record, partitions);
        record.encode(&mut buffers[index])?;
        counts[index] += 1;
    }
    drop(records);

    let decoded = buffers
        .into_par_iter()
        .zip(counts)
        .map(|(buffer, count)| decode_partition(buffer.freeze(), count))
        .collect::<Result<Vec<_>>>()?;

    Ok(decoded.into_iter().flatten().collect())
}

fn partition_for(record: &DocumentRecord, partitions: usize) -> usize {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(record.uri.as_ref().map(|u| u.as_str()).unwrap_or_default().as_bytes());
    (hasher.finish() % partitions as u64) as usize
}

fn decode_partition(mut input: Bytes, count: usize) -> Result<Vec<DocumentRecord>> {
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(DocumentRecord::decode(&mut input)?);
    }
    if input.has_remaining() {
        return Err(corrupt(format!("{} trailing bytes in partition", input.remaining())));
    }
    Ok(records)
}

fn encode_node(node: &DocumentNode, out: &mut BytesMut, depth: usize) -> Result<()> {
    if depth > MAX_NODE_DEPTH {
        return Err(corrupt(format!("node nesting deeper than {}", MAX_NODE_DEPTH)));
    }
    out.put_u8(kind_tag(node.kind()));
    put_text(out, node.name())?;
    put_text(out, node.value())?;
    put_len(out, node.attributes().len())?;
    for attr in node.attributes() {
        put_text(out, &attr.name)?;
        put_text(out, &attr.value)?;
    }
    put_len(out, node.children().len())?;
    for child in node.children() {
        encode_node(child, out, depth + 1)?;
    }
    Ok(())
}

fn decode_node(input: &mut Bytes, depth: usize) -> Result<DocumentNode> {
    if depth > MAX_NODE_DEPTH {
        return Err(corrupt(format!("node nesting deeper than {}", MAX_NODE_DEPTH)));
    }
    let tag = get_u8(input)?;
    let kind = kind_from_tag(tag).ok_or_else(|| corrupt(format!("unknown node kind {}", tag)))?;
    let name = get_text(input)?;
    let value = get_text(input)?;

    let n_attrs = get_u32(input)?;
    let mut attributes = Vec::new();
    for _ in 0..n_attrs {
        let name = get_text(input)?;
        let value = get_text(input)?;
        attributes.push(Attribute { name, value });
    }

    let n_children = get_u32(input)?;
    let mut children = Vec::new();
    for _ in 0..n_children {
        children.push(decode_node(input, depth + 1)?);
    }

    Ok(DocumentNode::with_parts(kind, name, value, attributes, children))
}

// DOM node type numbers.
fn kind_tag(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::Element => 1,
        NodeKind::Text => 3,
        NodeKind::ProcessingInstruction => 7,
        NodeKind::Comment => 8,
        NodeKind::Document => 9,
    }
}

fn kind_from_tag(tag: u8) -> Option<NodeKind> {
    match tag {
        1 => Some(NodeKind::Element),
        3 => Some(NodeKind::Text),
        7 => Some(NodeKind::ProcessingInstruction),
        8 => Some(NodeKind::Comment),
        9 => Some(NodeKind::Document),
        _ => None,
    }
}

fn put_len(out: &mut BytesMut, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| corrupt(format!("length {} does not fit in u32", len)))?;
    out.put_u32(len);
    Ok(())
}

fn put_text(out: &mut BytesMut, s: &str) -> Result<()> {
    put_len(out, s.len())?;
    out.put_slice(s.as_bytes());
    Ok(())
}

fn ensure_remaining(input: &Bytes, needed: usize) -> Result<()> {
    if input.remaining() < needed {
        return Err(corrupt(format!(
            "unexpected end of input: need {} bytes, have {}",
            needed,
            input.remaining()
        )));
    }
    Ok(())
}

fn get_u8(input: &mut Bytes) -> Result<u8> {
    ensure_remaining(input, 1)?;
    Ok(input.get_u8())
}

fn get_u32(input: &mut Bytes) -> Result<u32> {
    ensure_remaining(input, 4)?;
    Ok(input.get_u32())
}

fn get_text(input: &mut Bytes) -> Result<String> {
    let len = get_u32(input)? as usize;
    ensure_remaining(input, len)?;
    let raw = input.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|e| corrupt(format!("invalid UTF-8 in text: {}", e)))
}

fn corrupt(message: String) -> EtlError {
    EtlError::SerializationError { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(uri: &str) -> DocumentRecord {
        let xml = format!(
            r#"<book xmlns:dc="urn:dc" id="{uri}"><dc:title>Dune</dc:title><!--note--><year>1965</year><?render fast?></book>"#
        );
        DocumentRecord::new(DocumentUri::new(uri), DocumentNode::parse_xml(&xml).unwrap())
    }

    #[test]
    fn test_record_survives_encoding() {
        let record = sample_record("/books/1.xml");
        let mut buffer = BytesMut::new();
        record.encode(&mut buffer).unwrap();

        let mut input = buffer.freeze();
        let decoded = DocumentRecord::decode(&mut input).unwrap();

        assert_eq!(decoded, record);
        assert!(!input.has_remaining());
    }

    #[test]
    fn test_incomplete_record_survives_encoding() {
        let record = DocumentRecord {
            uri: None,
            node: Some(DocumentNode::text("plain")),
        };
        let mut buffer = BytesMut::new();
        record.encode(&mut buffer).unwrap();

        assert_eq!(DocumentRecord::decode(&mut buffer.freeze()).unwrap(), record);
    }

    #[test]
    fn test_truncated_input_is_a_serialization_error() {
        let mut buffer = BytesMut::new();
        sample_record("/a.xml").encode(&mut buffer).unwrap();
        let full = buffer.freeze();

        let mut truncated = full.slice(..full.len() - 3);
        let err = DocumentRecord::decode(&mut truncated).unwrap_err();
        assert!(matches!(err, EtlError::SerializationError { .. }));
    }

    #[test]
    fn test_unknown_node_kind_is_rejected() {
        let mut buffer = BytesMut::new();
        buffer.put_u8(HAS_NODE);
        buffer.put_u8(42);
        let err = DocumentRecord::decode(&mut buffer.freeze()).unwrap_err();
        assert!(err.to_string().contains("unknown node kind 42"));
    }

    fn element_chain(depth: usize) -> DocumentNode {
        (0..depth).fold(DocumentNode::text("leaf"), |child, _| {
            DocumentNode::element("x", vec![], vec![child])
        })
    }

    #[test]
    fn test_deepest_parseable_document_survives_encoding() {
        let xml = format!("{}{}", "<x>".repeat(MAX_XML_DEPTH), "</x>".repeat(MAX_XML_DEPTH));
        let xml = xml.replacen("</x>", "leaf</x>", 1);
        let record = DocumentRecord::new(
            DocumentUri::new("/deep.xml"),
            DocumentNode::parse_xml(&xml).unwrap(),
        );

        let mut buffer = BytesMut::new();
        record.encode(&mut buffer).unwrap();
        assert_eq!(DocumentRecord::decode(&mut buffer.freeze()).unwrap(), record);
    }

    #[test]
    fn test_over_deep_node_is_rejected() {
        let node = DocumentNode::document(vec![element_chain(MAX_NODE_DEPTH + 1)]);
        let mut buffer = BytesMut::new();
        let err = node.encode(&mut buffer).unwrap_err();
        assert!(matches!(err, EtlError::SerializationError { .. }));
    }

    #[test]
    fn test_repartition_keeps_every_record() {
        let mut records: Vec<DocumentRecord> =
            (0..25).map(|i| sample_record(&format!("/books/{}.xml", i))).collect();
        records.push(DocumentRecord {
            uri: None,
            node: None,
        });

        let mut shuffled = repartition(records.clone(), 4).unwrap();

        let key = |r: &DocumentRecord| r.uri.as_ref().map(|u| u.as_str().to_string());
        records.sort_by_key(key);
        shuffled.sort_by_key(key);
        assert_eq!(shuffled, records);
    }

    #[test]
    fn test_repartition_rejects_zero_partitions() {
        assert!(repartition(vec![sample_record("/a.xml")], 0).is_err());
    }
}
