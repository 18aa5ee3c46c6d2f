// Adapters layer: concrete implementations of the domain ports (document sources, output storage).

pub mod directory_source;
pub mod rest_source;
pub mod storage;

pub use directory_source::DirectorySource;
pub use rest_source::{RestSource, RestSourceOptions};
pub use storage::LocalStorage;

use crate::config::connector::{ConnectorConfig, SourceKind};
use crate::domain::model::{DocumentNode, DocumentRecord, DocumentUri};
use crate::domain::ports::DocumentSource;
use crate::utils::error::Result;
use async_trait::async_trait;

/// The source selected by `docstats.input.type`.
pub enum ConfiguredSource {
    Directory(DirectorySource),
    Rest(RestSource),
}

pub fn source_from_config(config: &ConnectorConfig) -> Result<ConfiguredSource> {
    match config.source_kind()? {
        SourceKind::Directory => Ok(ConfiguredSource::Directory(DirectorySource::from_config(
            config,
        )?)),
        SourceKind::Rest => Ok(ConfiguredSource::Rest(RestSource::new(
            RestSourceOptions::from_config(config)?,
        )?)),
    }
}

#[async_trait]
impl DocumentSource for ConfiguredSource {
    async fn read_documents(&self) -> Result<Vec<DocumentRecord>> {
        match self {
            ConfiguredSource::Directory(source) => source.read_documents().await,
            ConfiguredSource::Rest(source) => source.read_documents().await,
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfiguredSource::Directory(source) => source.describe(),
            ConfiguredSource::Rest(source) => source.describe(),
        }
    }
}

/// XML content becomes a parsed document, anything else a text node. XML
/// that fails to parse yields a record without a node.
pub(crate) fn record_from_content(uri: DocumentUri, content: Vec<u8>, is_xml: bool) -> DocumentRecord {
    if !is_xml {
        return DocumentRecord::new(uri, DocumentNode::text(String::from_utf8_lossy(&content)));
    }

    let parsed = String::from_utf8(content)
        .map_err(|e| e.to_string())
        .and_then(|text| {
            DocumentNode::parse_xml(text.strip_prefix('\u{feff}').unwrap_or(&text))
                .map_err(|e| e.to_string())
        });

    match parsed {
        Ok(node) => DocumentRecord::new(uri, node),
        Err(error) => {
            tracing::warn!(uri = %uri, %error, "Could not parse XML document");
            DocumentRecord {
                uri: Some(uri),
                node: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::connector::{INPUT_DIR, INPUT_HOST};
    use crate::domain::model::NodeKind;

    #[test]
    fn test_record_from_content() {
        let xml = record_from_content(DocumentUri::new("/a.xml"), b"\xef\xbb\xbf<r/>".to_vec(), true);
        assert_eq!(xml.node.unwrap().kind(), NodeKind::Document);

        let json = record_from_content(DocumentUri::new("/a.json"), b"{}".to_vec(), false);
        assert_eq!(json.node.unwrap().kind(), NodeKind::Text);

        let broken = record_from_content(DocumentUri::new("/b.xml"), b"<r>".to_vec(), true);
        assert!(broken.uri.is_some());
        assert!(broken.node.is_none());
    }

    #[test]
    fn test_over_deep_document_becomes_unusable_record() {
        let xml = format!("<r><a>{}{}</a></r>", "<x>".repeat(500), "</x>".repeat(500));
        let record = record_from_content(DocumentUri::new("/deep.xml"), xml.into_bytes(), true);
        assert_eq!(record.uri.as_ref().map(|u| u.as_str()), Some("/deep.xml"));
        assert!(record.node.is_none());
    }

    #[test]
    fn test_source_from_config_selects_adapter() {
        let mut config = ConnectorConfig::new();
        config.set(INPUT_DIR, "/srv/corpus");
        assert!(matches!(
            source_from_config(&config).unwrap(),
            ConfiguredSource::Directory(_)
        ));

        config.set(INPUT_HOST, "localhost");
        assert!(matches!(
            source_from_config(&config).unwrap(),
            ConfiguredSource::Rest(_)
        ));
    }
}
