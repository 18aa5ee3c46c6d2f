use crate::config::connector::ConnectorConfig;
use crate::core::codec;
use crate::core::dataflow::{group_by_key, reduce_by_key};
use crate::core::transforms::{
    distinct_value_count, document_element, extract_name_value_pairs, is_significant,
    occurrence_count, sum_counts,
};
use crate::core::{DocumentRecord, DocumentSource, Pipeline, Storage, ValueDistribution};
use crate::domain::model::{NameValuePair, StatKey};
use crate::utils::error::{EtlError, Result};
use rayon::prelude::*;

pub const PART_FILE: &str = "part-00000";
pub const SUCCESS_MARKER: &str = "_SUCCESS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Partitions for the codec round trip before extraction; 0 skips it.
    pub repartition: usize,
}

impl PipelineOptions {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        Ok(Self {
            repartition: config.repartition()?,
        })
    }
}

pub struct ElementStatsPipeline<Src: DocumentSource, S: Storage> {
    source: Src,
    storage: S,
    options: PipelineOptions,
}

impl<Src: DocumentSource, S: Storage> ElementStatsPipeline<Src, S> {
    pub fn new(source: Src, storage: S, options: PipelineOptions) -> Self {
        Self {
            source,
            storage,
            options,
        }
    }
}

#[async_trait::async_trait]
impl<Src: DocumentSource, S: Storage> Pipeline for ElementStatsPipeline<Src, S> {
    async fn extract(&self) -> Result<Vec<DocumentRecord>> {
        // Fail before reading the corpus.
        if self.storage.has_output().await? {
            return Err(EtlError::OutputExistsError {
                path: self.storage.location().to_string(),
            });
        }

        tracing::debug!("Reading documents from {}", self.source.describe());
        let documents = self.source.read_documents().await?;

        if self.options.repartition == 0 {
            return Ok(documents);
        }

        let partitions = self.options.repartition;
        tracing::debug!("Repartitioning {} documents into {} partitions", documents.len(), partitions);
        tokio::task::spawn_blocking(move || codec::repartition(documents, partitions))
            .await
            .map_err(|e| EtlError::ProcessingError {
                message: format!("repartition task failed: {}", e),
            })?
    }

    async fn transform(&self, documents: Vec<DocumentRecord>) -> Result<ValueDistribution> {
        tokio::task::spawn_blocking(move || compute_distribution(&documents))
            .await
            .map_err(|e| EtlError::ProcessingError {
                message: format!("transform task failed: {}", e),
            })
    }

    async fn load(&self, result: ValueDistribution) -> Result<String> {
        let output_path = format!("{}/{}", self.storage.location(), PART_FILE);

        tracing::debug!("Writing {} lines to {}", result.entries.len(), output_path);
        self.storage
            .write_file(PART_FILE, result.to_text().as_bytes())
            .await?;
        self.storage.write_file(SUCCESS_MARKER, b"").await?;

        Ok(output_path)
    }
}

/// extract -> {distinct values per name, significant name:value counts} ->
/// union -> sort by rendered key (UTF-16 code unit order).
pub fn compute_distribution(documents: &[DocumentRecord]) -> ValueDistribution {
    let documents_skipped = documents
        .par_iter()
        .filter(|record| document_element(record).is_none())
        .count();

    let pairs: Vec<NameValuePair> = documents
        .par_iter()
        .flat_map_iter(|record| extract_name_value_pairs(record))
        .collect();

    let (distinct, occurrences) = rayon::join(
        || count_distinct_values(&pairs),
        || count_significant_occurrences(&pairs),
    );

    let mut entries = distinct;
    entries.extend(occurrences);
    entries.sort_by_cached_key(|(key, _)| (utf16_order(key), key_rank(key)));

    ValueDistribution {
        entries,
        documents_read: documents.len(),
        documents_skipped,
        pairs_extracted: pairs.len(),
    }
}

fn count_distinct_values(pairs: &[NameValuePair]) -> Vec<(StatKey, u64)> {
    group_by_key(
        pairs
            .par_iter()
            .map(|pair| (pair.name.as_str(), pair.value.as_str())),
    )
    .into_par_iter()
    .map(|(name, values)| (StatKey::Element(name.to_string()), distinct_value_count(values)))
    .collect()
}

fn count_significant_occurrences(pairs: &[NameValuePair]) -> Vec<(StatKey, u64)> {
    reduce_by_key(pairs.par_iter().map(occurrence_count), sum_counts)
        .into_par_iter()
        .filter(is_significant)
        .collect()
}

// Rendered keys compare by UTF-16 code unit, so supplementary characters sort
// before U+E000..U+FFFF as they do in the original job's output.
fn utf16_order(key: &StatKey) -> Vec<u16> {
    key.to_string().encode_utf16().collect()
}

// Orders an element count before an occurrence key that renders the same.
fn key_rank(key: &StatKey) -> u8 {
    match key {
        StatKey::Element(_) => 0,
        StatKey::Occurrence { .. } => 1,
    }
}
