use crate::core::Pipeline;
use crate::utils::error::Result;
use std::time::Instant;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<String> {
        let started = Instant::now();
        tracing::info!("Starting element statistics run");

        // Extract
        let stage = Instant::now();
        let documents = self.pipeline.extract().await?;
        tracing::info!("Extracted {} documents in {:?}", documents.len(), stage.elapsed());

        // Transform
        let stage = Instant::now();
        let distribution = self.pipeline.transform(documents).await?;
        if distribution.documents_skipped > 0 {
            tracing::warn!(
                "⚠️ Skipped {} of {} documents that were not XML documents",
                distribution.documents_skipped,
                distribution.documents_read
            );
        }
        tracing::info!(
            "Computed {} statistics from {} name/value pairs in {:?}",
            distribution.entries.len(),
            distribution.pairs_extracted,
            stage.elapsed()
        );

        // Load
        let stage = Instant::now();
        let output_path = self.pipeline.load(distribution).await?;
        tracing::info!("Output saved to: {} ({:?})", output_path, stage.elapsed());

        tracing::info!("Run finished in {:?}", started.elapsed());
        Ok(output_path)
    }
}
