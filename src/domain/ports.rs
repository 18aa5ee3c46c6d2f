use crate::domain::model::{DocumentRecord, ValueDistribution};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    /// True when the storage location already holds output.
    fn has_output(&self) -> impl std::future::Future<Output = Result<bool>> + Send;
    fn location(&self) -> &str;
}

/// Connector side of the pipeline: yields every document in the input set.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn read_documents(&self) -> Result<Vec<DocumentRecord>>;
    fn describe(&self) -> String;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<DocumentRecord>>;
    async fn transform(&self, documents: Vec<DocumentRecord>) -> Result<ValueDistribution>;
    async fn load(&self, result: ValueDistribution) -> Result<String>;
}
