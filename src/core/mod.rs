pub mod codec;
pub mod dataflow;
pub mod etl;
pub mod pipeline;
pub mod transforms;

pub use crate::domain::model::{DocumentRecord, ValueDistribution};
pub use crate::domain::ports::{DocumentSource, Pipeline, Storage};
pub use crate::utils::error::Result;
