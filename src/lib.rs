pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{source_from_config, ConfiguredSource, DirectorySource, LocalStorage, RestSource};
pub use config::connector::ConnectorConfig;
pub use core::{
    etl::EtlEngine,
    pipeline::{ElementStatsPipeline, PipelineOptions},
};
pub use utils::error::{EtlError, Result};
