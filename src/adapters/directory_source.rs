use crate::adapters::record_from_content;
use crate::config::connector::{ConnectorConfig, DEFAULT_PATTERN, INPUT_DIR, INPUT_PATTERN};
use crate::domain::model::{DocumentRecord, DocumentUri};
use crate::domain::ports::DocumentSource;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_required_field;
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Reads every file under a directory whose relative path matches a glob.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    pattern: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            pattern: pattern.into(),
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        let dir = validate_required_field(INPUT_DIR, config.get(INPUT_DIR))?;
        Ok(Self::new(
            dir.trim(),
            config.get_or(INPUT_PATTERN, DEFAULT_PATTERN).trim(),
        ))
    }

    fn matching_paths(&self) -> Result<Vec<PathBuf>> {
        let pattern = Pattern::new(&self.pattern).map_err(|e| EtlError::InvalidConfigValueError {
            field: INPUT_PATTERN.to_string(),
            value: self.pattern.clone(),
            reason: e.to_string(),
        })?;
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::new()
        };

        if !self.root.is_dir() {
            return Err(EtlError::SourceError {
                message: format!("input directory {} does not exist", self.root.display()),
            });
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| EtlError::SourceError {
                message: format!("walking {}: {}", self.root.display(), e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            if pattern.matches_path_with(relative, options) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn uri_for(&self, path: &Path) -> DocumentUri {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        DocumentUri::new(format!("/{}", segments.join("/")))
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn read_documents(&self) -> Result<Vec<DocumentRecord>> {
        let paths = self.matching_paths()?;
        tracing::debug!("{} files match {} under {}", paths.len(), self.pattern, self.root.display());

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path).await?;
            let is_xml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("xml"));
            records.push(record_from_content(self.uri_for(&path), bytes, is_xml));
        }
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("directory {} ({})", self.root.display(), self.pattern)
    }
}
