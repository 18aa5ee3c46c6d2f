use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("XML parsing error: {0}")]
    XmlError(#[from] roxmltree::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Document source error: {message}")]
    SourceError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Output directory already exists: {path}")]
    OutputExistsError { path: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Transient, a rerun may succeed.
    Medium,
    /// Bad input or configuration.
    High,
    /// Broken environment or internal failure.
    Critical,
}

impl EtlError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::ApiError(_) | EtlError::SourceError { .. } => ErrorSeverity::Medium,
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::OutputExistsError { .. }
            | EtlError::XmlError(_)
            | EtlError::JsonError(_) => ErrorSeverity::High,
            EtlError::IoError(_)
            | EtlError::SerializationError { .. }
            | EtlError::ProcessingError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EtlError::ApiError(_) => "Check that the database REST endpoint is reachable and the credentials are valid",
            EtlError::SourceError { .. } => "Check the input settings in the configuration file",
            EtlError::IoError(_) => "Check file permissions and available disk space",
            EtlError::JsonError(_) => "The REST endpoint returned an unexpected payload; check the port points at a REST app server",
            EtlError::XmlError(_) => "Make sure the configuration file is well-formed XML",
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => "Fix the configuration file and run again",
            EtlError::OutputExistsError { .. } => "Remove the output directory or choose a new one",
            EtlError::SerializationError { .. } | EtlError::ProcessingError { .. } => {
                "This is likely a bug; rerun with --verbose and report the log"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
