use thiserror::Error;

#[derive(Error, Debug)]
pub enum SvcGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Timed out after {millis}ms: {path}")]
    Timeout { path: String, millis: u64 },

    #[error("No input sources found under {0}: no contracts, source files or manifests")]
    NoInputs(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl SvcGraphError {
    pub fn parse(msg: impl Into<String>) -> Self {
        SvcGraphError::Parse(msg.into())
    }

    /// Whether the run can continue with reduced coverage after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SvcGraphError::NoInputs(_) | SvcGraphError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, SvcGraphError>;
