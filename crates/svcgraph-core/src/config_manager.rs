use crate::{EdgeKind, HttpMethod};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::SvcGraphError {
    fn from(err: ConfigError) -> Self {
        crate::SvcGraphError::Config(err.to_string())
    }
}

/// Main configuration for SvcGraph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvcGraphConfig {
    /// File discovery and per-file parsing limits
    #[serde(default)]
    pub scan: ScanConfig,

    /// Call patterns the code scanner treats as cross-service clients
    #[serde(default = "default_client_patterns")]
    pub clients: Vec<ClientPattern>,

    /// Base confidence per evidence type
    #[serde(default)]
    pub confidence: ConfidenceConfig,

    /// Task generation settings
    #[serde(default)]
    pub benchmark: BenchmarkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SvcGraphConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            clients: default_client_patterns(),
            confidence: ConfidenceConfig::default(),
            benchmark: BenchmarkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Descend into subdirectories
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Source languages to scan (empty = all supported)
    #[serde(default)]
    pub languages: Vec<String>,

    /// Include patterns (gitignore format)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Exclude patterns (gitignore format)
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// File-name globs recognised as API contracts
    #[serde(default = "default_contract_patterns")]
    pub contract_patterns: Vec<String>,

    /// Per-file parse budget; slower files are skipped with a warning
    #[serde(default = "default_parse_timeout_ms")]
    pub parse_timeout_ms: u64,

    /// Files parsed concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            languages: vec![],
            include_patterns: vec![],
            exclude_patterns: vec![],
            contract_patterns: default_contract_patterns(),
            parse_timeout_ms: default_parse_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// A glob over the dotted callee text of a call site, e.g. `requests.*` or `*client.get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPattern {
    pub pattern: String,

    #[serde(default)]
    pub kind: EdgeKind,

    /// Fixed method for clients whose callee name does not carry one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
}

impl ClientPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: EdgeKind::DirectCall,
            method: None,
        }
    }

    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Client call with a literal URL
    #[serde(default = "default_code_literal")]
    pub code_literal: f64,

    /// Client call whose address comes from an environment variable
    #[serde(default = "default_code_env")]
    pub code_env: f64,

    /// `depends_on` / `links`
    #[serde(default = "default_declared_link")]
    pub declared_link: f64,

    /// Connection string or `network_mode` naming another service
    #[serde(default = "default_network_binding")]
    pub network_binding: f64,

    /// NetworkPolicy peers matched by label selector
    #[serde(default = "default_selector_binding")]
    pub selector_binding: f64,

    /// Values that only might be a service reference
    #[serde(default = "default_ambiguous")]
    pub ambiguous: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            code_literal: default_code_literal(),
            code_env: default_code_env(),
            declared_link: default_declared_link(),
            network_binding: default_network_binding(),
            selector_binding: default_selector_binding(),
            ambiguous: default_ambiguous(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Sentinel inserted where a span was removed
    #[serde(default = "default_mask_marker")]
    pub mask_marker: String,

    /// Masking strategies to run, by name
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,

    /// Cap on completion tasks per strategy (None = unlimited)
    #[serde(default)]
    pub max_tasks_per_strategy: Option<usize>,

    /// Edges below this confidence are left out of the dataset graph and every task
    #[serde(default = "default_min_task_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_true")]
    pub question_answering: bool,

    #[serde(default = "default_true")]
    pub summarization: bool,

    #[serde(default = "default_true")]
    pub verification: bool,

    /// Negative verification samples generated per positive edge
    #[serde(default = "default_negatives_per_edge")]
    pub negatives_per_edge: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            mask_marker: default_mask_marker(),
            strategies: default_strategies(),
            max_tasks_per_strategy: None,
            min_confidence: default_min_task_confidence(),
            question_answering: true,
            summarization: true,
            verification: true,
            negatives_per_edge: default_negatives_per_edge(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty" or "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

pub const KNOWN_STRATEGIES: [&str; 4] = ["url-port", "invocation-port", "endpoint-path", "connection-host"];

// Default value functions
fn default_true() -> bool {
    true
}
fn default_contract_patterns() -> Vec<String> {
    vec![
        "**/openapi*.{yaml,yml,json}".to_string(),
        "**/swagger*.{yaml,yml,json}".to_string(),
        "**/*.openapi.{yaml,yml,json}".to_string(),
    ]
}
fn default_parse_timeout_ms() -> u64 {
    5_000
}
fn default_max_concurrency() -> usize {
    num_cpus::get().max(1)
}
pub fn default_client_patterns() -> Vec<ClientPattern> {
    vec![
        ClientPattern::new("requests.*"),
        ClientPattern::new("httpx.*"),
        ClientPattern::new("*session.get"),
        ClientPattern::new("*session.post"),
        ClientPattern::new("axios.*"),
        ClientPattern::new("fetch"),
        ClientPattern::new("http.Get"),
        ClientPattern::new("http.Post"),
        ClientPattern::new("http.Head"),
        ClientPattern::new("http.NewRequest"),
        ClientPattern::new("restTemplate.*"),
        ClientPattern::new("reqwest.*"),
        ClientPattern::new("*client.get"),
        ClientPattern::new("*client.post"),
        ClientPattern::new("*client.put"),
        ClientPattern::new("*client.delete"),
        ClientPattern::new("*client.patch"),
    ]
}
fn default_code_literal() -> f64 {
    0.7
}
fn default_code_env() -> f64 {
    0.6
}
fn default_declared_link() -> f64 {
    0.9
}
fn default_network_binding() -> f64 {
    0.75
}
fn default_selector_binding() -> f64 {
    0.8
}
fn default_ambiguous() -> f64 {
    0.3
}
fn default_mask_marker() -> String {
    "<MASK>".to_string()
}
fn default_strategies() -> Vec<String> {
    KNOWN_STRATEGIES.iter().map(|s| s.to_string()).collect()
}
fn default_min_task_confidence() -> f64 {
    0.5
}
fn default_negatives_per_edge() -> usize {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: SvcGraphConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Explicit config file, else `.svcgraph.toml`, else `~/.svcgraph/config.toml`
    /// 3. Defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let (config, config_path) = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                (Self::read_toml_file(path)?, Some(path.to_path_buf()))
            }
            None => Self::load_config_file()?,
        };

        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Loaded configuration from {}", path.display()),
            None => info!("No config file found, using defaults"),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn from_config(config: SvcGraphConfig) -> Result<Self, ConfigError> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: None,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
        }
    }

    fn load_config_file() -> Result<(SvcGraphConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".svcgraph.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".svcgraph").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((SvcGraphConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<SvcGraphConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: SvcGraphConfig) -> SvcGraphConfig {
        if let Ok(timeout) = std::env::var("SVCGRAPH_PARSE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                config.scan.parse_timeout_ms = ms;
            }
        }
        if let Ok(concurrency) = std::env::var("SVCGRAPH_MAX_CONCURRENCY") {
            if let Ok(n) = concurrency.parse() {
                config.scan.max_concurrency = n;
            }
        }
        if let Ok(languages) = std::env::var("SVCGRAPH_LANGUAGES") {
            config.scan.languages = languages
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(marker) = std::env::var("SVCGRAPH_MASK_MARKER") {
            config.benchmark.mask_marker = marker;
        }
        if let Ok(level) = std::env::var("SVCGRAPH_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    pub fn validate_config(config: &SvcGraphConfig) -> Result<(), ConfigError> {
        if config.scan.parse_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scan.parse_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if config.scan.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "scan.max_concurrency must be greater than zero".to_string(),
            ));
        }

        for client in &config.clients {
            if client.pattern.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "client patterns must not be empty".to_string(),
                ));
            }
        }

        let c = &config.confidence;
        for (name, value) in [
            ("code_literal", c.code_literal),
            ("code_env", c.code_env),
            ("declared_link", c.declared_link),
            ("network_binding", c.network_binding),
            ("selector_binding", c.selector_binding),
            ("ambiguous", c.ambiguous),
            ("benchmark.min_confidence", config.benchmark.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "confidence {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if c.ambiguous > c.network_binding {
            return Err(ConfigError::ValidationError(
                "confidence.ambiguous must not exceed confidence.network_binding".to_string(),
            ));
        }

        if config.benchmark.mask_marker.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "benchmark.mask_marker must not be empty".to_string(),
            ));
        }
        for strategy in &config.benchmark.strategies {
            if !KNOWN_STRATEGIES.contains(&strategy.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown masking strategy: {}. Must be one of: {}",
                    strategy,
                    KNOWN_STRATEGIES.join(", ")
                )));
            }
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        if !matches!(config.logging.format.as_str(), "pretty" | "compact") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {}. Must be pretty or compact",
                config.logging.format
            )));
        }

        Ok(())
    }

    pub fn config(&self) -> &SvcGraphConfig {
        &self.config
    }

    pub fn into_config(self) -> SvcGraphConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = SvcGraphConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::ReadError(e.to_string()))?;
            }
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SvcGraphConfig::default();
        assert_eq!(config.benchmark.mask_marker, "<MASK>");
        assert_eq!(config.benchmark.strategies.len(), KNOWN_STRATEGIES.len());
        assert!(config.scan.parse_timeout_ms > 0);
    }

    #[test]
    fn test_config_validation() {
        let config = SvcGraphConfig::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        let mut bad_config = config.clone();
        bad_config.benchmark.strategies.push("random".to_string());
        assert!(ConfigManager::validate_config(&bad_config).is_err());

        let mut bad_config = config.clone();
        bad_config.confidence.declared_link = 1.5;
        assert!(ConfigManager::validate_config(&bad_config).is_err());

        let mut bad_config = config;
        bad_config.scan.parse_timeout_ms = 0;
        assert!(ConfigManager::validate_config(&bad_config).is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SvcGraphConfig = toml::from_str(
            r#"
[scan]
parse_timeout_ms = 250

[[clients]]
pattern = "kafka.send"
kind = "messaging"
"#,
        )
        .unwrap();
        assert_eq!(config.scan.parse_timeout_ms, 250);
        assert!(config.scan.recursive);
        assert_eq!(config.clients.len(), 1);
        assert_eq!(config.clients[0].kind, EdgeKind::Messaging);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        ConfigManager::create_default_config(&path).unwrap();
        let manager = ConfigManager::load(Some(&path)).unwrap();
        assert_eq!(manager.config_path(), Some(path.as_path()));
        assert!(!manager.config().clients.is_empty());
    }
}
