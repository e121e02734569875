use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SUMMARIZER_MODEL: &str = "facebook/bart-large-cnn";
const HUGGING_FACE_MODELS_URL: &str = "https://api-inference.huggingface.co/models";
const DEFAULT_LOG_FILE: &str = "logs/summary-ingest.log";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Explicitly requested env file could not be read.
    #[error("Failed to load env file {path}: {source}")]
    EnvFile {
        /// Requested file.
        path: PathBuf,
        /// Loader failure.
        #[source]
        source: dotenvy::Error,
    },
}

/// Runtime configuration for the ingestion server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres DSN for the tenant registry.
    pub database_url: String,
    /// Upper bound on pooled registry connections.
    pub database_max_connections: u32,
    /// Base URL of the Qdrant instance holding tenant workspaces.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Dimension of the summary vectors stored with each document record.
    pub workspace_vector_size: u64,
    /// Full URL of the summarization endpoint.
    pub summarizer_url: String,
    /// Model identifier, reported in logs.
    pub summarizer_model: String,
    /// Bearer credential for the summarization endpoint.
    pub summarizer_api_key: Option<String>,
    /// Lower bound on generated summary length (model tokens).
    pub summary_min_length: u32,
    /// Upper bound on generated summary length (model tokens).
    pub summary_max_length: u32,
    /// Directory receiving uploaded source files.
    pub upload_dir: PathBuf,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Which text variant is persisted with each record.
    pub text_retention: TextRetention,
    /// Deadline applied to each summarizer call.
    pub summarizer_timeout_secs: u64,
    /// Deadline applied to each registry, workspace and file call.
    pub store_timeout_secs: u64,
    /// Budget for a whole upload request.
    pub request_timeout_secs: u64,
    /// Attempts made for transient failures before surfacing them.
    pub retry_max_attempts: u32,
    /// Initial backoff between retries; doubles per attempt.
    pub retry_base_delay_ms: u64,
    /// Attempts made to create a workspace before rolling the registry back.
    pub workspace_create_attempts: u32,
    /// Polls made while waiting for a concurrently created workspace.
    pub workspace_ready_attempts: u32,
    /// Port the HTTP server listens on.
    pub server_port: u16,
    /// File receiving the appended log stream.
    pub log_file: PathBuf,
}

/// Text persisted in each document record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextRetention {
    /// Persist the normalized text exactly as sent to the summarizer.
    #[default]
    Truncated,
    /// Persist the full normalized text, even past the summarizer threshold.
    Full,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let summarizer_model = load_env_optional("SUMMARIZER_MODEL")
            .unwrap_or_else(|| DEFAULT_SUMMARIZER_MODEL.to_string());
        let summarizer_url = load_env_optional("SUMMARIZER_URL")
            .unwrap_or_else(|| format!("{HUGGING_FACE_MODELS_URL}/{summarizer_model}"));

        let config = Self {
            database_url: load_env("DATABASE_URL")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            workspace_vector_size: parse_or("WORKSPACE_VECTOR_SIZE", 64)?,
            summarizer_url,
            summarizer_model,
            summarizer_api_key: load_env_optional("SUMMARIZER_API_KEY"),
            summary_min_length: parse_or("SUMMARY_MIN_LENGTH", 40)?,
            summary_max_length: parse_or("SUMMARY_MAX_LENGTH", 150)?,
            upload_dir: load_env_optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./uploads")),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 10 << 20)?,
            text_retention: load_env_optional("TEXT_RETENTION")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("TEXT_RETENTION".into()))
                })
                .transpose()?
                .unwrap_or_default(),
            summarizer_timeout_secs: parse_or("SUMMARIZER_TIMEOUT_SECS", 8)?,
            store_timeout_secs: parse_or("STORE_TIMEOUT_SECS", 5)?,
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 30)?,
            retry_max_attempts: parse_or("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: parse_or("RETRY_BASE_DELAY_MS", 200)?,
            workspace_create_attempts: parse_or("WORKSPACE_CREATE_ATTEMPTS", 3)?,
            workspace_ready_attempts: parse_or("WORKSPACE_READY_ATTEMPTS", 5)?,
            server_port: parse_or("SERVER_PORT", 8080)?,
            log_file: load_env_optional("SUMMARY_INGEST_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        };

        if config.summary_min_length > config.summary_max_length {
            return Err(ConfigError::InvalidValue(
                "SUMMARY_MIN_LENGTH exceeds SUMMARY_MAX_LENGTH".into(),
            ));
        }
        if config.workspace_vector_size == 0 {
            return Err(ConfigError::InvalidValue("WORKSPACE_VECTOR_SIZE".into()));
        }

        Ok(config)
    }

    /// Deadline applied to each summarizer call.
    pub fn summarizer_timeout(&self) -> Duration {
        Duration::from_secs(self.summarizer_timeout_secs)
    }

    /// Deadline applied to each store call.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Budget for a whole upload request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Emit the loaded settings once tracing is up. Secrets are reported by presence only.
    pub fn log_loaded(&self) {
        tracing::info!(
            qdrant_url = %self.qdrant_url,
            summarizer_model = %self.summarizer_model,
            has_summarizer_key = self.summarizer_api_key.is_some(),
            has_qdrant_key = self.qdrant_api_key.is_some(),
            upload_dir = %self.upload_dir.display(),
            text_retention = ?self.text_retention,
            server_port = self.server_port,
            log_file = %self.log_file.display(),
            "Loaded configuration"
        );
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

impl std::str::FromStr for TextRetention {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "truncated" => Ok(Self::Truncated),
            "full" => Ok(Self::Full),
            _ => Err(()),
        }
    }
}

/// Load the env file, then read configuration from the environment.
///
/// `env_file` replaces the default `.env` lookup and must exist. Call this before
/// installing tracing so `RUST_LOG` and the log file location can come from the file.
pub fn init_config(env_file: Option<&Path>) -> Result<Config, ConfigError> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path).map_err(|source| ConfigError::EnvFile {
                path: path.to_path_buf(),
                source,
            })?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Config::from_env()
}
