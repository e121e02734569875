//! Stage names, pipeline errors, and the receipt handed back to callers.

use crate::config::{Config, TextRetention};
use crate::extraction::ExtractionError;
use crate::provisioning::{ProvisioningError, ProvisioningSettings};
use crate::recording::RecordingError;
use crate::resilience::RetryPolicy;
use crate::storage::StorageError;
use crate::summarization::SummarizationError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Persisting the uploaded bytes.
    Intake,
    /// Turning bytes into text.
    Extraction,
    /// Producing the summary.
    Summarization,
    /// Ensuring the tenant's registry entry and workspace.
    Provisioning,
    /// Writing the document record.
    Recording,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Intake,
        Stage::Extraction,
        Stage::Summarization,
        Stage::Provisioning,
        Stage::Recording,
    ];

    /// Stable lowercase name used in logs and error bodies.
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Extraction => "extraction",
            Stage::Summarization => "summarization",
            Stage::Provisioning => "provisioning",
            Stage::Recording => "recording",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one pipeline run, naming the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Upload could not be persisted.
    #[error("Failed to store upload: {0}")]
    Intake(#[from] StorageError),
    /// Text could not be extracted.
    #[error("Failed to extract text: {0}")]
    Extraction(#[from] ExtractionError),
    /// Summary could not be produced.
    #[error("Failed to summarize document: {0}")]
    Summarization(#[from] SummarizationError),
    /// Tenant could not be provisioned.
    #[error("Failed to provision tenant: {0}")]
    Provisioning(#[from] ProvisioningError),
    /// Record could not be written.
    #[error("Failed to record document: {0}")]
    Recording(#[from] RecordingError),
    /// Request budget ran out while the stage was in flight.
    #[error("Request deadline exceeded during {stage}")]
    DeadlineExceeded {
        /// Stage that was running when the budget ran out.
        stage: Stage,
    },
    /// Worker task panicked or was cancelled.
    #[error("{stage} worker failed: {message}")]
    Worker {
        /// Stage the worker belonged to.
        stage: Stage,
        /// Join error description.
        message: String,
    },
}

impl PipelineError {
    /// Stage at which the run failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Intake(_) => Stage::Intake,
            Self::Extraction(_) => Stage::Extraction,
            Self::Summarization(_) => Stage::Summarization,
            Self::Provisioning(_) => Stage::Provisioning,
            Self::Recording(_) => Stage::Recording,
            Self::DeadlineExceeded { stage } | Self::Worker { stage, .. } => *stage,
        }
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    /// Tenant the document was recorded for.
    pub tenant: String,
    /// Whether this upload provisioned the tenant.
    pub tenant_created: bool,
    /// Identifier of the stored record.
    pub record_id: String,
    /// Location of the stored source file.
    pub file_path: String,
    /// Summary stored with the record.
    pub summary: String,
    /// Whether the summarizer saw only a prefix of the text.
    pub truncated: bool,
}

/// Tunables for a pipeline instance.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Budget for one whole run.
    pub request_timeout: Duration,
    /// Deadline for each store call made outside provisioning.
    pub store_timeout: Duration,
    /// Deadline for each summarizer call.
    pub summarizer_timeout: Duration,
    /// Retry policy for transient stage failures.
    pub retry: RetryPolicy,
    /// Provisioning timing.
    pub provisioning: ProvisioningSettings,
    /// Text variant persisted with each record.
    pub text_retention: TextRetention,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
}

impl PipelineSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            store_timeout: config.store_timeout(),
            summarizer_timeout: config.summarizer_timeout(),
            retry: RetryPolicy::new(
                config.retry_max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            provisioning: ProvisioningSettings::from_config(config),
            text_retention: config.text_retention,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}
