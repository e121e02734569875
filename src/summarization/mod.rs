//! Abstractive summaries from an external inference endpoint.
//!
//! The client normalizes extracted text, caps it at [`MAX_SUMMARY_INPUT_CHARS`], and posts it
//! to a Hugging Face style endpoint (`{inputs, parameters}` in, `[{summary_text}]` out). The
//! client never retries; the pipeline owns retry policy.

pub mod normalize;

use crate::config::Config;
use crate::resilience::Transient;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use normalize::{MAX_SUMMARY_INPUT_CHARS, PreparedText, normalize_whitespace, prepare_input};

/// Errors surfaced while requesting a summary.
#[derive(Debug, Error)]
pub enum SummarizationError {
    /// Nothing left to summarize after normalization.
    #[error("No text to summarize")]
    EmptyInput,
    /// Endpoint could not be reached.
    #[error("Summarization endpoint unreachable: {0}")]
    Unreachable(String),
    /// Endpoint did not answer within the call deadline.
    #[error("Summarization request timed out")]
    Timeout,
    /// Endpoint answered with an error object.
    #[error("API Error ({status}): {message}")]
    Api {
        /// HTTP status returned by the endpoint.
        status: StatusCode,
        /// Message carried in the `error` field.
        message: String,
    },
    /// Endpoint answered with a non-success status and no error object.
    #[error("API returned status {status}")]
    Status {
        /// HTTP status returned by the endpoint.
        status: StatusCode,
    },
    /// Success body could not be decoded.
    #[error("Malformed summarization response: {0}")]
    InvalidResponse(String),
    /// Success body held no summary.
    #[error("Summarization endpoint returned no summary")]
    EmptyResponse,
}

impl Transient for SummarizationError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Api { status, .. } | Self::Status { status } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::EmptyInput | Self::InvalidResponse(_) | Self::EmptyResponse => false,
        }
    }
}

impl From<tokio::time::error::Elapsed> for SummarizationError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Outcome of a successful summarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Normalized text exactly as sent to the endpoint.
    pub cleaned_text: String,
    /// Summary returned by the endpoint.
    pub summary: String,
    /// Whether `cleaned_text` is a prefix of the normalized input.
    pub truncated: bool,
}

/// Interface implemented by summarization backends.
#[async_trait]
pub trait SummarizationClient: Send + Sync {
    /// Normalize `text` and produce a summary for it.
    async fn summarize(&self, text: &str) -> Result<Summary, SummarizationError>;
}

/// Decoding bounds forwarded with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryLength {
    /// Minimum summary length in model tokens.
    pub min: u32,
    /// Maximum summary length in model tokens.
    pub max: u32,
}

impl Default for SummaryLength {
    fn default() -> Self {
        Self { min: 40, max: 150 }
    }
}

/// Client for Hugging Face style inference endpoints.
pub struct HuggingFaceClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    length: SummaryLength,
}

impl HuggingFaceClient {
    /// Build a client for `endpoint`, bounding each call by `timeout`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        length: SummaryLength,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent("summary-ingest/summarizer")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            length,
        })
    }

    /// Build a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        if config.summarizer_api_key.is_none() {
            tracing::warn!(
                endpoint = %config.summarizer_url,
                "SUMMARIZER_API_KEY not set; requests will be unauthenticated"
            );
        }
        Self::new(
            config.summarizer_url.clone(),
            config.summarizer_api_key.clone(),
            SummaryLength {
                min: config.summary_min_length,
                max: config.summary_max_length,
            },
            config.summarizer_timeout(),
        )
    }
}

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    inputs: &'a str,
    parameters: SummarizeParameters,
}

#[derive(Serialize)]
struct SummarizeParameters {
    max_length: u32,
    min_length: u32,
    do_sample: bool,
}

#[derive(Deserialize)]
struct SummaryItem {
    #[serde(default)]
    summary_text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: serde_json::Value,
}

#[async_trait]
impl SummarizationClient for HuggingFaceClient {
    async fn summarize(&self, text: &str) -> Result<Summary, SummarizationError> {
        let prepared = prepare_input(text, MAX_SUMMARY_INPUT_CHARS);
        if prepared.text.is_empty() {
            return Err(SummarizationError::EmptyInput);
        }

        tracing::debug!(
            chars = prepared.text.chars().count(),
            truncated = prepared.truncated,
            "Requesting summary"
        );

        let payload = SummarizeRequest {
            inputs: &prepared.text,
            parameters: SummarizeParameters {
                max_length: self.length.max,
                min_length: self.length.min,
                do_sample: false,
            },
        };

        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            let error = status_error(status, &body);
            tracing::warn!(status = %status, error = %error, "Summarization endpoint rejected request");
            return Err(error);
        }

        let summary = parse_summary(&body)?;
        Ok(Summary {
            cleaned_text: prepared.text,
            summary,
            truncated: prepared.truncated,
        })
    }
}

fn transport_error(error: reqwest::Error) -> SummarizationError {
    if error.is_timeout() {
        SummarizationError::Timeout
    } else {
        SummarizationError::Unreachable(error.to_string())
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> SummarizationError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => {
            let message = match error {
                serde_json::Value::String(message) => message,
                other => other.to_string(),
            };
            SummarizationError::Api { status, message }
        }
        Err(_) => SummarizationError::Status { status },
    }
}

fn parse_summary(body: &[u8]) -> Result<String, SummarizationError> {
    let items: Vec<SummaryItem> = serde_json::from_slice(body).map_err(|error| {
        SummarizationError::InvalidResponse(format!(
            "{error}; body: {}",
            String::from_utf8_lossy(&body[..body.len().min(256)])
        ))
    })?;

    items
        .into_iter()
        .next()
        .and_then(|item| item.summary_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(SummarizationError::EmptyResponse)
}
