//! Validation of upload form input before anything is written.

use crate::storage::safe_file_name;
use crate::tenant::{TenantName, TenantNameError};
use thiserror::Error;

/// Reasons an upload is rejected before the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `tenant_name` field absent or blank.
    #[error("tenant_name is required")]
    MissingTenantName,
    /// `tenant_name` present but unusable.
    #[error("{0}")]
    InvalidTenantName(TenantNameError),
    /// `file` field absent.
    #[error("file is required")]
    MissingFile,
    /// `file` field carried no usable file name.
    #[error("file must have a name")]
    MissingFileName,
    /// `file` field was empty.
    #[error("file is empty")]
    EmptyFile,
    /// `file` exceeded the configured ceiling.
    #[error("file exceeds the {limit} byte upload limit")]
    FileTooLarge {
        /// Configured ceiling in bytes.
        limit: usize,
    },
}

/// Raw form fields as received from the client.
#[derive(Debug, Default, Clone)]
pub struct UploadForm {
    /// Value of the `tenant_name` field.
    pub tenant_name: Option<String>,
    /// Client-supplied name of the `file` field.
    pub file_name: Option<String>,
    /// Contents of the `file` field.
    pub bytes: Option<Vec<u8>>,
}

/// Validated upload handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Owning tenant.
    pub tenant: TenantName,
    /// Base name of the uploaded file.
    pub file_name: String,
    /// Uploaded bytes.
    pub bytes: Vec<u8>,
}

impl UploadForm {
    /// Check every field and produce an [`Upload`], or the first problem found.
    pub fn validate(self, max_bytes: usize) -> Result<Upload, ValidationError> {
        let raw_tenant = self
            .tenant_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(ValidationError::MissingTenantName)?;
        let tenant = TenantName::parse(&raw_tenant).map_err(ValidationError::InvalidTenantName)?;

        let bytes = self.bytes.ok_or(ValidationError::MissingFile)?;
        let file_name = self
            .file_name
            .as_deref()
            .and_then(safe_file_name)
            .map(str::to_string)
            .ok_or(ValidationError::MissingFileName)?;
        if bytes.is_empty() {
            return Err(ValidationError::EmptyFile);
        }
        if bytes.len() > max_bytes {
            return Err(ValidationError::FileTooLarge { limit: max_bytes });
        }

        Ok(Upload {
            tenant,
            file_name,
            bytes,
        })
    }
}
