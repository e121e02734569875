#![deny(missing_docs)]

//! Tenant-aware document ingestion: store an upload, extract and summarize its text, make sure
//! the tenant is provisioned, and record the result in the tenant's workspace.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Text extraction from uploaded documents.
pub mod extraction;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Upload orchestration across every stage.
pub mod pipeline;
/// Exactly-once tenant provisioning.
pub mod provisioning;
/// Document record writes.
pub mod recording;
/// Relational tenant registry.
pub mod registry;
/// Retry and deadline helpers.
pub mod resilience;
/// Durable storage for uploaded files.
pub mod storage;
/// Summarization client and text preparation.
pub mod summarization;
/// Validated tenant identifiers.
pub mod tenant;
/// Per-tenant document workspaces.
pub mod workspace;
