use crate::pipeline::Stage;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct IngestMetrics {
    uploads_received: AtomicU64,
    documents_recorded: AtomicU64,
    tenants_created: AtomicU64,
    failures: [AtomicU64; Stage::ALL.len()],
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an upload entering the pipeline.
    pub fn record_upload(&self) {
        self.uploads_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a stored record, and the tenant it provisioned if any.
    pub fn record_document(&self, tenant_created: bool) {
        self.documents_recorded.fetch_add(1, Ordering::Relaxed);
        if tenant_created {
            self.tenants_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a run that failed at `stage`.
    pub fn record_failure(&self, stage: Stage) {
        self.failures[stage_index(stage)].fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let failed = |stage| self.failures[stage_index(stage)].load(Ordering::Relaxed);
        MetricsSnapshot {
            uploads_received: self.uploads_received.load(Ordering::Relaxed),
            documents_recorded: self.documents_recorded.load(Ordering::Relaxed),
            tenants_created: self.tenants_created.load(Ordering::Relaxed),
            failures: StageFailures {
                intake: failed(Stage::Intake),
                extraction: failed(Stage::Extraction),
                summarization: failed(Stage::Summarization),
                provisioning: failed(Stage::Provisioning),
                recording: failed(Stage::Recording),
            },
        }
    }
}

fn stage_index(stage: Stage) -> usize {
    match stage {
        Stage::Intake => 0,
        Stage::Extraction => 1,
        Stage::Summarization => 2,
        Stage::Provisioning => 3,
        Stage::Recording => 4,
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Uploads that passed validation and entered the pipeline.
    pub uploads_received: u64,
    /// Records written since startup.
    pub documents_recorded: u64,
    /// Tenants provisioned by this process.
    pub tenants_created: u64,
    /// Failed runs, by stage.
    pub failures: StageFailures,
}

/// Failed runs broken down by the stage that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageFailures {
    /// Failures while persisting uploads.
    pub intake: u64,
    /// Failures while extracting text.
    pub extraction: u64,
    /// Failures while summarizing.
    pub summarization: u64,
    /// Failures while provisioning tenants.
    pub provisioning: u64,
    /// Failures while writing records.
    pub recording: u64,
}
