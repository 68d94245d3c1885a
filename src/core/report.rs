use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::fingerprint::DigestAlgorithm;

/// One expected digest declared for an artifact, as supplied by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedDigest {
    pub algorithm: DigestAlgorithm,
    pub value: String,
}

/// Identifies one remote file to fetch and where it lands. Immutable once
/// constructed; the download pipeline never mutates a ref.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub project_id: u32,
    pub file_id: u32,
    pub url: String,
    pub file_name: String,
    pub size: Option<u64>,
    #[serde(default)]
    pub digests: Vec<ExpectedDigest>,
    #[serde(default)]
    pub fingerprint: Option<u32>,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Final destination path inside the instance.
    pub dest: PathBuf,
}

fn default_required() -> bool {
    true
}

/// Lifecycle of a single transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Verifying,
    Completed,
    Failed,
    /// Final file was already present and verified; nothing downloaded.
    Skipped,
}

/// Outcome for one artifact, recorded in manifest declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactResult {
    pub artifact: ArtifactRef,
    pub status: TransferStatus,
    pub bytes_downloaded: u64,
    pub attempts: u32,
    pub error: Option<String>,
}

impl ArtifactResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, TransferStatus::Completed | TransferStatus::Skipped)
    }
}

/// Phase reached by an installation attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    NotStarted,
    DirectoriesCreated,
    BackupTaken,
    Downloading,
    OverridesApplied,
    Done,
    RolledBack,
}

/// Summary report for an installation attempt. Produced once, never
/// mutated after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReport {
    pub manifest_name: Option<String>,
    pub manifest_version: Option<String>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Override files left untouched because `overwrite` was off.
    pub overrides_skipped: Vec<PathBuf>,
    pub elapsed_secs: f64,
    pub phase: InstallPhase,
    pub backup: Option<PathBuf>,
    pub results: Vec<ArtifactResult>,
    pub success: bool,
}

impl InstallReport {
    /// Per-artifact failures with their reasons.
    pub fn failures(&self) -> impl Iterator<Item = &ArtifactResult> {
        self.results
            .iter()
            .filter(|r| r.status == TransferStatus::Failed)
    }
}
