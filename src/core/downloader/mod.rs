// ─── Download Manager ───
// Drives a batch of artifact transfers through a bounded worker pool:
// stage (resumable fetch with retry/backoff) → verify (digests +
// fingerprint) → atomically promote to the final path. A rename after
// successful verification is the only operation that makes an artifact
// visible at its destination.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::InstallerError;
use crate::core::fingerprint::{self, hex_eq};
use crate::core::report::{ArtifactRef, ArtifactResult, TransferStatus};
use crate::core::transfer::{self, FetchOptions, ProgressFn, TransferOutcome};

/// Batch progress callback: (bytes_so_far, total_or_unknown, artifact).
pub type BatchProgressFn = dyn Fn(u64, Option<u64>, &ArtifactRef) + Send + Sync;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Concurrent, checksum-verified artifact downloader.
pub struct DownloadManager {
    client: Client,
    /// Maximum number of parallel transfers.
    concurrency: usize,
    /// Attempts per artifact, including the first.
    max_retries: u32,
    backoff_base: Duration,
}

impl DownloadManager {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            concurrency: 4,
            max_retries: 3,
            backoff_base: Duration::from_millis(600),
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Download a batch of artifacts. Results come back in input order
    /// regardless of completion order, so reports are reproducible.
    pub async fn download_batch(
        &self,
        refs: Vec<ArtifactRef>,
        progress: Option<Arc<BatchProgressFn>>,
        cancel: Option<CancellationToken>,
    ) -> Vec<ArtifactResult> {
        info!(
            "Starting batch download: {} artifacts, concurrency={}",
            refs.len(),
            self.concurrency
        );

        // Per-destination lock table: two refs colliding on one final path
        // must never hold the staging file at the same time.
        let dest_locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut results: Vec<(usize, ArtifactResult)> = stream::iter(
            refs.into_iter().enumerate(),
        )
        .map(|(index, artifact)| {
            let dest_locks = dest_locks.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            async move {
                let result = self
                    .process_one(artifact, dest_locks, progress, cancel)
                    .await;
                (index, result)
            }
        })
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }

    async fn process_one(
        &self,
        artifact: ArtifactRef,
        dest_locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
        progress: Option<Arc<BatchProgressFn>>,
        cancel: Option<CancellationToken>,
    ) -> ArtifactResult {
        let lock = {
            let mut table = dest_locks.lock().await;
            table
                .entry(artifact.dest.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if let Some(token) = &cancel {
            if token.is_cancelled() {
                return failed(artifact, 0, 0, &InstallerError::Cancelled.to_string());
            }
        }

        // Idempotence: a final file that already matches its declared
        // identity is not downloaded again. The check runs under the
        // destination lock so a colliding ref placed moments ago counts.
        if artifact.dest.exists() {
            match self.verify(&artifact, &artifact.dest).await {
                Ok(()) => {
                    debug!("Skipping {}: already present and verified", artifact.file_name);
                    let size = fs::metadata(&artifact.dest).await.map(|m| m.len()).unwrap_or(0);
                    return ArtifactResult {
                        artifact,
                        status: TransferStatus::Skipped,
                        bytes_downloaded: size,
                        attempts: 0,
                        error: None,
                    };
                }
                Err(e) => {
                    debug!(
                        "Existing file at {:?} does not match expected identity ({e}); re-downloading",
                        artifact.dest
                    );
                }
            }
        }

        let staging = transfer::staging_path(&artifact.dest);

        let progress_adapter: Option<Box<ProgressFn>> = progress.map(|cb| {
            let meta = artifact.clone();
            Box::new(move |bytes: u64, total: Option<u64>| (*cb)(bytes, total, &meta))
                as Box<ProgressFn>
        });

        let mut attempts = 0;
        let bytes = loop {
            attempts += 1;
            let outcome = transfer::fetch(
                &self.client,
                &artifact.url,
                &staging,
                FetchOptions {
                    resume_from: None,
                    expected_size: artifact.size,
                    progress: progress_adapter.as_deref(),
                    cancel: cancel.as_ref(),
                },
            )
            .await;

            match outcome {
                TransferOutcome::Complete { bytes } => break bytes,
                TransferOutcome::Cancelled { bytes } => {
                    // Staging is kept so a later run resumes from here.
                    return failed(artifact, bytes, attempts, &InstallerError::Cancelled.to_string());
                }
                TransferOutcome::Fatal { reason, status } => {
                    let _ = fs::remove_file(&staging).await;
                    let err = match status {
                        Some(status) => InstallerError::DownloadFailed {
                            url: artifact.url.clone(),
                            status,
                        },
                        None => InstallerError::Other(reason),
                    };
                    return failed(artifact, 0, attempts, &err.to_string());
                }
                TransferOutcome::Retryable { bytes, reason } => {
                    if attempts >= self.max_retries {
                        let err = InstallerError::RetriesExhausted {
                            url: artifact.url.clone(),
                            attempts,
                            reason,
                        };
                        let _ = fs::remove_file(&staging).await;
                        return failed(artifact, bytes, attempts, &err.to_string());
                    }
                    let delay = self.backoff_delay(attempts);
                    warn!(
                        "Transfer of {} failed ({reason}); retrying in {:?} (attempt {}/{})",
                        artifact.file_name, delay, attempts, self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        // Verification mismatch is not retryable: the server gave us a
        // complete, wrong file.
        if let Err(e) = self.verify(&artifact, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return failed(artifact, bytes, attempts, &e.to_string());
        }

        if let Err(e) = fs::rename(&staging, &artifact.dest).await {
            let err = InstallerError::io(&artifact.dest, e);
            let _ = fs::remove_file(&staging).await;
            return failed(artifact, bytes, attempts, &err.to_string());
        }

        debug!("Completed {} -> {:?}", artifact.file_name, artifact.dest);
        ArtifactResult {
            artifact,
            status: TransferStatus::Completed,
            bytes_downloaded: bytes,
            attempts,
            error: None,
        }
    }

    /// Check a file against every digest the catalog declared, plus the
    /// murmur2 fingerprint when present. Passing with zero declared
    /// identities is allowed; the manifest simply did not pin the file.
    async fn verify(
        &self,
        artifact: &ArtifactRef,
        path: &std::path::Path,
    ) -> Result<(), InstallerError> {
        if let Some(expected_size) = artifact.size {
            let actual = fs::metadata(path)
                .await
                .map_err(|e| InstallerError::io(path, e))?
                .len();
            if actual != expected_size {
                return Err(InstallerError::Other(format!(
                    "size mismatch for {path:?}: expected {expected_size}, got {actual}"
                )));
            }
        }

        for digest in &artifact.digests {
            let actual = fingerprint::digest_file(path, digest.algorithm).await?;
            if !hex_eq(&actual, &digest.value) {
                return Err(InstallerError::DigestMismatch {
                    path: path.to_path_buf(),
                    algorithm: digest.algorithm.to_string(),
                    expected: digest.value.clone(),
                    actual,
                });
            }
        }

        if let Some(expected) = artifact.fingerprint {
            let actual = fingerprint::fingerprint_file(path).await?;
            if actual != expected {
                return Err(InstallerError::FingerprintMismatch {
                    path: path.to_path_buf(),
                    expected,
                    actual,
                });
            }
        }

        Ok(())
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.saturating_mul(1u32 << (attempt - 1).min(16));
        exp.min(MAX_BACKOFF)
    }
}

fn failed(artifact: ArtifactRef, bytes: u64, attempts: u32, reason: &str) -> ArtifactResult {
    warn!("Artifact {} failed: {reason}", artifact.file_name);
    ArtifactResult {
        artifact,
        status: TransferStatus::Failed,
        bytes_downloaded: bytes,
        attempts,
        error: Some(reason.to_string()),
    }
}
