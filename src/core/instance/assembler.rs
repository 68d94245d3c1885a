use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::catalog::CatalogResolver;
use crate::core::downloader::{BatchProgressFn, DownloadManager};
use crate::core::error::{InstallerError, InstallerResult};
use crate::core::instance::layout::InstanceLayout;
use crate::core::manifest::ParsedManifest;
use crate::core::report::{
    ArtifactRef, ArtifactResult, InstallPhase, InstallReport, TransferStatus,
};
use crate::core::transfer;

/// Knobs for one installation run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Parallel transfer cap, at least 1.
    pub concurrency: usize,
    /// Whether overrides may replace existing files.
    pub overwrite: bool,
    /// Snapshot an existing instance before touching it.
    pub backup_on_failure: bool,
    /// Restore the snapshot even when only some artifacts failed.
    /// Off by default: a partially filled instance is kept and reported.
    pub rollback_on_partial: bool,
    /// Keep the snapshot around after a successful install.
    pub preserve_backup: bool,
    pub max_retries: u32,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            overwrite: false,
            backup_on_failure: true,
            rollback_on_partial: false,
            preserve_backup: false,
            max_retries: 3,
        }
    }
}

/// High-level installer: resolves manifest entries through the catalog,
/// drives the batch download, merges overrides and handles backup and
/// rollback. One assembler can run many installs.
pub struct InstanceAssembler {
    client: Client,
    resolver: Arc<dyn CatalogResolver>,
}

impl InstanceAssembler {
    pub fn new(client: Client, resolver: Arc<dyn CatalogResolver>) -> Self {
        Self { client, resolver }
    }

    pub async fn install(
        &self,
        parsed: &ParsedManifest,
        instance_root: &Path,
        options: &InstallOptions,
        progress: Option<Arc<BatchProgressFn>>,
        cancel: Option<CancellationToken>,
    ) -> InstallerResult<InstallReport> {
        let started = Instant::now();
        let manifest = &parsed.manifest;
        info!(
            "Installing {:?} ({} files) into {instance_root:?}",
            manifest.name,
            manifest.files.len()
        );

        let layout = InstanceLayout::new(instance_root);
        let mut phase = InstallPhase::NotStarted;

        // Snapshot before any mutation, directory creation included, so a
        // filesystem fault later can restore the exact pre-install state.
        let backup = if options.backup_on_failure && layout.looks_like_instance() {
            let snapshot_layout = layout.clone();
            let snapshot = run_blocking(move || snapshot_layout.backup()).await?;
            phase = InstallPhase::BackupTaken;
            Some(snapshot)
        } else {
            None
        };

        let run = self
            .run_install(parsed, &layout, options, progress, cancel, &mut phase)
            .await;

        let (mut results, overrides_skipped) = match run {
            Ok(parts) => parts,
            Err(fatal) => {
                // Manifest and filesystem faults abort the whole install.
                if let Some(snapshot) = &backup {
                    warn!("Install failed fatally ({fatal}); restoring snapshot");
                    let restore_layout = layout.clone();
                    let snapshot = snapshot.clone();
                    let restored =
                        run_blocking(move || restore_layout.restore(&snapshot)).await;
                    if let Err(restore_err) = restored {
                        warn!("Snapshot restore also failed: {restore_err}");
                    }
                }
                return Err(fatal);
            }
        };

        let successful = results
            .iter()
            .filter(|r| r.status == TransferStatus::Completed)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.status == TransferStatus::Skipped)
            .count();
        // Optional artifacts may fail without sinking the install.
        let failed = results
            .iter()
            .filter(|r| r.status == TransferStatus::Failed && r.artifact.required)
            .count();
        let mut success = failed == 0;

        if success {
            phase = InstallPhase::Done;
            if let Some(snapshot) = &backup {
                if !options.preserve_backup {
                    if let Err(e) = tokio::fs::remove_dir_all(snapshot).await {
                        warn!("Could not remove snapshot {snapshot:?}: {e}");
                    }
                }
            }
        } else if options.rollback_on_partial {
            if let Some(snapshot) = &backup {
                info!("{failed} required artifacts failed; rolling back");
                let restore_layout = layout.clone();
                let snap = snapshot.clone();
                run_blocking(move || restore_layout.restore(&snap)).await?;
                phase = InstallPhase::RolledBack;
                success = false;
                for result in &mut results {
                    if result.status == TransferStatus::Completed {
                        result.status = TransferStatus::Failed;
                        result.error = Some("rolled back".to_string());
                    }
                }
            }
        }

        let report = InstallReport {
            manifest_name: Some(manifest.name.clone()),
            manifest_version: manifest.version.clone(),
            total: results.len(),
            successful,
            failed,
            skipped,
            overrides_skipped,
            elapsed_secs: started.elapsed().as_secs_f64(),
            phase,
            backup: backup.filter(|b| b.exists()),
            results,
            success,
        };
        info!(
            "Install of {:?} finished: {}/{} ok, {} failed, {} skipped in {:.1}s",
            manifest.name, report.successful, report.total, report.failed, report.skipped,
            report.elapsed_secs
        );
        Ok(report)
    }

    async fn run_install(
        &self,
        parsed: &ParsedManifest,
        layout: &InstanceLayout,
        options: &InstallOptions,
        progress: Option<Arc<BatchProgressFn>>,
        cancel: Option<CancellationToken>,
        phase: &mut InstallPhase,
    ) -> InstallerResult<(Vec<ArtifactResult>, Vec<PathBuf>)> {
        let manifest = &parsed.manifest;

        layout.ensure_dirs()?;
        *phase = InstallPhase::DirectoriesCreated;

        // Resolve every entry up front. A resolution failure is recorded
        // against that artifact; it never aborts the batch.
        let mut slots: Vec<Option<ArtifactResult>> = vec![None; manifest.files.len()];
        let mut ready: Vec<(usize, ArtifactRef)> = Vec::new();

        for (index, entry) in manifest.files.iter().enumerate() {
            match self.resolver.resolve(entry.project_id, entry.file_id).await {
                Ok(resolved) => {
                    let file_name = resolved
                        .file_name
                        .clone()
                        .or_else(|| transfer::filename_from_url(&resolved.url))
                        .unwrap_or_else(|| {
                            format!("{}-{}.jar", entry.project_id, entry.file_id)
                        });
                    let dest = layout.resolve_target(&layout.mods_dir, &file_name)?;
                    ready.push((
                        index,
                        ArtifactRef {
                            project_id: entry.project_id,
                            file_id: entry.file_id,
                            url: resolved.url,
                            file_name,
                            size: resolved.size,
                            digests: resolved.digests,
                            fingerprint: resolved.fingerprint,
                            required: entry.required,
                            dest,
                        },
                    ));
                }
                Err(e) => {
                    warn!(
                        "Could not resolve {}:{} from catalog: {e}",
                        entry.project_id, entry.file_id
                    );
                    let placeholder = format!("{}-{}.jar", entry.project_id, entry.file_id);
                    slots[index] = Some(ArtifactResult {
                        artifact: ArtifactRef {
                            project_id: entry.project_id,
                            file_id: entry.file_id,
                            url: String::new(),
                            file_name: placeholder.clone(),
                            size: None,
                            digests: Vec::new(),
                            fingerprint: None,
                            required: entry.required,
                            dest: layout.mods_dir.join(placeholder),
                        },
                        status: TransferStatus::Failed,
                        bytes_downloaded: 0,
                        attempts: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        *phase = InstallPhase::Downloading;
        let manager = DownloadManager::new(self.client.clone())
            .with_concurrency(options.concurrency.max(1))
            .with_max_retries(options.max_retries);

        let indices: Vec<usize> = ready.iter().map(|(i, _)| *i).collect();
        let refs: Vec<ArtifactRef> = ready.into_iter().map(|(_, r)| r).collect();
        let downloaded = manager.download_batch(refs, progress, cancel).await;
        for (index, result) in indices.into_iter().zip(downloaded) {
            slots[index] = Some(result);
        }
        // Every slot is filled: entries either resolved into the batch or
        // were recorded as unresolvable above.
        let results: Vec<ArtifactResult> = slots.into_iter().flatten().collect();

        let mut overrides_skipped = Vec::new();
        if let Some(overrides) = &parsed.overrides_dir {
            if overrides.is_dir() {
                info!("Merging overrides from {overrides:?}");
                let overrides = overrides.clone();
                let root = layout.root.clone();
                let overwrite = options.overwrite;
                overrides_skipped = run_blocking(move || {
                    let mut skipped = Vec::new();
                    merge_overrides(&overrides, &root, overwrite, Path::new(""), &mut skipped)?;
                    Ok(skipped)
                })
                .await?;
                *phase = InstallPhase::OverridesApplied;
            }
        }

        Ok((results, overrides_skipped))
    }
}

/// Run a filesystem-heavy closure off the async runtime threads.
async fn run_blocking<T, F>(f: F) -> InstallerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> InstallerResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(InstallerError::Other(format!("blocking task failed: {e}"))),
    }
}

/// Merge one overrides tree into the instance root. Existing files are
/// replaced only when `overwrite` is set; otherwise the relative path is
/// recorded as skipped. I/O failures here abort the install.
fn merge_overrides(
    src: &Path,
    dest_root: &Path,
    overwrite: bool,
    rel: &Path,
    skipped: &mut Vec<PathBuf>,
) -> InstallerResult<()> {
    let entries = fs::read_dir(src).map_err(|e| InstallerError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| InstallerError::io(src, e))?;
        let from = entry.path();
        let rel_child = rel.join(entry.file_name());
        let to = dest_root.join(&rel_child);
        let kind = entry.file_type().map_err(|e| InstallerError::io(&from, e))?;
        if kind.is_dir() {
            fs::create_dir_all(&to).map_err(|e| InstallerError::io(&to, e))?;
            merge_overrides(&from, dest_root, overwrite, &rel_child, skipped)?;
        } else {
            if to.exists() && !overwrite {
                skipped.push(rel_child);
                continue;
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| InstallerError::io(parent, e))?;
            }
            fs::copy(&from, &to).map_err(|e| InstallerError::io(&from, e))?;
        }
    }
    Ok(())
}
