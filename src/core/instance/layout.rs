use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::core::error::{InstallerError, InstallerResult};

/// Fixed subdirectory layout of a game instance. All artifact and override
/// placement goes through this type so path handling stays in one place.
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    pub root: PathBuf,
    pub mods_dir: PathBuf,
    pub resourcepacks_dir: PathBuf,
    pub shaderpacks_dir: PathBuf,
    pub config_dir: PathBuf,
    pub saves_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl InstanceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            mods_dir: root.join("mods"),
            resourcepacks_dir: root.join("resourcepacks"),
            shaderpacks_dir: root.join("shaderpacks"),
            config_dir: root.join("config"),
            saves_dir: root.join("saves"),
            logs_dir: root.join("logs"),
            root,
        }
    }

    /// Create the full layout. Idempotent; existing directories are fine.
    pub fn ensure_dirs(&self) -> InstallerResult<()> {
        for dir in [
            &self.root,
            &self.mods_dir,
            &self.resourcepacks_dir,
            &self.shaderpacks_dir,
            &self.config_dir,
            &self.saves_dir,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir).map_err(|e| InstallerError::io(dir, e))?;
        }
        Ok(())
    }

    /// Join a server-supplied file name onto a layout folder, stripping any
    /// directory components so a hostile name cannot escape the instance.
    pub fn resolve_target(&self, folder: &Path, file_name: &str) -> InstallerResult<PathBuf> {
        let normalized = file_name.replace('\\', "/");
        let base = normalized.rsplit('/').next().unwrap_or("");
        if base.is_empty() || base == "." || base == ".." {
            return Err(InstallerError::Other(format!(
                "cannot resolve file name {file_name:?} into a target path"
            )));
        }
        Ok(folder.join(base))
    }

    /// Heuristic: a directory that already carries a mods/ or config/
    /// subfolder is an existing instance worth backing up.
    pub fn looks_like_instance(&self) -> bool {
        self.mods_dir.is_dir() || self.config_dir.is_dir()
    }

    /// Copy-aside snapshot of the whole instance, placed next to it under
    /// `<name>-backups/<name>-<timestamp>`. Returns the snapshot path.
    pub fn backup(&self) -> InstallerResult<PathBuf> {
        let name = self
            .root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("instance");
        let parent = self.root.parent().unwrap_or(Path::new("."));
        let backup_root = parent.join(format!("{name}-backups"));
        fs::create_dir_all(&backup_root).map_err(|e| InstallerError::io(&backup_root, e))?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let dest = backup_root.join(format!("{name}-{stamp}"));
        copy_dir_recursive(&self.root, &dest)?;
        debug!("Instance snapshot taken at {dest:?}");
        Ok(dest)
    }

    /// Restore a snapshot over the instance root. The current contents are
    /// removed first; the snapshot is moved (not copied) into place.
    pub fn restore(&self, backup: &Path) -> InstallerResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| InstallerError::io(&self.root, e))?;
        }
        match fs::rename(backup, &self.root) {
            Ok(()) => Ok(()),
            // Cross-device rename fails; fall back to copy + remove.
            Err(_) => {
                copy_dir_recursive(backup, &self.root)?;
                fs::remove_dir_all(backup).map_err(|e| InstallerError::io(backup, e))?;
                Ok(())
            }
        }
    }
}

pub(crate) fn copy_dir_recursive(src: &Path, dest: &Path) -> InstallerResult<()> {
    fs::create_dir_all(dest).map_err(|e| InstallerError::io(dest, e))?;
    let entries = fs::read_dir(src).map_err(|e| InstallerError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| InstallerError::io(src, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let kind = entry.file_type().map_err(|e| InstallerError::io(&from, e))?;
        if kind.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| InstallerError::io(&from, e))?;
        }
    }
    Ok(())
}
