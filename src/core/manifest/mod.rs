// ─── Manifest Parser ───
// Turns a loose manifest.json or a pack zip (manifest + overrides folder)
// into a validated `PackManifest`. Everything downstream operates on this
// typed model; no raw JSON field access leaks past this boundary.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::core::error::{InstallerError, InstallerResult};

pub const SUPPORTED_MANIFEST_TYPE: &str = "minecraftModpack";

/// One manifest entry: a (project, file) identifier pair the catalog can
/// resolve to a concrete download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    #[serde(rename = "projectID")]
    pub project_id: u32,
    #[serde(rename = "fileID")]
    pub file_id: u32,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModLoader {
    pub id: String,
    #[serde(default)]
    pub primary: bool,
}

/// Target game metadata carried by the pack.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MinecraftTarget {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "modLoaders", default)]
    pub mod_loaders: Vec<ModLoader>,
}

/// Validated pack descriptor. Entry order is declaration order and is
/// preserved through download and reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "manifestType")]
    pub manifest_type: String,
    #[serde(rename = "manifestVersion")]
    pub manifest_version: u32,
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
    /// Name of the overrides folder inside the pack, usually "overrides".
    #[serde(default)]
    pub overrides: Option<String>,
    #[serde(default)]
    pub minecraft: MinecraftTarget,
}

impl PackManifest {
    /// Structural validation. Errors name the offending field so callers
    /// can report something actionable.
    pub fn validate(&self) -> InstallerResult<()> {
        if self.name.trim().is_empty() {
            return Err(InstallerError::MalformedManifest(
                "field 'name' is empty".to_string(),
            ));
        }
        if self.manifest_type != SUPPORTED_MANIFEST_TYPE {
            return Err(InstallerError::MalformedManifest(format!(
                "field 'manifestType' is {:?}, expected {SUPPORTED_MANIFEST_TYPE:?}",
                self.manifest_type
            )));
        }
        if self.files.is_empty() {
            return Err(InstallerError::MalformedManifest(
                "field 'files' is empty; nothing to install".to_string(),
            ));
        }
        for (index, entry) in self.files.iter().enumerate() {
            if entry.project_id == 0 {
                return Err(InstallerError::MalformedManifest(format!(
                    "files[{index}].projectID is zero"
                )));
            }
            if entry.file_id == 0 {
                return Err(InstallerError::MalformedManifest(format!(
                    "files[{index}].fileID is zero"
                )));
            }
        }
        Ok(())
    }
}

/// Parse result: the manifest plus the location of its overrides tree, if
/// any. When the source was a zip, the overrides live in a temp dir owned
/// by this value; dropping it removes them.
#[derive(Debug)]
pub struct ParsedManifest {
    pub manifest: PackManifest,
    pub overrides_dir: Option<PathBuf>,
    _extracted: Option<TempDir>,
}

/// Parse a manifest source: a `.zip` pack archive or a loose JSON file.
pub fn parse(source: &Path) -> InstallerResult<ParsedManifest> {
    if !source.exists() {
        return Err(InstallerError::MalformedManifest(format!(
            "manifest source not found: {source:?}"
        )));
    }

    let is_zip = source
        .extension()
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    let parsed = if is_zip {
        parse_zip(source)?
    } else {
        parse_loose(source)?
    };

    parsed.manifest.validate()?;
    info!(
        "Parsed manifest {:?}: {} files, overrides={}",
        parsed.manifest.name,
        parsed.manifest.files.len(),
        parsed.overrides_dir.is_some()
    );
    Ok(parsed)
}

fn parse_loose(path: &Path) -> InstallerResult<ParsedManifest> {
    let file = File::open(path).map_err(|e| InstallerError::io(path, e))?;
    let manifest: PackManifest = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| InstallerError::MalformedManifest(format!("invalid manifest JSON: {e}")))?;

    // A relative overrides folder next to the manifest counts when present.
    let overrides_dir = manifest
        .overrides
        .as_deref()
        .and_then(|rel| path.parent().map(|parent| parent.join(rel)))
        .filter(|p| p.is_dir());

    Ok(ParsedManifest {
        manifest,
        overrides_dir,
        _extracted: None,
    })
}

fn parse_zip(path: &Path) -> InstallerResult<ParsedManifest> {
    let file = File::open(path).map_err(|e| InstallerError::io(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    // Prefer the shallowest manifest.json when the pack nests one inside a
    // top-level folder.
    let manifest_entry = archive
        .file_names()
        .filter(|n| n.ends_with("manifest.json"))
        .min_by_key(|n| (n.matches('/').count(), n.to_string()))
        .map(str::to_string)
        .ok_or_else(|| {
            InstallerError::MalformedManifest("no manifest.json found inside zip".to_string())
        })?;

    let manifest: PackManifest = {
        let mut entry = archive.by_name(&manifest_entry)?;
        let mut raw = String::new();
        entry
            .read_to_string(&mut raw)
            .map_err(|e| InstallerError::io(path, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| InstallerError::MalformedManifest(format!("invalid manifest JSON: {e}")))?
    };

    let overrides_name = manifest.overrides.clone().unwrap_or_else(|| "overrides".to_string());
    let prefix = format!("{overrides_name}/");

    let override_entries: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(&prefix) || n.contains(&format!("/{prefix}")))
        .map(str::to_string)
        .collect();

    let (overrides_dir, extracted) = if override_entries.is_empty() {
        (None, None)
    } else {
        let temp = TempDir::new().map_err(|e| InstallerError::io(path, e))?;
        for name in &override_entries {
            let mut entry = archive.by_name(name)?;
            let Some(enclosed) = entry.enclosed_name() else {
                debug!("Skipping zip entry with unsafe path: {name}");
                continue;
            };
            let dest = temp.path().join(enclosed);
            if entry.is_dir() {
                std::fs::create_dir_all(&dest).map_err(|e| InstallerError::io(&dest, e))?;
            } else {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| InstallerError::io(parent, e))?;
                }
                let mut out =
                    File::create(&dest).map_err(|e| InstallerError::io(&dest, e))?;
                std::io::copy(&mut entry, &mut out).map_err(|e| InstallerError::io(&dest, e))?;
            }
        }
        let dir = temp.path().join(&overrides_name);
        (Some(dir), Some(temp))
    };

    Ok(ParsedManifest {
        manifest,
        overrides_dir,
        _extracted: extracted,
    })
}
