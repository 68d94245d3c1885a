pub mod core;

pub use crate::core::catalog::{CatalogResolver, ResolvedArtifact};
pub use crate::core::downloader::{BatchProgressFn, DownloadManager};
pub use crate::core::error::{InstallerError, InstallerResult};
pub use crate::core::fingerprint::DigestAlgorithm;
pub use crate::core::http::build_http_client;
pub use crate::core::instance::{InstallOptions, InstanceAssembler, InstanceLayout};
pub use crate::core::manifest::{ManifestEntry, PackManifest, ParsedManifest};
pub use crate::core::report::{
    ArtifactRef, ArtifactResult, ExpectedDigest, InstallPhase, InstallReport, TransferStatus,
};
