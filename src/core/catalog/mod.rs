// ─── Catalog boundary ───
// The engine never talks to the catalog API directly. Whatever wraps this
// crate injects a resolver that turns (project, file) identifier pairs into
// download URLs and expected file identity. Auth, rate limiting and
// metadata caching all live behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::InstallerResult;
use crate::core::report::ExpectedDigest;

/// Download metadata for one artifact, resolved from the remote catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    pub url: String,
    pub file_name: Option<String>,
    pub size: Option<u64>,
    #[serde(default)]
    pub digests: Vec<ExpectedDigest>,
    /// Catalog murmur2 fingerprint, when the index carries one.
    #[serde(default)]
    pub fingerprint: Option<u32>,
}

#[async_trait]
pub trait CatalogResolver: Send + Sync {
    /// Resolve a manifest identifier pair into download metadata.
    async fn resolve(&self, project_id: u32, file_id: u32) -> InstallerResult<ResolvedArtifact>;
}
