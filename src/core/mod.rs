// ─── forgepack Core ───
// Download & installation engine for CurseForge-style modpacks.
//
// Architecture:
//   core/
//     manifest/    — Pack manifest model + loose-file/zip parser
//     catalog/     — External catalog resolver boundary (trait only)
//     fingerprint/ — Murmur2 catalog fingerprint + cryptographic digests
//     transfer/    — Single resumable range-capable fetch to a staging file
//     downloader/  — Bounded-concurrency batch manager with verification
//     instance/    — Instance layout, assembler, backup/rollback
//     report       — ArtifactRef / result / report types

pub mod catalog;
pub mod downloader;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod instance;
pub mod manifest;
pub mod report;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testutil;
