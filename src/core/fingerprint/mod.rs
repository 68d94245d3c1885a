// ─── Content Addressor ───
// Murmur2 catalog fingerprints + cryptographic digests, both streamed
// in fixed-size chunks so memory use stays constant for large mod jars.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::core::error::{InstallerError, InstallerResult};

/// Seed shared with the remote catalog's fingerprint index. Fingerprints
/// computed with any other seed are not comparable to catalog values.
pub const CATALOG_SEED: u32 = 1;

const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

const READ_CHUNK: usize = 8192;

/// Incremental MurmurHash2 (32-bit). The algorithm folds the total input
/// length into the initial state, so the length must be known up front.
pub struct Murmur2 {
    h: u32,
    tail: [u8; 4],
    tail_len: usize,
}

impl Murmur2 {
    pub fn new(seed: u32, total_len: u32) -> Self {
        Self {
            h: seed ^ total_len,
            tail: [0; 4],
            tail_len: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut input = data;

        // Complete a pending partial block first.
        if self.tail_len > 0 {
            let need = 4 - self.tail_len;
            let take = need.min(input.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&input[..take]);
            self.tail_len += take;
            input = &input[take..];

            if self.tail_len < 4 {
                return;
            }
            let k = u32::from_le_bytes(self.tail);
            self.mix(k);
            self.tail_len = 0;
        }

        let mut chunks = input.chunks_exact(4);
        for block in &mut chunks {
            let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
            self.mix(k);
        }

        let rest = chunks.remainder();
        self.tail[..rest.len()].copy_from_slice(rest);
        self.tail_len = rest.len();
    }

    pub fn finish(mut self) -> u32 {
        match self.tail_len {
            3 => {
                self.h ^= (self.tail[2] as u32) << 16;
                self.h ^= (self.tail[1] as u32) << 8;
                self.h ^= self.tail[0] as u32;
                self.h = self.h.wrapping_mul(M);
            }
            2 => {
                self.h ^= (self.tail[1] as u32) << 8;
                self.h ^= self.tail[0] as u32;
                self.h = self.h.wrapping_mul(M);
            }
            1 => {
                self.h ^= self.tail[0] as u32;
                self.h = self.h.wrapping_mul(M);
            }
            _ => {}
        }

        self.h ^= self.h >> 13;
        self.h = self.h.wrapping_mul(M);
        self.h ^= self.h >> 15;
        self.h
    }

    fn mix(&mut self, mut k: u32) {
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        self.h = self.h.wrapping_mul(M);
        self.h ^= k;
    }
}

/// One-shot MurmurHash2 over a byte slice.
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    let mut hasher = Murmur2::new(seed, data.len() as u32);
    hasher.update(data);
    hasher.finish()
}

/// The catalog strips ASCII whitespace before hashing, so identical jars
/// that differ only in archive padding still collide on purpose.
fn is_catalog_whitespace(b: u8) -> bool {
    matches!(b, 9 | 10 | 13 | 32)
}

/// Catalog fingerprint of an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8]) -> u32 {
    let filtered_len = data.iter().filter(|b| !is_catalog_whitespace(**b)).count();
    let mut hasher = Murmur2::new(CATALOG_SEED, filtered_len as u32);
    for &b in data.iter().filter(|b| !is_catalog_whitespace(**b)) {
        hasher.update(&[b]);
    }
    hasher.finish()
}

/// Catalog fingerprint of a file on disk.
///
/// Two streaming passes: the first counts non-whitespace bytes (the length
/// seeds the hash state), the second feeds them to the hasher.
pub async fn fingerprint_file(path: &Path) -> InstallerResult<u32> {
    let mut filtered_len: u64 = 0;
    {
        let mut file = File::open(path)
            .await
            .map_err(|e| InstallerError::io(path, e))?;
        let mut buffer = [0u8; READ_CHUNK];
        loop {
            let n = file
                .read(&mut buffer)
                .await
                .map_err(|e| InstallerError::io(path, e))?;
            if n == 0 {
                break;
            }
            filtered_len += buffer[..n]
                .iter()
                .filter(|b| !is_catalog_whitespace(**b))
                .count() as u64;
        }
    }

    let mut hasher = Murmur2::new(CATALOG_SEED, filtered_len as u32);
    let mut file = File::open(path)
        .await
        .map_err(|e| InstallerError::io(path, e))?;
    let mut buffer = [0u8; READ_CHUNK];
    let mut filtered = [0u8; READ_CHUNK];
    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| InstallerError::io(path, e))?;
        if n == 0 {
            break;
        }
        let mut kept = 0;
        for &b in &buffer[..n] {
            if !is_catalog_whitespace(b) {
                filtered[kept] = b;
                kept += 1;
            }
        }
        hasher.update(&filtered[..kept]);
    }

    Ok(hasher.finish())
}

/// Supported cryptographic digest families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Md5,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha1 => write!(f, "sha1"),
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
            DigestAlgorithm::Md5 => write!(f, "md5"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = InstallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "md5" => Ok(DigestAlgorithm::Md5),
            other => Err(InstallerError::Other(format!(
                "Unsupported digest algorithm: {other}"
            ))),
        }
    }
}

enum DigestState {
    Sha1(Sha1),
    Sha256(Sha256),
    Md5(Md5),
}

impl DigestState {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => DigestState::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            DigestAlgorithm::Md5 => DigestState::Md5(Md5::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Sha1(h) => h.update(data),
            DigestState::Sha256(h) => h.update(data),
            DigestState::Md5(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Sha1(h) => hex::encode(h.finalize()),
            DigestState::Sha256(h) => hex::encode(h.finalize()),
            DigestState::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hex digest of an in-memory buffer.
pub fn digest_bytes(data: &[u8], algorithm: DigestAlgorithm) -> String {
    let mut state = DigestState::new(algorithm);
    state.update(data);
    state.finalize_hex()
}

/// Streamed hex digest of a file on disk.
pub async fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> InstallerResult<String> {
    let mut file = File::open(path)
        .await
        .map_err(|e| InstallerError::io(path, e))?;
    let mut state = DigestState::new(algorithm);
    let mut buffer = [0u8; READ_CHUNK];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| InstallerError::io(path, e))?;
        if n == 0 {
            break;
        }
        state.update(&buffer[..n]);
    }

    Ok(state.finalize_hex())
}

/// Hex digests from the catalog arrive in mixed case.
pub fn hex_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
