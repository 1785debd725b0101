//! Seed commitment and deterministic value derivation.
//!
//! Randomness enters the engine as a commit-reveal [`SeedCommitment`]: the
//! SHA-256 hash of the server seed is published before any outcome is drawn,
//! and the seed itself is revealed only after settlement. All outcome values
//! derive from the hybrid seed through a fixed, named scheme so a third party
//! can recompute every result byte-for-byte:
//!
//! - `combine`: nibble-wise XOR of left-padded hex strings.
//! - `derive_value(seed, nonce, upper)`: SHA-256 of `"{seed}:{nonce:010}"`,
//!   first 8 bytes big-endian as u64, scaled into `[0, upper)`.
//!
//! No language-default RNG appears anywhere in the outcome path; `OsRng` is
//! used only to mint server seeds and local fallback entropy.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which entropy sources actually contributed to a commitment. Persisted so
/// audits can distinguish fully hybrid outcomes from degraded fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyProvenance {
    /// Both the external random API and the block hash contributed.
    Hybrid,
    /// Only the external random API responded.
    ExternalOnly,
    /// Only the block-hash source responded.
    BlockOnly,
    /// Both sources failed; the seed is locally generated CSPRNG output.
    LocalFallback,
}

/// Full seed commitment for one round or pool epoch. The server seed is
/// secret until [`SeedCommitment::reveal`] after settlement; only
/// [`PublicCommitment`] leaves the engine before then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedCommitment {
    pub server_seed: String,
    pub server_seed_hash: String,
    pub external_random: Option<String>,
    pub block_hash: Option<String>,
    pub hybrid_seed: String,
    pub nonce: u64,
    pub provenance: EntropyProvenance,
}

/// The pre-outcome view published at round creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicCommitment {
    pub server_seed_hash: String,
    pub block_hash: Option<String>,
    pub provenance: EntropyProvenance,
}

/// The post-settlement reveal, sufficient for third-party verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealedSeed {
    pub server_seed: String,
    pub server_seed_hash: String,
    pub external_random: Option<String>,
    pub block_hash: Option<String>,
    pub hybrid_seed: String,
    pub final_nonce: u64,
    pub provenance: EntropyProvenance,
}

impl SeedCommitment {
    /// Build a commitment from a server seed and whatever external entropy
    /// was obtained. The hybrid seed is the XOR chain of all present parts.
    pub fn new(
        server_seed: String,
        external_random: Option<String>,
        block_hash: Option<String>,
        provenance: EntropyProvenance,
    ) -> Self {
        let server_seed_hash = sha256_hex(server_seed.as_bytes());
        let hybrid_seed = build_hybrid(&server_seed, external_random.as_deref(), block_hash.as_deref());
        Self {
            server_seed,
            server_seed_hash,
            external_random,
            block_hash,
            hybrid_seed,
            nonce: 0,
            provenance,
        }
    }

    pub fn public(&self) -> PublicCommitment {
        PublicCommitment {
            server_seed_hash: self.server_seed_hash.clone(),
            block_hash: self.block_hash.clone(),
            provenance: self.provenance,
        }
    }

    /// Consume the current nonce and advance. Each draw against the
    /// commitment uses a distinct nonce.
    pub fn next_nonce(&mut self) -> u64 {
        let n = self.nonce;
        self.nonce += 1;
        n
    }

    pub fn reveal(&self) -> RevealedSeed {
        RevealedSeed {
            server_seed: self.server_seed.clone(),
            server_seed_hash: self.server_seed_hash.clone(),
            external_random: self.external_random.clone(),
            block_hash: self.block_hash.clone(),
            hybrid_seed: self.hybrid_seed.clone(),
            final_nonce: self.nonce,
            provenance: self.provenance,
        }
    }
}

fn build_hybrid(server_seed: &str, external: Option<&str>, block_hash: Option<&str>) -> String {
    let with_external = combine(server_seed, external.unwrap_or(""));
    combine(&with_external, block_hash.unwrap_or(""))
}

/// Nibble-wise XOR of two hex strings, left-padded to equal length. If one
/// input is empty the result is simply the other, so a degraded commitment
/// still has a well-defined hybrid seed.
pub fn combine(a: &str, b: &str) -> String {
    if a.is_empty() {
        return b.to_lowercase();
    }
    if b.is_empty() {
        return a.to_lowercase();
    }

    let width = a.len().max(b.len());
    let pad = |s: &str| -> Vec<u8> {
        let mut nibbles = vec![0u8; width];
        let offset = width - s.len();
        for (i, c) in s.chars().enumerate() {
            nibbles[offset + i] = c.to_digit(16).unwrap_or(0) as u8;
        }
        nibbles
    };

    let left = pad(a);
    let right = pad(b);
    left.iter()
        .zip(right.iter())
        .map(|(x, y)| std::char::from_digit((x ^ y) as u32, 16).unwrap_or('0'))
        .collect()
}

/// Derive one deterministic integer in `[0, upper)` from the hybrid seed and
/// a draw nonce. Same inputs always yield the same value, on any process.
pub fn derive_value(hybrid_seed: &str, nonce: u64, upper: u64) -> u64 {
    assert!(upper > 0, "derive_value requires a positive upper bound");
    let x = derive_u64(hybrid_seed, nonce);
    // Scale via 128-bit multiply-shift; unbiased enough for the published
    // scheme and exactly reproducible by verifiers.
    ((upper as u128 * x as u128) >> 64) as u64
}

/// The raw 64-bit draw underlying [`derive_value`].
pub fn derive_u64(hybrid_seed: &str, nonce: u64) -> u64 {
    let digest = Sha256::digest(format!("{}:{:010}", hybrid_seed, nonce).as_bytes());
    u64::from_be_bytes(digest[0..8].try_into().expect("digest is 32 bytes"))
}

/// The crash roll defined for the Rugged pool: `[1, 1000]` from
/// `sha256(server_seed + ":" + nonce)`.
pub fn crash_roll(server_seed: &str, nonce: u64) -> u64 {
    let digest = Sha256::digest(format!("{}:{}", server_seed, nonce).as_bytes());
    let x = u64::from_be_bytes(digest[0..8].try_into().expect("digest is 32 bytes"));
    (x % 1000) + 1
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Mint a fresh 32-byte server seed from the OS CSPRNG.
pub fn generate_server_seed() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Third-party verification of a revealed seed: recompute the hash and the
/// hybrid combination from the revealed parts.
pub fn verify_reveal(revealed: &RevealedSeed) -> bool {
    if sha256_hex(revealed.server_seed.as_bytes()) != revealed.server_seed_hash {
        return false;
    }
    let recomputed = build_hybrid(
        &revealed.server_seed,
        revealed.external_random.as_deref(),
        revealed.block_hash.as_deref(),
    );
    recomputed == revealed.hybrid_seed
}
