//! Wheel segment resolution.
//!
//! The landing segment is `sha256(sha256(sha256(hybrid_seed))) mod
//! segment_count`: hashing three times diffuses seed structure before the
//! modulo reduction. Boost segments are computed once per round from a
//! second derived seed and published with the round, before the spin
//! resolves.

use crate::errors::{EngineError, EngineResult};
use crate::money::Amount;
use crate::seed::{derive_value, sha256_hex};
use serde::{Deserialize, Serialize};

/// Weighted boost multipliers, in hundredths, with weights summing to 100.
const BOOST_MULTIPLIERS: [(u32, u64); 4] = [(150, 50), (200, 30), (500, 15), (1000, 5)];

/// A boost applied to one segment for one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoostSegment {
    pub segment: usize,
    /// Replacement multiplier in hundredths.
    pub multiplier: u32,
}

/// The published pre-spin layout: base multipliers plus this round's boosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelLayout {
    pub segments: Vec<u32>,
    pub boosts: Vec<BoostSegment>,
}

impl WheelLayout {
    /// Build the layout for one round. Boosts derive from
    /// `sha256(hybrid_seed + ":boost")` so they are committed alongside the
    /// spin itself yet independent of the landing draw.
    pub fn new(
        segments: &[u32],
        boost_count: usize,
        hybrid_seed: &str,
    ) -> EngineResult<Self> {
        if segments.is_empty() {
            return Err(EngineError::MalformedOutcomeInput(
                "wheel requires at least one segment".to_string(),
            ));
        }
        if boost_count > segments.len() {
            return Err(EngineError::MalformedOutcomeInput(format!(
                "boost count {} exceeds {} segments",
                boost_count,
                segments.len()
            )));
        }

        let boost_seed = sha256_hex(format!("{}:boost", hybrid_seed).as_bytes());
        let mut boosts: Vec<BoostSegment> = Vec::with_capacity(boost_count);

        for i in 0..boost_count {
            let mut segment = derive_value(&boost_seed, i as u64, segments.len() as u64) as usize;
            // Linear probe past segments already boosted this round.
            while boosts.iter().any(|b| b.segment == segment) {
                segment = (segment + 1) % segments.len();
            }
            let multiplier = pick_boost_multiplier(&boost_seed, 1_000 + i as u64);
            boosts.push(BoostSegment { segment, multiplier });
        }

        Ok(Self {
            segments: segments.to_vec(),
            boosts,
        })
    }

    /// Effective multiplier for a segment, in hundredths.
    pub fn multiplier(&self, segment: usize) -> EngineResult<u32> {
        let base = self.segments.get(segment).copied().ok_or_else(|| {
            EngineError::MalformedOutcomeInput(format!("segment {} out of range", segment))
        })?;
        Ok(self
            .boosts
            .iter()
            .find(|b| b.segment == segment)
            .map(|b| b.multiplier)
            .unwrap_or(base))
    }

    /// Payout for a stake landing on `segment`.
    pub fn payout(&self, stake: Amount, segment: usize) -> EngineResult<Amount> {
        let mult = self.multiplier(segment)?;
        stake
            .mul_div(mult as i64, 100)
            .ok_or_else(|| EngineError::MalformedOutcomeInput("payout overflow".to_string()))
    }
}

fn pick_boost_multiplier(boost_seed: &str, nonce: u64) -> u32 {
    let roll = derive_value(boost_seed, nonce, 100);
    let mut cumulative = 0u64;
    for (mult, weight) in BOOST_MULTIPLIERS {
        cumulative += weight;
        if roll < cumulative {
            return mult;
        }
    }
    BOOST_MULTIPLIERS[0].0
}

/// Landing segment for the round: triple-SHA-256 of the hybrid seed reduced
/// modulo the segment count.
pub fn resolve_segment(hybrid_seed: &str, segment_count: usize) -> EngineResult<usize> {
    if segment_count == 0 {
        return Err(EngineError::MalformedOutcomeInput(
            "wheel requires at least one segment".to_string(),
        ));
    }

    let mut digest = sha256_hex(hybrid_seed.as_bytes());
    digest = sha256_hex(digest.as_bytes());
    digest = sha256_hex(digest.as_bytes());

    let head = u64::from_str_radix(&digest[..16], 16)
        .expect("sha256 hex digest always parses");
    Ok((head % segment_count as u64) as usize)
}
