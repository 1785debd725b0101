//! Plinko bin resolution.
//!
//! Bin probabilities are the exact binomial distribution for the row count,
//! scaled to integer weights summing to 100_000 (largest-remainder
//! normalization). The bin index comes from cumulative-distribution sampling
//! against a ticket derived from the committed seed, so the probability mass
//! itself is fully auditable. House edge lives in the published multiplier
//! tables, never in seed-independent probability shifts.

use crate::errors::{EngineError, EngineResult};
use crate::money::Amount;
use crate::seed::derive_value;
use serde::{Deserialize, Serialize};

/// Weight basis: bin weights per row count sum to exactly this.
pub const WEIGHT_BASIS: u64 = 100_000;

/// Risk level selecting a multiplier table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlinkoRisk {
    Low,
    Medium,
    High,
}

/// Multipliers in hundredths (50 = 0.5x), indexed by bin. One table per
/// supported row count and risk level.
const MULT_8: [[u32; 9]; 3] = [
    [560, 210, 110, 100, 50, 100, 110, 210, 560],
    [1300, 300, 130, 70, 40, 70, 130, 300, 1300],
    [2900, 400, 150, 30, 20, 30, 150, 400, 2900],
];

const MULT_12: [[u32; 13]; 3] = [
    [1000, 300, 160, 140, 110, 100, 50, 100, 110, 140, 160, 300, 1000],
    [3300, 1100, 400, 200, 110, 60, 30, 60, 110, 200, 400, 1100, 3300],
    [17000, 2400, 810, 200, 70, 20, 20, 20, 70, 200, 810, 2400, 17000],
];

const MULT_16: [[u32; 17]; 3] = [
    [1600, 900, 200, 140, 140, 120, 110, 100, 50, 100, 110, 120, 140, 140, 200, 900, 1600],
    [11000, 4100, 1000, 500, 300, 150, 100, 50, 30, 50, 100, 150, 300, 500, 1000, 4100, 11000],
    [100000, 13000, 2600, 900, 400, 200, 20, 20, 20, 20, 20, 200, 400, 900, 2600, 13000, 100000],
];

/// Row counts the multiplier tables are published for.
pub const SUPPORTED_ROWS: [u8; 3] = [8, 12, 16];

/// Exact binomial weights for `rows`, scaled to sum [`WEIGHT_BASIS`].
pub fn bin_weights(rows: u8) -> EngineResult<Vec<u64>> {
    if !SUPPORTED_ROWS.contains(&rows) {
        return Err(EngineError::MalformedOutcomeInput(format!(
            "unsupported plinko row count {}",
            rows
        )));
    }

    let n = rows as u64;
    // Pascal-row binomial coefficients; fits comfortably in u128 for n <= 16.
    let coefficients: Vec<u128> = (0..=n)
        .scan(1u128, |c, k| {
            let current = *c;
            *c = *c * (n - k) as u128 / (k + 1) as u128;
            Some(current)
        })
        .collect();
    let denom: u128 = 1 << n;

    // Largest-remainder scaling so the integer weights sum exactly.
    let mut weights: Vec<u64> = Vec::with_capacity(coefficients.len());
    let mut remainders: Vec<(usize, u128)> = Vec::with_capacity(coefficients.len());
    for (i, &c) in coefficients.iter().enumerate() {
        let scaled = c * WEIGHT_BASIS as u128;
        weights.push((scaled / denom) as u64);
        remainders.push((i, scaled % denom));
    }

    let assigned: u64 = weights.iter().sum();
    let mut shortfall = WEIGHT_BASIS - assigned;
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (i, _) in remainders {
        if shortfall == 0 {
            break;
        }
        weights[i] += 1;
        shortfall -= 1;
    }

    Ok(weights)
}

/// Resolve the bin index for one play from the committed seed.
pub fn resolve_bin(hybrid_seed: &str, nonce: u64, rows: u8) -> EngineResult<usize> {
    let weights = bin_weights(rows)?;
    let ticket = derive_value(hybrid_seed, nonce, WEIGHT_BASIS);

    let mut cumulative = 0u64;
    for (bin, &w) in weights.iter().enumerate() {
        cumulative += w;
        if ticket < cumulative {
            return Ok(bin);
        }
    }
    // Weights sum exactly to the basis and the ticket is below it.
    unreachable!("ticket {} not covered by cumulative weights", ticket)
}

/// Published multiplier for a bin, in hundredths.
pub fn multiplier(rows: u8, risk: PlinkoRisk, bin: usize) -> EngineResult<u32> {
    let risk_idx = match risk {
        PlinkoRisk::Low => 0,
        PlinkoRisk::Medium => 1,
        PlinkoRisk::High => 2,
    };

    let table: &[u32] = match rows {
        8 => &MULT_8[risk_idx],
        12 => &MULT_12[risk_idx],
        16 => &MULT_16[risk_idx],
        other => {
            return Err(EngineError::MalformedOutcomeInput(format!(
                "unsupported plinko row count {}",
                other
            )))
        }
    };

    table.get(bin).copied().ok_or_else(|| {
        EngineError::MalformedOutcomeInput(format!("bin {} out of range for {} rows", bin, rows))
    })
}

/// Payout for a stake landing in `bin`: `stake * multiplier / 100`,
/// truncated toward zero in integer math.
pub fn payout(stake: Amount, rows: u8, risk: PlinkoRisk, bin: usize) -> EngineResult<Amount> {
    let mult = multiplier(rows, risk, bin)?;
    stake
        .mul_div(mult as i64, 100)
        .ok_or_else(|| EngineError::MalformedOutcomeInput("payout overflow".to_string()))
}
