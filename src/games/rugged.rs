//! Crash mechanics for the Rugged pool.
//!
//! Every stake-adding action draws a roll in `[1, 1000]` from
//! `sha256(server_seed + ":" + nonce)`. A roll of exactly 1, or the pool
//! sitting at or below its floor, crashes the epoch: the pool splits into a
//! jackpot share and a house share, open positions are forfeited, and a
//! fresh seed commitment starts the next epoch.

use crate::errors::{EngineError, EngineResult};
use crate::money::Amount;
use crate::seed::crash_roll;
use serde::{Deserialize, Serialize};

/// Result of one crash check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrashCheck {
    pub roll: u64,
    pub crashed: bool,
    /// The condition that fired, for the audit trail.
    pub trigger: Option<CrashTrigger>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrashTrigger {
    RollOfOne,
    PoolFloor,
}

/// How a crashed pool divides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrashSplit {
    pub jackpot: Amount,
    pub house: Amount,
}

/// Run the crash roll for the current stake action.
pub fn check_crash(
    server_seed: &str,
    nonce: u64,
    pool_total: Amount,
    floor: Amount,
) -> CrashCheck {
    let roll = crash_roll(server_seed, nonce);
    if roll == 1 {
        return CrashCheck {
            roll,
            crashed: true,
            trigger: Some(CrashTrigger::RollOfOne),
        };
    }
    if pool_total <= floor {
        return CrashCheck {
            roll,
            crashed: true,
            trigger: Some(CrashTrigger::PoolFloor),
        };
    }
    CrashCheck {
        roll,
        crashed: false,
        trigger: None,
    }
}

/// Split a crashed pool: jackpot takes `floor(pool * permille / 1000)`, the
/// house takes the remainder, so the two shares always sum to the pool.
pub fn split_pool(pool_total: Amount, jackpot_permille: u32) -> EngineResult<CrashSplit> {
    if jackpot_permille > 1_000 {
        return Err(EngineError::MalformedOutcomeInput(format!(
            "jackpot permille {} exceeds 1000",
            jackpot_permille
        )));
    }
    if pool_total.is_negative() {
        return Err(EngineError::MalformedOutcomeInput(
            "cannot split a negative pool".to_string(),
        ));
    }

    let jackpot = pool_total
        .mul_div(jackpot_permille as i64, 1_000)
        .ok_or_else(|| EngineError::MalformedOutcomeInput("pool split overflow".to_string()))?;
    let house = pool_total
        .checked_sub(jackpot)
        .ok_or_else(|| EngineError::MalformedOutcomeInput("pool split overflow".to_string()))?;

    Ok(CrashSplit { jackpot, house })
}

/// Current liquidation value of an open position: the stake scaled by pool
/// growth since entry, in 128-bit integer math.
pub fn position_value(
    stake: Amount,
    pool_at_entry: Amount,
    pool_now: Amount,
) -> EngineResult<Amount> {
    if !pool_at_entry.is_positive() {
        return Err(EngineError::MalformedOutcomeInput(
            "entry snapshot must be positive".to_string(),
        ));
    }
    stake
        .mul_div(pool_now.minor(), pool_at_entry.minor())
        .ok_or_else(|| EngineError::MalformedOutcomeInput("position value overflow".to_string()))
}
