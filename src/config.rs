//! Engine configuration with validation and defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the settlement engine.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub entropy: EntropyConfig,
    pub rounds: RoundConfig,
    pub games: GamesConfig,
    pub storage: StorageConfig,
}

/// External entropy endpoints and deadlines.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntropyConfig {
    /// Random-number API endpoint returning JSON with a hex field.
    pub random_api_url: String,
    /// JSON field carrying the random hex value.
    pub random_field: String,
    /// Blockchain explorer endpoint returning the latest block.
    pub block_hash_url: String,
    /// JSON field carrying the block hash.
    pub hash_field: String,
    /// Hard deadline per external fetch. Calls past this are abandoned.
    pub timeout_ms: u64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            random_api_url: "https://api.random.example/hex".to_string(),
            random_field: "random".to_string(),
            block_hash_url: "https://blockchain.info/q/latesthash".to_string(),
            hash_field: "hash".to_string(),
            timeout_ms: 4_000,
        }
    }
}

/// Round lifecycle tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Rounds still unlocked after this window drop out of discovery
    /// listings. They are not cancelled; committed stakes stay valid.
    pub visibility_window_secs: u64,
    /// Bounded retries for optimistic-lock conflicts on shared resources.
    pub max_conflict_retries: u32,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            visibility_window_secs: 300,
            max_conflict_retries: 5,
        }
    }
}

/// Fixed economic parameters per game.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GamesConfig {
    /// Ordered base multipliers for wheel segments, in hundredths
    /// (120 = 1.2x). The published list the spin indexes into.
    pub wheel_segments: Vec<u32>,
    /// How many boost segments each wheel round publishes.
    pub wheel_boost_count: usize,
    /// Rugged pool balance at or below this forces a crash.
    pub rugged_floor_minor: i64,
    /// Jackpot share of a crashed pool, in permille (500 = 50/50 split).
    pub crash_jackpot_permille: u32,
}

impl Default for GamesConfig {
    fn default() -> Self {
        Self {
            // 25-segment wheel: heavy on low multipliers, one 10x.
            wheel_segments: vec![
                0, 120, 0, 150, 0, 120, 0, 200, 0, 120, 0, 150, 0, 120, 0, 300, 0, 120, 0, 150,
                0, 120, 0, 200, 1000,
            ],
            wheel_boost_count: 3,
            rugged_floor_minor: 10_000,
            crash_jackpot_permille: 500,
        }
    }
}

/// Archive store location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/settlement_data".to_string(),
        }
    }
}

impl EngineConfig {
    /// Profile for offline simulation and tests: short deadlines, local data.
    pub fn offline() -> Self {
        Self {
            entropy: EntropyConfig {
                timeout_ms: 200,
                ..Default::default()
            },
            rounds: RoundConfig {
                visibility_window_secs: 60,
                max_conflict_retries: 3,
            },
            storage: StorageConfig {
                data_directory: "./DB/settlement_test".to_string(),
            },
            ..Default::default()
        }
    }

    /// Validate logical consistency before the engine starts.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        // Short deadlines are allowed for offline profiles; anything past
        // 10s would stall round creation behind a dead API.
        if !(100..=10_000).contains(&self.entropy.timeout_ms) {
            return Err(ConfigValidationError::InvalidValue(
                "entropy.timeout_ms must be between 100 and 10000".to_string(),
            ));
        }

        if self.games.wheel_segments.is_empty() {
            return Err(ConfigValidationError::InvalidValue(
                "games.wheel_segments must not be empty".to_string(),
            ));
        }

        if self.games.wheel_boost_count > self.games.wheel_segments.len() {
            return Err(ConfigValidationError::LogicalInconsistency(
                "wheel_boost_count exceeds segment count".to_string(),
            ));
        }

        if self.games.crash_jackpot_permille > 1_000 {
            return Err(ConfigValidationError::InvalidValue(
                "crash_jackpot_permille must be <= 1000".to_string(),
            ));
        }

        if self.rounds.max_conflict_retries == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "max_conflict_retries must be > 0".to_string(),
            ));
        }

        if self.games.rugged_floor_minor < 0 {
            return Err(ConfigValidationError::InvalidValue(
                "rugged_floor_minor must be non-negative".to_string(),
            ));
        }

        Ok(())
    }

    pub fn entropy_timeout(&self) -> Duration {
        Duration::from_millis(self.entropy.timeout_ms)
    }

    pub fn visibility_window(&self) -> Duration {
        Duration::from_secs(self.rounds.visibility_window_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Configuration logical inconsistency: {0}")]
    LogicalInconsistency(String),
}
