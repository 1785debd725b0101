//! Rollhouse - Provably Fair Settlement Engine
//!
//! Commit-reveal game settlement: hybrid entropy seeds committed before any
//! outcome exists, deterministic SHA-256 outcome derivation, and an
//! append-only ledger whose entries sum to zero for every settled round.

pub mod config;
pub mod entropy;
pub mod errors;
pub mod games;
pub mod ledger;
pub mod money;
pub mod orchestrator;
pub mod round;
pub mod seed;
pub mod store;

pub use config::EngineConfig;
pub use entropy::{EntropyProvider, HttpEntropySource, HybridSeedGenerator};
pub use errors::{EngineError, EngineResult};
pub use ledger::{PayoutLedger, SettlementPlan, SettlementReport};
pub use money::Amount;
pub use orchestrator::{EngineEvent, SettlementOrchestrator};
pub use round::{Participant, Round, RoundOutcome, RoundParams, RoundStatus};
pub use seed::{verify_reveal, PublicCommitment, RevealedSeed, SeedCommitment};
pub use store::{MemoryRoundStore, RocksRoundStore, RoundStore};
