//! Per-game outcome resolvers: pure mappings from a committed seed to a
//! game-specific result. Nothing in here touches balances or stores.

pub mod case_battle;
pub mod plinko;
pub mod rugged;
pub mod wheel;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported game kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    CaseBattle,
    Plinko,
    Wheel,
    Rugged,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::CaseBattle => write!(f, "case_battle"),
            GameKind::Plinko => write!(f, "plinko"),
            GameKind::Wheel => write!(f, "wheel"),
            GameKind::Rugged => write!(f, "rugged"),
        }
    }
}
