//! Round state machine and participant records.
//!
//! A round moves strictly `Created -> Filling -> Locked -> Settled`.
//! `Settled` is terminal: no operation may leave it, and any mutation
//! targeting a settled round fails with `RoundAlreadyClosed`.

use crate::errors::{EngineError, EngineResult};
use crate::games::case_battle::{TicketDraw, TicketTable};
use crate::games::plinko::PlinkoRisk;
use crate::games::wheel::WheelLayout;
use crate::games::GameKind;
use crate::money::Amount;
use crate::seed::SeedCommitment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Round lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Initiator has committed a stake; commitment published; joinable.
    Created,
    /// Additional participants are adding stakes.
    Filling,
    /// Capacity reached or explicitly opened; no further joins.
    Locked,
    /// Outcome resolved and pot distributed. Terminal.
    Settled,
}

impl RoundStatus {
    pub fn can_transition_to(self, next: RoundStatus) -> bool {
        matches!(
            (self, next),
            (RoundStatus::Created, RoundStatus::Filling)
                | (RoundStatus::Created, RoundStatus::Locked)
                | (RoundStatus::Filling, RoundStatus::Locked)
                | (RoundStatus::Locked, RoundStatus::Settled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RoundStatus::Settled)
    }
}

/// A per-participant claim on the round's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    /// Stake committed at entry, minor units.
    pub stake: Amount,
    /// Shared-resource value observed at entry (pool games), zero otherwise.
    pub entry_snapshot: Amount,
    /// Aggregate value resolved for this participant at settlement.
    pub resolved_value: Option<Amount>,
    /// Team/side for grouped settlement. Solo games use team 0.
    pub team: u8,
    /// Synthetic fill agent; never receives real-money credit.
    pub is_bot: bool,
    /// Explicit readiness for a manually triggered lock.
    pub ready: bool,
}

impl Participant {
    pub fn human(user_id: Uuid, stake: Amount, team: u8) -> Self {
        Self {
            user_id,
            stake,
            entry_snapshot: Amount::ZERO,
            resolved_value: None,
            team,
            is_bot: false,
            ready: false,
        }
    }

    pub fn bot(stake: Amount, team: u8) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            stake,
            entry_snapshot: Amount::ZERO,
            resolved_value: None,
            team,
            is_bot: true,
            ready: true,
        }
    }
}

/// Game parameters fixed at round creation and published with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundParams {
    CaseBattle {
        table: TicketTable,
        /// Cases each participant opens; one ticket draw per case.
        cases_per_participant: u32,
    },
    Plinko {
        rows: u8,
        risk: PlinkoRisk,
    },
    Wheel {
        /// Ordered base multipliers in hundredths.
        segments: Vec<u32>,
        /// Boost segments derived from the committed seed at creation.
        boost_count: usize,
    },
}

impl RoundParams {
    pub fn kind(&self) -> GameKind {
        match self {
            RoundParams::CaseBattle { .. } => GameKind::CaseBattle,
            RoundParams::Plinko { .. } => GameKind::Plinko,
            RoundParams::Wheel { .. } => GameKind::Wheel,
        }
    }
}

/// The resolved result persisted with a settled round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    CaseBattle {
        /// Draws per participant, in seat order.
        draws: Vec<Vec<TicketDraw>>,
        winning_team: u8,
        /// All teams tied for the win when more than one entry.
        tied_teams: Vec<u8>,
    },
    Plinko {
        bin: usize,
        multiplier: u32,
    },
    Wheel {
        segment: usize,
        multiplier: u32,
    },
}

/// One game round: battle, plinko play, or wheel spin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub kind: GameKind,
    pub status: RoundStatus,
    /// Participant count that triggers the automatic lock.
    pub capacity: usize,
    pub participants: Vec<Participant>,
    /// Sum of all stakes, minor units.
    pub pot: Amount,
    pub seed: SeedCommitment,
    pub params: RoundParams,
    pub outcome: Option<RoundOutcome>,
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped on every store write.
    pub version: u64,
}

impl Round {
    pub fn new(
        params: RoundParams,
        capacity: usize,
        seed: SeedCommitment,
        initiator: Participant,
    ) -> Self {
        let kind = params.kind();
        let pot = initiator.stake;
        let mut round = Self {
            id: Uuid::new_v4(),
            kind,
            status: RoundStatus::Created,
            capacity: capacity.max(1),
            participants: vec![initiator],
            pot,
            seed,
            params,
            outcome: None,
            created_at: Utc::now(),
            locked_at: None,
            settled_at: None,
            version: 0,
        };
        // Solo games fill their capacity at creation.
        if round.participants.len() == round.capacity {
            round.lock_internal();
        }
        round
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::RoundAlreadyClosed(self.id));
        }
        Ok(())
    }

    /// Add a participant while the round is joinable. Locks automatically
    /// when capacity is reached.
    pub fn join(&mut self, participant: Participant) -> EngineResult<()> {
        self.ensure_open()?;
        if self.status == RoundStatus::Locked {
            return Err(EngineError::InvalidTransition {
                round_id: self.id,
                detail: "round is locked".to_string(),
            });
        }
        if self.participants.len() >= self.capacity {
            return Err(EngineError::InvalidTransition {
                round_id: self.id,
                detail: "round is full".to_string(),
            });
        }

        self.pot = self
            .pot
            .checked_add(participant.stake)
            .ok_or_else(|| EngineError::MalformedOutcomeInput("pot overflow".to_string()))?;
        self.participants.push(participant);

        if self.status == RoundStatus::Created {
            self.status = RoundStatus::Filling;
        }
        if self.participants.len() == self.capacity {
            self.lock_internal();
        }
        Ok(())
    }

    /// Record a human participant's explicit readiness.
    pub fn mark_ready(&mut self, user_id: Uuid) -> EngineResult<()> {
        self.ensure_open()?;
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(EngineError::UnknownUser(user_id))?;
        participant.ready = true;
        Ok(())
    }

    /// Manual lock, requiring all human participants to be ready.
    pub fn lock(&mut self) -> EngineResult<()> {
        self.ensure_open()?;
        if self.status == RoundStatus::Locked {
            return Ok(());
        }
        if !self.participants.iter().filter(|p| !p.is_bot).all(|p| p.ready) {
            return Err(EngineError::InvalidTransition {
                round_id: self.id,
                detail: "not all human participants are ready".to_string(),
            });
        }
        self.lock_internal();
        Ok(())
    }

    fn lock_internal(&mut self) {
        debug_assert!(self.status.can_transition_to(RoundStatus::Locked));
        self.status = RoundStatus::Locked;
        self.locked_at = Some(Utc::now());
    }

    /// Move to the terminal state with a resolved outcome. Only valid from
    /// `Locked`; a second call yields `AlreadySettled`.
    pub fn settle(&mut self, outcome: RoundOutcome) -> EngineResult<()> {
        if self.status == RoundStatus::Settled {
            return Err(EngineError::AlreadySettled(self.id));
        }
        if self.status != RoundStatus::Locked {
            return Err(EngineError::InvalidTransition {
                round_id: self.id,
                detail: format!("cannot settle from {:?}", self.status),
            });
        }
        self.outcome = Some(outcome);
        self.status = RoundStatus::Settled;
        self.settled_at = Some(Utc::now());
        Ok(())
    }

    /// The published layout for a wheel round. Boosts derive from the
    /// committed seed, so the layout is fixed (and auditable against the
    /// reveal) from the moment the round exists. Errors for other games.
    pub fn wheel_layout(&self) -> EngineResult<WheelLayout> {
        match &self.params {
            RoundParams::Wheel {
                segments,
                boost_count,
            } => WheelLayout::new(segments, *boost_count, &self.seed.hybrid_seed),
            _ => Err(EngineError::MalformedOutcomeInput(format!(
                "{} round has no wheel layout",
                self.kind
            ))),
        }
    }

    /// Whether the round should still appear in discovery listings.
    pub fn visible_at(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self.status {
            RoundStatus::Created | RoundStatus::Filling => now - self.created_at <= window,
            RoundStatus::Locked => true,
            RoundStatus::Settled => false,
        }
    }
}
