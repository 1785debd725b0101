//! Round lifecycle orchestration.
//!
//! The orchestrator owns the sequencing: seed commitment at creation, stake
//! collection while filling, outcome derivation from the committed seed at
//! settlement (never re-rolled), and distribution through the ledger. All
//! collaborators are injected; nothing here reaches for process-wide state.
//!
//! Round mutations are serialized per round. When the store supports
//! multi-document transactions we lean on those; otherwise (both bundled
//! stores) a per-round async mutex serializes the read-modify-write and the
//! store's version check stays on as a backstop against external writers.
//! The strategy is chosen once at startup and logged, never assumed.

use crate::config::EngineConfig;
use crate::entropy::{EntropyProvider, HybridSeedGenerator};
use crate::errors::{EngineError, EngineResult};
use crate::games::{case_battle, plinko, wheel, GameKind};
use crate::ledger::{PayoutLedger, PoolBuyReceipt, PoolSellReceipt, SettlementReport};
use crate::money::Amount;
use crate::round::{Participant, Round, RoundOutcome, RoundParams, RoundStatus};
use crate::seed::{PublicCommitment, RevealedSeed};
use crate::store::RoundStore;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Lifecycle notifications handed to collaborators (sockets, logs). Delivery
/// is best-effort; settlement never depends on a subscriber.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RoundCreated {
        round_id: Uuid,
        kind: GameKind,
        commitment: PublicCommitment,
    },
    RoundLocked {
        round_id: Uuid,
    },
    RoundSettled {
        round_id: Uuid,
        report: SettlementReport,
        reveal: RevealedSeed,
    },
    PoolCrashed {
        pool_id: String,
        jackpot: Amount,
        house: Amount,
        reveal: RevealedSeed,
    },
    PoolEpochOpened {
        pool_id: String,
        epoch: u64,
        commitment: PublicCommitment,
    },
}

pub struct SettlementOrchestrator<P: EntropyProvider, S: RoundStore> {
    seeds: HybridSeedGenerator<P>,
    ledger: Arc<PayoutLedger>,
    store: Arc<S>,
    config: EngineConfig,
    round_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl<P: EntropyProvider, S: RoundStore> SettlementOrchestrator<P, S> {
    pub fn new(
        provider: P,
        ledger: Arc<PayoutLedger>,
        store: Arc<S>,
        config: EngineConfig,
    ) -> Self {
        let strategy = if store.supports_transactions() {
            "store transactions"
        } else {
            "per-resource locks"
        };
        tracing::info!(strategy, "settlement concurrency strategy selected");

        let seeds = HybridSeedGenerator::new(provider, config.entropy_timeout());
        let (events, _) = broadcast::channel(256);
        Self {
            seeds,
            ledger,
            store,
            config,
            round_locks: DashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &PayoutLedger {
        &self.ledger
    }

    fn round_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.round_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn emit(&self, event: EngineEvent) {
        // A closed channel just means nobody is listening.
        let _ = self.events.send(event);
    }

    // ---- round lifecycle ---------------------------------------------

    /// Commit a fresh hybrid seed, take the initiator's stake and persist
    /// the round. The commitment hash is public from this moment, before
    /// any outcome exists.
    pub async fn create_round(
        &self,
        user_id: Uuid,
        stake: Amount,
        team: u8,
        capacity: usize,
        params: RoundParams,
    ) -> EngineResult<Round> {
        self.validate_params(&params)?;
        let seed = self.seeds.generate().await;
        let round = Round::new(params, capacity, seed, Participant::human(user_id, stake, team));

        self.ledger
            .apply_stake(user_id, stake, &round.id.to_string())?;
        if let Err(e) = self.store.insert(&round).await {
            // Undo the stake if the round never made it into the store.
            self.ledger
                .apply_payout(user_id, stake, &round.id.to_string());
            return Err(e);
        }

        tracing::info!(
            round = %round.id,
            kind = %round.kind,
            hash = %round.seed.server_seed_hash,
            "round created"
        );
        self.emit(EngineEvent::RoundCreated {
            round_id: round.id,
            kind: round.kind,
            commitment: round.seed.public(),
        });
        Ok(round)
    }

    /// Take the joiner's stake and add them to the round. Locks
    /// automatically when the seat fills the capacity.
    pub async fn join_round(
        &self,
        round_id: Uuid,
        user_id: Uuid,
        stake: Amount,
        team: u8,
    ) -> EngineResult<Round> {
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let mut round = self.load(round_id).await?;
        let version = round.version;

        // Validate the join on the copy before touching any balance.
        round.join(Participant::human(user_id, stake, team))?;
        self.ledger
            .apply_stake(user_id, stake, &round_id.to_string())?;

        if let Err(e) = self.put_with_retry(&mut round, version).await {
            self.ledger
                .apply_payout(user_id, stake, &round_id.to_string());
            return Err(e);
        }

        if round.status == RoundStatus::Locked {
            self.emit(EngineEvent::RoundLocked { round_id });
        }
        Ok(round)
    }

    /// Fill every remaining seat with synthetic agents staking `stake`
    /// each, alternating sides. Bots hold no balance; their stakes and any
    /// winnings live only in the audit trail.
    pub async fn fill_synthetic(&self, round_id: Uuid, stake: Amount) -> EngineResult<Round> {
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let mut round = self.load(round_id).await?;
        let version = round.version;
        let round_ref = round_id.to_string();

        let mut bots = Vec::new();
        while round.participants.len() < round.capacity {
            let team = (round.participants.len() % 2) as u8;
            let bot = Participant::bot(stake, team);
            bots.push(bot.user_id);
            round.join(bot)?;
        }

        if !bots.is_empty() {
            // Persist first; the audit entries follow only once the seats
            // are durably in the round.
            self.put_with_retry(&mut round, version).await?;
            for bot_id in &bots {
                self.ledger.record_bot_stake(*bot_id, stake, &round_ref);
            }
            tracing::info!(round = %round_id, filled = bots.len(), "synthetic fill applied");
            if round.status == RoundStatus::Locked {
                self.emit(EngineEvent::RoundLocked { round_id });
            }
        }
        Ok(round)
    }

    /// Record readiness for a manually triggered lock.
    pub async fn mark_ready(&self, round_id: Uuid, user_id: Uuid) -> EngineResult<()> {
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let mut round = self.load(round_id).await?;
        let version = round.version;
        round.mark_ready(user_id)?;
        self.put_with_retry(&mut round, version).await
    }

    /// Manual lock ("open"), requiring every human participant's explicit
    /// readiness.
    pub async fn lock_round(&self, round_id: Uuid) -> EngineResult<Round> {
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let mut round = self.load(round_id).await?;
        let version = round.version;
        let was_locked = round.status == RoundStatus::Locked;
        round.lock()?;
        self.put_with_retry(&mut round, version).await?;

        if !was_locked {
            self.emit(EngineEvent::RoundLocked { round_id });
        }
        Ok(round)
    }

    /// Resolve the outcome from the committed seed and distribute the pot.
    /// Idempotent: a second call fails with `AlreadySettled` before any
    /// balance mutation.
    pub async fn settle_round(
        &self,
        round_id: Uuid,
        tiebreak: Option<u8>,
    ) -> EngineResult<SettlementReport> {
        let lock = self.round_lock(round_id);
        let _guard = lock.lock().await;

        let mut round = self.load(round_id).await?;
        let version = round.version;

        let plan = match round.params.clone() {
            RoundParams::CaseBattle {
                table,
                cases_per_participant,
            } => {
                let outcome = resolve_battle(&mut round, &table, cases_per_participant)?;
                self.ledger.plan_battle(&mut round, outcome, tiebreak)?
            }
            RoundParams::Plinko { rows, risk } => {
                let bin = plinko::resolve_bin(&round.seed.hybrid_seed, 0, rows)?;
                let multiplier = plinko::multiplier(rows, risk, bin)?;
                let stake = round
                    .participants
                    .first()
                    .map(|p| p.stake)
                    .unwrap_or(Amount::ZERO);
                let payout = plinko::payout(stake, rows, risk, bin)?;
                self.ledger
                    .plan_solo(&mut round, RoundOutcome::Plinko { bin, multiplier }, payout)?
            }
            RoundParams::Wheel { .. } => {
                let layout = round.wheel_layout()?;
                let segment = wheel::resolve_segment(&round.seed.hybrid_seed, layout.segments.len())?;
                let multiplier = layout.multiplier(segment)?;
                let stake = round
                    .participants
                    .first()
                    .map(|p| p.stake)
                    .unwrap_or(Amount::ZERO);
                let payout = layout.payout(stake, segment)?;
                self.ledger
                    .plan_solo(&mut round, RoundOutcome::Wheel { segment, multiplier }, payout)?
            }
        };

        // Store the settled round before any balance moves. A failed write
        // leaves the ledger untouched and the stored round still Locked,
        // so a retry re-derives the identical settlement from the
        // committed seed.
        self.put_with_retry(&mut round, version).await?;
        let report = self.ledger.commit_settlement(plan);

        let reveal = round.seed.reveal();
        tracing::info!(
            round = %round_id,
            seed = %reveal.server_seed,
            nonce = reveal.final_nonce,
            "round settled, seed revealed"
        );
        self.emit(EngineEvent::RoundSettled {
            round_id,
            report: report.clone(),
            reveal,
        });
        Ok(report)
    }

    // ---- queries -----------------------------------------------------

    pub async fn get_round(&self, round_id: Uuid) -> EngineResult<Round> {
        self.load(round_id).await
    }

    /// Rounds eligible for discovery listings: everything locked, plus
    /// unlocked rounds still inside the visibility window. Stale unlocked
    /// rounds drop out of the listing but are never cancelled.
    pub async fn list_visible(&self) -> EngineResult<Vec<Round>> {
        let window = chrono::Duration::seconds(self.config.rounds.visibility_window_secs as i64);
        let now = Utc::now();
        let mut open = self.store.list_open().await?;
        open.retain(|r| r.visible_at(now, window));
        Ok(open)
    }

    /// Settled archive, newest first.
    pub async fn list_settled(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<Round>, Option<String>)> {
        self.store.list_settled(cursor, limit).await
    }

    /// The reveal for a settled round: everything a third party needs to
    /// recompute the outcome.
    pub async fn reveal(&self, round_id: Uuid) -> EngineResult<RevealedSeed> {
        let round = self.load(round_id).await?;
        if round.status != RoundStatus::Settled {
            return Err(EngineError::InvalidTransition {
                round_id,
                detail: "seed reveals only after settlement".to_string(),
            });
        }
        Ok(round.seed.reveal())
    }

    // ---- rugged pool -------------------------------------------------

    /// Open a pool with a fresh epoch commitment.
    pub async fn create_rugged_pool(&self, pool_id: &str) -> EngineResult<PublicCommitment> {
        let seed = self.seeds.generate().await;
        let commitment = seed.public();
        self.ledger.create_pool(
            pool_id,
            Amount::from_minor(self.config.games.rugged_floor_minor),
            self.config.games.crash_jackpot_permille,
            seed,
        )?;
        self.emit(EngineEvent::PoolEpochOpened {
            pool_id: pool_id.to_string(),
            epoch: 0,
            commitment: commitment.clone(),
        });
        Ok(commitment)
    }

    /// Buy into the pool. A crashing buy settles the epoch inside the
    /// ledger; this layer then commits a fresh seed so the next epoch can
    /// open without a gap.
    pub async fn pool_buy(
        &self,
        pool_id: &str,
        user_id: Uuid,
        amount: Amount,
    ) -> EngineResult<PoolBuyReceipt> {
        let receipt = self.ledger.pool_buy(pool_id, user_id, amount, false).await?;

        if let Some(split) = &receipt.split {
            if let Some(reveal) = &receipt.revealed {
                tracing::warn!(
                    pool = pool_id,
                    jackpot = %split.jackpot,
                    house = %split.house,
                    "pool crashed"
                );
                self.emit(EngineEvent::PoolCrashed {
                    pool_id: pool_id.to_string(),
                    jackpot: split.jackpot,
                    house: split.house,
                    reveal: reveal.clone(),
                });
            }
            let seed = self.seeds.generate().await;
            let commitment = seed.public();
            let epoch = self.ledger.reset_pool_epoch(pool_id, seed).await?;
            self.emit(EngineEvent::PoolEpochOpened {
                pool_id: pool_id.to_string(),
                epoch,
                commitment,
            });
        }
        Ok(receipt)
    }

    /// Liquidate the caller's position at current pool value.
    pub async fn pool_sell(&self, pool_id: &str, user_id: Uuid) -> EngineResult<PoolSellReceipt> {
        self.ledger.pool_sell(pool_id, user_id).await
    }

    // ---- internals ---------------------------------------------------

    async fn load(&self, round_id: Uuid) -> EngineResult<Round> {
        self.store
            .get(round_id)
            .await?
            .ok_or(EngineError::UnknownRound(round_id))
    }

    /// Optimistic write with bounded retry. Under the per-round lock a
    /// conflict only means an external writer raced us; reload and reapply
    /// the version check a few times before giving up.
    async fn put_with_retry(&self, round: &mut Round, first_version: u64) -> EngineResult<()> {
        let mut version = first_version;
        let retries = self.config.rounds.max_conflict_retries;
        for attempt in 1..=retries {
            match self.store.put(round, version).await {
                Ok(()) => return Ok(()),
                Err(EngineError::ConcurrencyConflict { .. }) if attempt < retries => {
                    let current = self.load(round.id).await?;
                    version = current.version;
                    tracing::debug!(round = %round.id, attempt, "version conflict, retrying write");
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::ConcurrencyConflict {
            resource: format!("round:{}", round.id),
            attempts: retries,
        })
    }

    /// Reject malformed game parameters at the boundary, before any stake
    /// is taken. Nothing past this point may fail on the round's shape.
    fn validate_params(&self, params: &RoundParams) -> EngineResult<()> {
        match params {
            RoundParams::CaseBattle {
                cases_per_participant,
                ..
            } if *cases_per_participant == 0 => Err(EngineError::MalformedOutcomeInput(
                "case battle needs at least one case per participant".to_string(),
            )),
            RoundParams::Plinko { rows, .. } if !plinko::SUPPORTED_ROWS.contains(rows) => {
                Err(EngineError::MalformedOutcomeInput(format!(
                    "unsupported plinko row count {}",
                    rows
                )))
            }
            RoundParams::Wheel {
                segments,
                boost_count,
            } => {
                if segments.is_empty() {
                    return Err(EngineError::MalformedOutcomeInput(
                        "wheel requires at least one segment".to_string(),
                    ));
                }
                if !segments.iter().any(|m| *m > 0) {
                    return Err(EngineError::MalformedOutcomeInput(
                        "wheel needs at least one paying segment".to_string(),
                    ));
                }
                if *boost_count > segments.len() {
                    return Err(EngineError::MalformedOutcomeInput(format!(
                        "boost count {} exceeds {} segments",
                        boost_count,
                        segments.len()
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Draw every participant's cases from the committed seed, nonces assigned
/// in seat order, and determine the winner by strictly-greater aggregate
/// drawn value. All teams sharing the maximum land in `tied_teams`.
fn resolve_battle(
    round: &mut Round,
    table: &case_battle::TicketTable,
    cases_per_participant: u32,
) -> EngineResult<RoundOutcome> {
    let hybrid = round.seed.hybrid_seed.clone();
    let mut draws: Vec<Vec<case_battle::TicketDraw>> = Vec::with_capacity(round.participants.len());
    let mut nonce = 0u64;

    for participant in round.participants.iter_mut() {
        let mut own = Vec::with_capacity(cases_per_participant as usize);
        let mut total = Amount::ZERO;
        for _ in 0..cases_per_participant {
            let draw = table.draw(&hybrid, nonce)?;
            nonce += 1;
            total = total
                .checked_add(draw.value)
                .ok_or_else(|| EngineError::MalformedOutcomeInput("draw value overflow".to_string()))?;
            own.push(draw);
        }
        participant.resolved_value = Some(total);
        draws.push(own);
    }
    round.seed.nonce = nonce;

    let mut team_totals: Vec<(u8, Amount)> = Vec::new();
    for participant in &round.participants {
        let value = participant.resolved_value.unwrap_or(Amount::ZERO);
        match team_totals.iter_mut().find(|(t, _)| *t == participant.team) {
            Some((_, sum)) => {
                *sum = sum.checked_add(value).ok_or_else(|| {
                    EngineError::MalformedOutcomeInput("team total overflow".to_string())
                })?;
            }
            None => team_totals.push((participant.team, value)),
        }
    }

    let best = team_totals
        .iter()
        .map(|(_, v)| *v)
        .max()
        .ok_or_else(|| EngineError::MalformedOutcomeInput("battle has no participants".to_string()))?;
    let tied_teams: Vec<u8> = team_totals
        .iter()
        .filter(|(_, v)| *v == best)
        .map(|(t, _)| *t)
        .collect();

    Ok(RoundOutcome::CaseBattle {
        draws,
        winning_team: tied_teams[0],
        tied_teams,
    })
}
