//! Balance, pool and audit-trail accounting.
//!
//! All monetary mutation flows through [`PayoutLedger`]. Balances live in a
//! sharded concurrent map and are mutated under the per-key entry guard, so
//! a check-then-deduct is atomic per user. Shared pools are serialized
//! behind a per-pool async mutex: two concurrent buyers can never act on the
//! same stale pool value. Every flow appends an immutable [`LedgerEntry`];
//! for any settled round or pool epoch the signed entries sum to zero, with
//! house and jackpot shares explicitly modeled.

use crate::errors::{EngineError, EngineResult};
use crate::games::rugged::{self, CrashSplit};
use crate::money::Amount;
use crate::round::{Round, RoundOutcome};
use crate::seed::{RevealedSeed, SeedCommitment};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Classification of a ledger flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Stake committed to a round or pool. Always negative.
    Stake,
    /// Winnings credited from a settled round. Always positive.
    Payout,
    /// House-retained difference on a solo game, signed.
    HouseEdge,
    /// Winner share that belonged to a synthetic participant; retained.
    BotShareRetained,
    /// Position liquidated from a live pool. Always positive.
    Liquidation,
    /// Jackpot share of a crashed pool.
    JackpotShare,
    /// House share of a crashed pool.
    HouseShare,
    /// External funding credit (deposits, promotions).
    Funding,
}

/// Append-only audit record. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_type: LedgerEntryType,
    /// Signed minor units. Debits negative, credits positive.
    pub amount: Amount,
    /// Absent for house/jackpot entries.
    pub user_id: Option<Uuid>,
    /// Round id or pool epoch reference this entry belongs to.
    pub round_ref: String,
    pub timestamp: DateTime<Utc>,
}

/// One open claim on a live pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolPosition {
    pub user_id: Uuid,
    pub stake: Amount,
    /// Pool total right after this buy; growth is measured against it.
    pub entry_snapshot: Amount,
    pub is_bot: bool,
}

/// A shared continuous-game pool (the Rugged market). Mutated only under
/// its per-pool mutex inside [`PayoutLedger`].
#[derive(Debug)]
pub struct Pool {
    pub id: String,
    pub epoch: u64,
    pub total: Amount,
    pub floor: Amount,
    pub jackpot_permille: u32,
    pub seed: SeedCommitment,
    pub positions: Vec<PoolPosition>,
    /// Set after a crash until a fresh commitment is issued.
    pub awaiting_seed: bool,
}

impl Pool {
    pub fn epoch_ref(&self) -> String {
        format!("pool:{}:epoch:{}", self.id, self.epoch)
    }
}

/// Outcome of a buy against a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolBuyReceipt {
    pub epoch: u64,
    pub nonce: u64,
    pub roll: u64,
    pub crashed: bool,
    /// Pool total after the buy (zero if the buy crashed the epoch).
    pub pool_total: Amount,
    pub entry_snapshot: Amount,
    pub split: Option<CrashSplit>,
    /// Seed reveal published when the epoch crashes.
    pub revealed: Option<RevealedSeed>,
}

/// Result of liquidating a position before a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSellReceipt {
    pub value: Amount,
    pub pool_total: Amount,
}

/// What a settled round distributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    pub round_id: Uuid,
    pub winning_team: u8,
    pub tied_teams: Vec<u8>,
    /// Real-money credits applied, per user.
    pub credits: Vec<(Uuid, Amount)>,
    /// Winner shares retained because the seat was synthetic.
    pub retained: Amount,
}

/// Credits and audit entries computed for a settled round but not yet
/// applied. The round's state flips during planning; balances move only
/// when the plan is committed, after the settled round is durably stored.
#[derive(Debug)]
pub struct SettlementPlan {
    report: SettlementReport,
    round_ref: String,
    /// (user, share, synthetic seat) in seat order.
    shares: Vec<(Uuid, Amount, bool)>,
    /// Signed house take on solo games.
    house: Option<Amount>,
}

impl SettlementPlan {
    pub fn report(&self) -> &SettlementReport {
        &self.report
    }
}

/// The single writer for balances, pools and the audit trail.
pub struct PayoutLedger {
    balances: DashMap<Uuid, Amount>,
    entries: Mutex<Vec<LedgerEntry>>,
    pools: DashMap<String, Arc<tokio::sync::Mutex<Pool>>>,
}

impl Default for PayoutLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PayoutLedger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            entries: Mutex::new(Vec::new()),
            pools: DashMap::new(),
        }
    }

    // ---- balances ----------------------------------------------------

    pub fn balance(&self, user_id: Uuid) -> Amount {
        self.balances
            .get(&user_id)
            .map(|b| *b)
            .unwrap_or(Amount::ZERO)
    }

    /// Credit external funding (deposits, test fixtures).
    pub fn fund(&self, user_id: Uuid, amount: Amount) {
        self.credit(user_id, amount);
        self.record(LedgerEntryType::Funding, amount, Some(user_id), "funding");
    }

    /// Deduct a stake, rejecting before any mutation if the balance would go
    /// negative. The check and deduct happen under the per-user entry guard.
    pub fn apply_stake(
        &self,
        user_id: Uuid,
        amount: Amount,
        round_ref: &str,
    ) -> EngineResult<()> {
        if !amount.is_positive() {
            return Err(EngineError::MalformedOutcomeInput(format!(
                "stake must be positive, got {}",
                amount
            )));
        }

        let mut balance = self.balances.entry(user_id).or_insert(Amount::ZERO);
        if *balance < amount {
            return Err(EngineError::InsufficientBalance {
                available: *balance,
                required: amount,
            });
        }
        *balance = balance
            .checked_sub(amount)
            .expect("checked above balance >= amount");
        drop(balance);

        self.record(LedgerEntryType::Stake, -amount, Some(user_id), round_ref);
        Ok(())
    }

    /// Record a synthetic participant's stake. No balance exists for bots;
    /// the entry keeps the per-round conservation sum intact.
    pub fn record_bot_stake(&self, bot_id: Uuid, amount: Amount, round_ref: &str) {
        self.record(LedgerEntryType::Stake, -amount, Some(bot_id), round_ref);
    }

    /// Credit winnings. Payouts are never rejected.
    pub fn apply_payout(&self, user_id: Uuid, amount: Amount, round_ref: &str) {
        self.credit(user_id, amount);
        self.record(LedgerEntryType::Payout, amount, Some(user_id), round_ref);
    }

    fn credit(&self, user_id: Uuid, amount: Amount) {
        let mut balance = self.balances.entry(user_id).or_insert(Amount::ZERO);
        *balance = balance.checked_add(amount).unwrap_or_else(|| {
            tracing::error!(user = %user_id, amount = %amount, "balance overflow, saturating");
            Amount::MAX
        });
    }

    fn record(
        &self,
        entry_type: LedgerEntryType,
        amount: Amount,
        user_id: Option<Uuid>,
        round_ref: &str,
    ) {
        let entry = LedgerEntry {
            entry_type,
            amount,
            user_id,
            round_ref: round_ref.to_string(),
            timestamp: Utc::now(),
        };
        self.entries
            .lock()
            .expect("ledger entry lock poisoned")
            .push(entry);
    }

    pub fn entries_for(&self, round_ref: &str) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .expect("ledger entry lock poisoned")
            .iter()
            .filter(|e| e.round_ref == round_ref)
            .cloned()
            .collect()
    }

    /// Signed sum of all entries for a round. Zero once settled.
    pub fn entry_sum(&self, round_ref: &str) -> Amount {
        self.entries_for(round_ref).iter().map(|e| e.amount).sum()
    }

    // ---- round settlement --------------------------------------------

    /// Plan a battle pot distribution. The winning team has the strictly
    /// greatest aggregate drawn value; exact ties either split across all
    /// tied teams or resolve to an externally supplied tiebreak, never
    /// silently. The pot divides into exact shares that sum back to the
    /// last minor unit; shares on synthetic seats are retained, not
    /// credited. Flips the round to `Settled` (so a concurrent second
    /// settle fails with `AlreadySettled`) but moves no balances; the
    /// caller commits the plan once the settled round is stored.
    pub fn plan_battle(
        &self,
        round: &mut Round,
        outcome: RoundOutcome,
        tiebreak: Option<u8>,
    ) -> EngineResult<SettlementPlan> {
        let (winning_team, tied_teams) = match &outcome {
            RoundOutcome::CaseBattle {
                winning_team,
                tied_teams,
                ..
            } => (*winning_team, tied_teams.clone()),
            _ => {
                return Err(EngineError::MalformedOutcomeInput(
                    "battle settlement requires a case battle outcome".to_string(),
                ))
            }
        };

        // Flip the state machine first: a concurrent second plan fails
        // here with AlreadySettled before anything else happens.
        round.settle(outcome)?;

        let winners: Vec<usize> = if tied_teams.len() > 1 {
            match tiebreak {
                Some(team) if tied_teams.contains(&team) => round
                    .participants
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.team == team)
                    .map(|(i, _)| i)
                    .collect(),
                Some(team) => {
                    return Err(EngineError::MalformedOutcomeInput(format!(
                        "tiebreak team {} is not among the tied teams",
                        team
                    )))
                }
                // No tiebreak supplied: split across every tied team.
                None => round
                    .participants
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| tied_teams.contains(&p.team))
                    .map(|(i, _)| i)
                    .collect(),
            }
        } else {
            round
                .participants
                .iter()
                .enumerate()
                .filter(|(_, p)| p.team == winning_team)
                .map(|(i, _)| i)
                .collect()
        };

        if winners.is_empty() {
            return Err(EngineError::MalformedOutcomeInput(
                "no participants on the winning team".to_string(),
            ));
        }

        let round_ref = round.id.to_string();
        let split = round.pot.split_even(winners.len());
        let mut shares = Vec::new();
        let mut credits = Vec::new();
        let mut retained = Amount::ZERO;

        for (&idx, share) in winners.iter().zip(split) {
            let participant = &round.participants[idx];
            shares.push((participant.user_id, share, participant.is_bot));
            if participant.is_bot {
                retained = retained.checked_add(share).ok_or_else(|| {
                    EngineError::MalformedOutcomeInput("retained share overflow".to_string())
                })?;
            } else {
                credits.push((participant.user_id, share));
            }
        }

        Ok(SettlementPlan {
            report: SettlementReport {
                round_id: round.id,
                winning_team,
                tied_teams,
                credits,
                retained,
            },
            round_ref,
            shares,
            house: None,
        })
    }

    /// Plan settlement of a single-participant round (plinko, wheel): the
    /// payout plus the signed difference booked as house edge so the round
    /// sums to zero. Moves no balances until committed.
    pub fn plan_solo(
        &self,
        round: &mut Round,
        outcome: RoundOutcome,
        payout: Amount,
    ) -> EngineResult<SettlementPlan> {
        let participant = round
            .participants
            .first()
            .ok_or_else(|| {
                EngineError::MalformedOutcomeInput("solo round has no participant".to_string())
            })?
            .clone();

        round.settle(outcome)?;

        let round_ref = round.id.to_string();
        let mut shares = Vec::new();
        let mut credits = Vec::new();
        if payout.is_positive() {
            shares.push((participant.user_id, payout, participant.is_bot));
            if !participant.is_bot {
                credits.push((participant.user_id, payout));
            }
        }

        // House takes stake - payout (negative when the player wins big).
        let house = participant
            .stake
            .checked_sub(payout)
            .ok_or_else(|| EngineError::MalformedOutcomeInput("house take overflow".to_string()))?;

        Ok(SettlementPlan {
            report: SettlementReport {
                round_id: round.id,
                winning_team: 0,
                tied_teams: vec![],
                credits,
                retained: Amount::ZERO,
            },
            round_ref,
            shares,
            house: Some(house),
        })
    }

    /// Apply a settlement plan: credit winner shares, book bot-retained
    /// shares and the house take. Called exactly once per settled round,
    /// after the round is stored.
    pub fn commit_settlement(&self, plan: SettlementPlan) -> SettlementReport {
        for (user_id, share, is_bot) in &plan.shares {
            if *is_bot {
                self.record(
                    LedgerEntryType::BotShareRetained,
                    *share,
                    Some(*user_id),
                    &plan.round_ref,
                );
            } else {
                self.apply_payout(*user_id, *share, &plan.round_ref);
            }
        }
        if let Some(house) = plan.house {
            self.record(LedgerEntryType::HouseEdge, house, None, &plan.round_ref);
        }

        tracing::info!(
            round = %plan.report.round_id,
            team = plan.report.winning_team,
            credits = plan.report.credits.len(),
            retained = %plan.report.retained,
            "settlement committed"
        );
        plan.report
    }

    // ---- pools -------------------------------------------------------

    /// Register a new pool with its first epoch commitment.
    pub fn create_pool(
        &self,
        id: &str,
        floor: Amount,
        jackpot_permille: u32,
        seed: SeedCommitment,
    ) -> EngineResult<()> {
        if jackpot_permille > 1_000 {
            return Err(EngineError::MalformedOutcomeInput(format!(
                "jackpot permille {} exceeds 1000",
                jackpot_permille
            )));
        }
        let pool = Pool {
            id: id.to_string(),
            epoch: 0,
            total: Amount::ZERO,
            floor,
            jackpot_permille,
            seed,
            positions: Vec::new(),
            awaiting_seed: false,
        };
        self.pools
            .insert(id.to_string(), Arc::new(tokio::sync::Mutex::new(pool)));
        Ok(())
    }

    fn pool_handle(&self, id: &str) -> EngineResult<Arc<tokio::sync::Mutex<Pool>>> {
        self.pools
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| EngineError::UnknownPool(id.to_string()))
    }

    /// Buy into a pool. The balance deduction, pool mutation and crash roll
    /// all happen under the pool mutex, so concurrent buys are linearized.
    pub async fn pool_buy(
        &self,
        pool_id: &str,
        user_id: Uuid,
        amount: Amount,
        is_bot: bool,
    ) -> EngineResult<PoolBuyReceipt> {
        let handle = self.pool_handle(pool_id)?;
        let mut pool = handle.lock().await;

        if pool.awaiting_seed {
            return Err(EngineError::PoolAwaitingSeed(pool_id.to_string()));
        }

        let epoch_ref = pool.epoch_ref();
        if is_bot {
            self.record_bot_stake(user_id, amount, &epoch_ref);
        } else {
            self.apply_stake(user_id, amount, &epoch_ref)?;
        }

        pool.total = pool
            .total
            .checked_add(amount)
            .ok_or_else(|| EngineError::MalformedOutcomeInput("pool overflow".to_string()))?;
        let entry_snapshot = pool.total;
        pool.positions.push(PoolPosition {
            user_id,
            stake: amount,
            entry_snapshot,
            is_bot,
        });

        let nonce = pool.seed.next_nonce();
        let check = rugged::check_crash(&pool.seed.server_seed, nonce, pool.total, pool.floor);

        if !check.crashed {
            return Ok(PoolBuyReceipt {
                epoch: pool.epoch,
                nonce,
                roll: check.roll,
                crashed: false,
                pool_total: pool.total,
                entry_snapshot,
                split: None,
                revealed: None,
            });
        }

        // Crash: split the pot, forfeit every open position, reveal the
        // epoch seed. A fresh commitment must be issued before further buys.
        let split = rugged::split_pool(pool.total, pool.jackpot_permille)?;
        self.record(LedgerEntryType::JackpotShare, split.jackpot, None, &epoch_ref);
        self.record(LedgerEntryType::HouseShare, split.house, None, &epoch_ref);

        let revealed = pool.seed.reveal();
        let epoch = pool.epoch;
        let forfeited = pool.positions.len();
        pool.positions.clear();
        pool.total = Amount::ZERO;
        pool.awaiting_seed = true;

        tracing::info!(
            pool = pool_id,
            epoch,
            roll = check.roll,
            trigger = ?check.trigger,
            forfeited,
            jackpot = %split.jackpot,
            house = %split.house,
            "pool crashed"
        );

        Ok(PoolBuyReceipt {
            epoch,
            nonce,
            roll: check.roll,
            crashed: true,
            pool_total: Amount::ZERO,
            entry_snapshot,
            split: Some(split),
            revealed: Some(revealed),
        })
    }

    /// Liquidate an open position at its current pool-growth value, capped
    /// by what the pool actually holds.
    pub async fn pool_sell(&self, pool_id: &str, user_id: Uuid) -> EngineResult<PoolSellReceipt> {
        let handle = self.pool_handle(pool_id)?;
        let mut pool = handle.lock().await;

        if pool.awaiting_seed {
            return Err(EngineError::PoolAwaitingSeed(pool_id.to_string()));
        }

        let idx = pool
            .positions
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or(EngineError::UnknownUser(user_id))?;
        let position = pool.positions.remove(idx);

        let value = rugged::position_value(position.stake, position.entry_snapshot, pool.total)?
            .min(pool.total);
        pool.total = pool
            .total
            .checked_sub(value)
            .expect("value capped at pool total");

        let epoch_ref = pool.epoch_ref();
        if position.is_bot {
            self.record(
                LedgerEntryType::BotShareRetained,
                value,
                Some(user_id),
                &epoch_ref,
            );
        } else {
            self.credit(user_id, value);
            self.record(LedgerEntryType::Liquidation, value, Some(user_id), &epoch_ref);
        }

        Ok(PoolSellReceipt {
            value,
            pool_total: pool.total,
        })
    }

    /// Issue the next epoch's commitment after a crash.
    pub async fn reset_pool_epoch(
        &self,
        pool_id: &str,
        seed: SeedCommitment,
    ) -> EngineResult<u64> {
        let handle = self.pool_handle(pool_id)?;
        let mut pool = handle.lock().await;
        if !pool.awaiting_seed {
            return Err(EngineError::InvalidTransition {
                round_id: Uuid::nil(),
                detail: format!("pool {} is not awaiting a seed", pool_id),
            });
        }
        pool.epoch += 1;
        pool.seed = seed;
        pool.awaiting_seed = false;
        Ok(pool.epoch)
    }

    /// Read-only snapshot of the pool total, for display. Authoritative
    /// values are always re-read under the pool mutex.
    pub async fn pool_total(&self, pool_id: &str) -> EngineResult<Amount> {
        let handle = self.pool_handle(pool_id)?;
        let pool = handle.lock().await;
        Ok(pool.total)
    }

    pub async fn pool_public_commitment(
        &self,
        pool_id: &str,
    ) -> EngineResult<crate::seed::PublicCommitment> {
        let handle = self.pool_handle(pool_id)?;
        let pool = handle.lock().await;
        Ok(pool.seed.public())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::case_battle::{TicketTable, WeightedItem};
    use crate::round::{Participant, RoundParams};
    use crate::seed::{crash_roll, EntropyProvenance};

    fn ledger_with_user(balance: i64) -> (PayoutLedger, Uuid) {
        let ledger = PayoutLedger::new();
        let user = Uuid::new_v4();
        ledger.fund(user, Amount::from_minor(balance));
        (ledger, user)
    }

    fn commitment_from(server_seed: &str) -> SeedCommitment {
        SeedCommitment::new(
            server_seed.to_string(),
            None,
            None,
            EntropyProvenance::LocalFallback,
        )
    }

    /// A server seed whose first `draws` crash rolls are all > 1.
    fn calm_seed(draws: u64) -> String {
        (0..10_000u64)
            .map(|i| format!("calm-{}", i))
            .find(|s| (0..draws).all(|n| crash_roll(s, n) != 1))
            .expect("a calm seed exists in the search window")
    }

    #[test]
    fn test_stake_rejected_before_mutation() {
        let (ledger, user) = ledger_with_user(100);
        let err = ledger
            .apply_stake(user, Amount::from_minor(150), "round-1")
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        // Nothing changed, nothing recorded.
        assert_eq!(ledger.balance(user), Amount::from_minor(100));
        assert!(ledger.entries_for("round-1").is_empty());
    }

    #[test]
    fn test_stake_then_payout_flows() {
        let (ledger, user) = ledger_with_user(1_000);
        ledger.apply_stake(user, Amount::from_minor(400), "r").unwrap();
        assert_eq!(ledger.balance(user), Amount::from_minor(600));

        ledger.apply_payout(user, Amount::from_minor(800), "r");
        assert_eq!(ledger.balance(user), Amount::from_minor(1_400));

        // Stake entry negative, payout positive.
        let entries = ledger.entries_for("r");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, Amount::from_minor(-400));
        assert_eq!(entries[1].amount, Amount::from_minor(800));
    }

    #[test]
    fn test_battle_plan_defers_credits_until_commit() {
        let ledger = PayoutLedger::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        ledger.fund(alice, Amount::from_minor(1_000));
        ledger.fund(bob, Amount::from_minor(1_000));

        let params = RoundParams::CaseBattle {
            table: TicketTable::new(vec![WeightedItem {
                name: "only".to_string(),
                weight: 100.0,
                value: Amount::from_minor(100),
            }])
            .unwrap(),
            cases_per_participant: 1,
        };
        let mut round = Round::new(
            params,
            2,
            commitment_from(&"aa".repeat(32)),
            Participant::human(alice, Amount::from_minor(500), 0),
        );
        round
            .join(Participant::human(bob, Amount::from_minor(500), 1))
            .unwrap();
        let round_ref = round.id.to_string();
        ledger.apply_stake(alice, Amount::from_minor(500), &round_ref).unwrap();
        ledger.apply_stake(bob, Amount::from_minor(500), &round_ref).unwrap();

        let outcome = RoundOutcome::CaseBattle {
            draws: vec![],
            winning_team: 0,
            tied_teams: vec![0],
        };
        let plan = ledger.plan_battle(&mut round, outcome, None).unwrap();

        // Planning settles the round but touches no balance: only the two
        // stakes are in the trail.
        assert_eq!(ledger.balance(alice), Amount::from_minor(500));
        assert_eq!(ledger.entry_sum(&round_ref), Amount::from_minor(-1_000));
        assert_eq!(plan.report().credits, vec![(alice, Amount::from_minor(1_000))]);

        let report = ledger.commit_settlement(plan);
        assert_eq!(ledger.balance(alice), Amount::from_minor(1_500));
        assert_eq!(ledger.entry_sum(&round_ref), Amount::ZERO);
        assert_eq!(report.winning_team, 0);
    }

    #[test]
    fn test_payout_overflow_saturates_instead_of_dropping() {
        let ledger = PayoutLedger::new();
        let user = Uuid::new_v4();
        ledger.fund(user, Amount::from_minor(i64::MAX - 10));
        ledger.apply_payout(user, Amount::from_minor(100), "r");
        assert_eq!(ledger.balance(user), Amount::MAX);
    }

    #[test]
    fn test_zero_or_negative_stake_rejected() {
        let (ledger, user) = ledger_with_user(1_000);
        assert!(ledger.apply_stake(user, Amount::ZERO, "r").is_err());
        assert!(ledger
            .apply_stake(user, Amount::from_minor(-5), "r")
            .is_err());
    }

    #[tokio::test]
    async fn test_pool_buy_linearized_total() {
        let ledger = Arc::new(PayoutLedger::new());
        let seed = calm_seed(60);
        ledger
            .create_pool("rug", Amount::ZERO, 500, commitment_from(&seed))
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = ledger.clone();
            let user = Uuid::new_v4();
            ledger.fund(user, Amount::from_minor(1_000));
            handles.push(tokio::spawn(async move {
                ledger
                    .pool_buy("rug", user, Amount::from_minor(1_000), false)
                    .await
            }));
        }

        for handle in handles {
            let receipt = handle.await.unwrap().unwrap();
            assert!(!receipt.crashed);
        }

        assert_eq!(
            ledger.pool_total("rug").await.unwrap(),
            Amount::from_minor(50_000)
        );
    }

    #[tokio::test]
    async fn test_pool_crash_splits_and_requires_new_seed() {
        let ledger = PayoutLedger::new();
        // A seed that crashes on its very first roll.
        let crashing = (0..100_000u64)
            .map(|i| format!("rugpull-{}", i))
            .find(|s| crash_roll(s, 0) == 1)
            .expect("a crashing seed exists");
        ledger
            .create_pool("rug", Amount::ZERO, 500, commitment_from(&crashing))
            .unwrap();

        let user = Uuid::new_v4();
        ledger.fund(user, Amount::from_minor(10_000));
        let receipt = ledger
            .pool_buy("rug", user, Amount::from_minor(10_000), false)
            .await
            .unwrap();

        assert!(receipt.crashed);
        let split = receipt.split.unwrap();
        assert_eq!(split.jackpot, Amount::from_minor(5_000));
        assert_eq!(split.house, Amount::from_minor(5_000));
        assert!(receipt.revealed.is_some());

        // Epoch entries conserve: -10000 stake +5000 jackpot +5000 house.
        assert_eq!(ledger.entry_sum("pool:rug:epoch:0"), Amount::ZERO);

        // Buys rejected until a fresh commitment arrives.
        ledger.fund(user, Amount::from_minor(1_000));
        let err = ledger
            .pool_buy("rug", user, Amount::from_minor(1_000), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PoolAwaitingSeed(_)));

        let epoch = ledger
            .reset_pool_epoch("rug", commitment_from(&calm_seed(10)))
            .await
            .unwrap();
        assert_eq!(epoch, 1);
        assert!(ledger
            .pool_buy("rug", user, Amount::from_minor(1_000), false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_pool_sell_tracks_growth_and_conserves() {
        let ledger = PayoutLedger::new();
        let seed = calm_seed(20);
        ledger
            .create_pool("rug", Amount::ZERO, 500, commitment_from(&seed))
            .unwrap();

        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        ledger.fund(alice, Amount::from_minor(10_000));
        ledger.fund(bob, Amount::from_minor(30_000));

        ledger
            .pool_buy("rug", alice, Amount::from_minor(10_000), false)
            .await
            .unwrap();
        ledger
            .pool_buy("rug", bob, Amount::from_minor(30_000), false)
            .await
            .unwrap();

        // Alice entered at 10_000; the pool is now 40_000, so her position
        // is worth 4x her stake.
        let receipt = ledger.pool_sell("rug", alice).await.unwrap();
        assert_eq!(receipt.value, Amount::from_minor(40_000));
        assert_eq!(receipt.pool_total, Amount::ZERO);
        assert_eq!(ledger.balance(alice), Amount::from_minor(40_000));
    }

    #[tokio::test]
    async fn test_unknown_pool_rejected() {
        let ledger = PayoutLedger::new();
        let err = ledger
            .pool_buy("missing", Uuid::new_v4(), Amount::from_minor(1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownPool(_)));
    }
}
