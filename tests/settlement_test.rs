//! End-to-end settlement properties driven through the public API:
//! conservation, idempotency, concurrency safety and archive persistence.

use async_trait::async_trait;
use futures::future::join_all;
use rollhouse::config::EngineConfig;
use rollhouse::entropy::StaticEntropy;
use rollhouse::games::case_battle::{TicketTable, WeightedItem};
use rollhouse::round::{Round, RoundParams};
use rollhouse::seed::{crash_roll, EntropyProvenance, SeedCommitment};
use rollhouse::{
    Amount, EngineError, EngineResult, MemoryRoundStore, PayoutLedger, RocksRoundStore,
    RoundStatus, RoundStore, SettlementOrchestrator,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type MemoryEngine = SettlementOrchestrator<StaticEntropy, MemoryRoundStore>;

fn memory_engine() -> (Arc<MemoryEngine>, Arc<PayoutLedger>) {
    let ledger = Arc::new(PayoutLedger::new());
    let engine = SettlementOrchestrator::new(
        StaticEntropy {
            external: Some("11".repeat(32)),
            block: Some("22".repeat(32)),
        },
        ledger.clone(),
        Arc::new(MemoryRoundStore::new()),
        EngineConfig::offline(),
    );
    (Arc::new(engine), ledger)
}

fn tiered_table() -> TicketTable {
    TicketTable::new(vec![
        WeightedItem {
            name: "common".to_string(),
            weight: 80.0,
            value: Amount::from_minor(100),
        },
        WeightedItem {
            name: "rare".to_string(),
            weight: 19.0,
            value: Amount::from_minor(1_500),
        },
        WeightedItem {
            name: "legendary".to_string(),
            weight: 1.0,
            value: Amount::from_minor(50_000),
        },
    ])
    .unwrap()
}

/// Every draw lands on the same item, so equal-stake teams always tie.
fn flat_table() -> TicketTable {
    TicketTable::new(vec![WeightedItem {
        name: "only".to_string(),
        weight: 100.0,
        value: Amount::from_minor(777),
    }])
    .unwrap()
}

#[tokio::test]
async fn test_many_battles_conserve_every_round() {
    let (engine, ledger) = memory_engine();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(1_000_000));
    ledger.fund(bob, Amount::from_minor(1_000_000));

    for _ in 0..20 {
        let round = engine
            .create_round(
                alice,
                Amount::from_minor(1_000),
                0,
                2,
                RoundParams::CaseBattle {
                    table: tiered_table(),
                    cases_per_participant: 5,
                },
            )
            .await
            .unwrap();
        engine
            .join_round(round.id, bob, Amount::from_minor(1_000), 1)
            .await
            .unwrap();
        engine.settle_round(round.id, None).await.unwrap();

        assert_eq!(ledger.entry_sum(&round.id.to_string()), Amount::ZERO);
    }

    // Money only moved between the two players.
    let total = ledger
        .balance(alice)
        .checked_add(ledger.balance(bob))
        .unwrap();
    assert_eq!(total, Amount::from_minor(2_000_000));
}

#[tokio::test]
async fn test_tie_splits_odd_pot_to_the_last_minor_unit() {
    let (engine, ledger) = memory_engine();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(10_000));
    ledger.fund(bob, Amount::from_minor(10_000));

    // Flat table forces a tie; odd pot exercises the remainder share.
    let round = engine
        .create_round(
            alice,
            Amount::from_minor(1_001),
            0,
            2,
            RoundParams::CaseBattle {
                table: flat_table(),
                cases_per_participant: 2,
            },
        )
        .await
        .unwrap();
    engine
        .join_round(round.id, bob, Amount::from_minor(1_000), 1)
        .await
        .unwrap();

    let report = engine.settle_round(round.id, None).await.unwrap();
    assert_eq!(report.tied_teams.len(), 2);

    let credited: Amount = report.credits.iter().map(|(_, a)| *a).sum();
    assert_eq!(credited, Amount::from_minor(2_001));
    let shares: Vec<i64> = report.credits.iter().map(|(_, a)| a.minor()).collect();
    assert_eq!(shares.len(), 2);
    assert!((shares[0] - shares[1]).abs() <= 1);
}

#[tokio::test]
async fn test_tiebreak_signal_selects_single_winner() {
    let (engine, ledger) = memory_engine();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(10_000));
    ledger.fund(bob, Amount::from_minor(10_000));

    let round = engine
        .create_round(
            alice,
            Amount::from_minor(1_000),
            0,
            2,
            RoundParams::CaseBattle {
                table: flat_table(),
                cases_per_participant: 1,
            },
        )
        .await
        .unwrap();
    engine
        .join_round(round.id, bob, Amount::from_minor(1_000), 1)
        .await
        .unwrap();

    let report = engine.settle_round(round.id, Some(1)).await.unwrap();
    assert_eq!(report.credits.len(), 1);
    assert_eq!(report.credits[0], (bob, Amount::from_minor(2_000)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stakes_never_go_negative() {
    let ledger = Arc::new(PayoutLedger::new());
    let user = Uuid::new_v4();
    ledger.fund(user, Amount::from_minor(1_000));

    // 100 concurrent attempts to stake 100 against a balance of 1000:
    // exactly ten can succeed.
    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger.apply_stake(user, Amount::from_minor(100), &format!("r-{}", i))
            })
        })
        .collect();

    let results = join_all(tasks).await;
    let successes = results
        .into_iter()
        .filter(|r| r.as_ref().unwrap().is_ok())
        .count();

    assert_eq!(successes, 10);
    assert_eq!(ledger.balance(user), Amount::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settles_pay_exactly_once() {
    let (engine, ledger) = memory_engine();
    let alice = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(10_000));

    let round = engine
        .create_round(
            alice,
            Amount::from_minor(1_000),
            0,
            2,
            RoundParams::CaseBattle {
                table: tiered_table(),
                cases_per_participant: 3,
            },
        )
        .await
        .unwrap();
    engine
        .fill_synthetic(round.id, Amount::from_minor(1_000))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let id = round.id;
            tokio::spawn(async move { engine.settle_round(id, None).await })
        })
        .collect();

    let mut settled = 0;
    let mut already = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => settled += 1,
            Err(EngineError::AlreadySettled(_)) => already += 1,
            Err(e) => panic!("unexpected settle error: {}", e),
        }
    }
    assert_eq!(settled, 1);
    assert_eq!(already, 7);
    assert_eq!(ledger.entry_sum(&round.id.to_string()), Amount::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifty_parallel_pool_buys_lose_no_update() {
    let ledger = Arc::new(PayoutLedger::new());
    // A seed whose first 60 crash rolls all stay above 1, so no buy in
    // this test can end the epoch.
    let calm = (0..10_000u64)
        .map(|i| format!("steady-{}", i))
        .find(|s| (0..60).all(|n| crash_roll(s, n) != 1))
        .unwrap();
    ledger
        .create_pool(
            "shared",
            Amount::ZERO,
            500,
            SeedCommitment::new(calm, None, None, EntropyProvenance::LocalFallback),
        )
        .unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let ledger = ledger.clone();
            let user = Uuid::new_v4();
            ledger.fund(user, Amount::from_minor(1_000));
            tokio::spawn(async move {
                ledger.pool_buy("shared", user, Amount::from_minor(1_000), false).await
            })
        })
        .collect();

    for result in join_all(tasks).await {
        assert!(!result.unwrap().unwrap().crashed);
    }
    assert_eq!(
        ledger.pool_total("shared").await.unwrap(),
        Amount::from_minor(50_000)
    );
}

#[tokio::test]
async fn test_settled_rounds_survive_archive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(PayoutLedger::new());
    let alice = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(10_000));

    let round_id = {
        let engine = SettlementOrchestrator::new(
            StaticEntropy {
                external: Some("33".repeat(32)),
                block: None,
            },
            ledger.clone(),
            Arc::new(RocksRoundStore::open(dir.path()).unwrap()),
            EngineConfig::offline(),
        );

        let round = engine
            .create_round(
                alice,
                Amount::from_minor(2_000),
                0,
                2,
                RoundParams::CaseBattle {
                    table: tiered_table(),
                    cases_per_participant: 2,
                },
            )
            .await
            .unwrap();
        engine
            .fill_synthetic(round.id, Amount::from_minor(2_000))
            .await
            .unwrap();
        engine.settle_round(round.id, None).await.unwrap();
        round.id
    };

    // Reopen the database as a fresh process would.
    let store = RocksRoundStore::open(dir.path()).unwrap();
    let restored = rollhouse::RoundStore::get(&store, round_id)
        .await
        .unwrap()
        .expect("settled round persisted");
    assert_eq!(restored.status, RoundStatus::Settled);
    assert!(restored.outcome.is_some());
    assert_eq!(restored.pot, Amount::from_minor(4_000));
    // The reveal survives with the round, so verification works later.
    assert!(rollhouse::verify_reveal(&restored.seed.reveal()));
}

/// Store whose next `put` fails with a storage outage, for exercising the
/// write-failure paths.
#[derive(Default)]
struct OutageStore {
    inner: MemoryRoundStore,
    fail_next_put: AtomicBool,
}

impl OutageStore {
    fn arm(&self) {
        self.fail_next_put.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RoundStore for OutageStore {
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn insert(&self, round: &Round) -> EngineResult<()> {
        self.inner.insert(round).await
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<Round>> {
        self.inner.get(id).await
    }

    async fn put(&self, round: &mut Round, expected_version: u64) -> EngineResult<()> {
        if self.fail_next_put.swap(false, Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable("injected outage".to_string()));
        }
        self.inner.put(round, expected_version).await
    }

    async fn list_open(&self) -> EngineResult<Vec<Round>> {
        self.inner.list_open().await
    }

    async fn list_settled(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<Round>, Option<String>)> {
        self.inner.list_settled(cursor, limit).await
    }
}

#[tokio::test]
async fn test_failed_settlement_write_moves_no_money_and_retries_clean() {
    let ledger = Arc::new(PayoutLedger::new());
    let store = Arc::new(OutageStore::default());
    let engine = SettlementOrchestrator::new(
        StaticEntropy {
            external: Some("44".repeat(32)),
            block: Some("55".repeat(32)),
        },
        ledger.clone(),
        store.clone(),
        EngineConfig::offline(),
    );

    let alice = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(10_000));

    let round = engine
        .create_round(
            alice,
            Amount::from_minor(1_000),
            0,
            2,
            RoundParams::CaseBattle {
                table: tiered_table(),
                cases_per_participant: 2,
            },
        )
        .await
        .unwrap();
    engine
        .fill_synthetic(round.id, Amount::from_minor(1_000))
        .await
        .unwrap();
    let balance_before = ledger.balance(alice);

    store.arm();
    let err = engine.settle_round(round.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::StorageUnavailable(_)));

    // The failed write credited nothing: only the two stakes are in the
    // trail, and the stored round is still Locked.
    assert_eq!(ledger.balance(alice), balance_before);
    assert_eq!(
        ledger.entry_sum(&round.id.to_string()),
        Amount::from_minor(-2_000)
    );
    let stored = engine.get_round(round.id).await.unwrap();
    assert_eq!(stored.status, RoundStatus::Locked);

    // Retrying from the same committed seed settles exactly once.
    engine.settle_round(round.id, None).await.unwrap();
    assert_eq!(ledger.entry_sum(&round.id.to_string()), Amount::ZERO);
    assert!(matches!(
        engine.settle_round(round.id, None).await.unwrap_err(),
        EngineError::AlreadySettled(_)
    ));
}

#[tokio::test]
async fn test_failed_synthetic_fill_write_records_no_stakes() {
    let ledger = Arc::new(PayoutLedger::new());
    let store = Arc::new(OutageStore::default());
    let engine = SettlementOrchestrator::new(
        StaticEntropy {
            external: Some("66".repeat(32)),
            block: None,
        },
        ledger.clone(),
        store.clone(),
        EngineConfig::offline(),
    );

    let alice = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(10_000));

    let round = engine
        .create_round(
            alice,
            Amount::from_minor(1_000),
            0,
            2,
            RoundParams::CaseBattle {
                table: tiered_table(),
                cases_per_participant: 1,
            },
        )
        .await
        .unwrap();

    store.arm();
    let err = engine
        .fill_synthetic(round.id, Amount::from_minor(1_000))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StorageUnavailable(_)));

    // No bot seats were persisted, so no bot stake entries exist; the
    // conservation trail holds only the initiator's stake.
    let stored = engine.get_round(round.id).await.unwrap();
    assert_eq!(stored.participants.len(), 1);
    assert_eq!(
        ledger.entry_sum(&round.id.to_string()),
        Amount::from_minor(-1_000)
    );

    // A retry fills and settles the round normally.
    engine
        .fill_synthetic(round.id, Amount::from_minor(1_000))
        .await
        .unwrap();
    engine.settle_round(round.id, None).await.unwrap();
    assert_eq!(ledger.entry_sum(&round.id.to_string()), Amount::ZERO);
}

#[tokio::test]
async fn test_locked_round_rejects_late_joiner() {
    let (engine, ledger) = memory_engine();
    let alice = Uuid::new_v4();
    let late = Uuid::new_v4();
    ledger.fund(alice, Amount::from_minor(10_000));
    ledger.fund(late, Amount::from_minor(10_000));

    let round = engine
        .create_round(
            alice,
            Amount::from_minor(1_000),
            0,
            2,
            RoundParams::CaseBattle {
                table: tiered_table(),
                cases_per_participant: 1,
            },
        )
        .await
        .unwrap();
    engine
        .fill_synthetic(round.id, Amount::from_minor(1_000))
        .await
        .unwrap();

    let err = engine
        .join_round(round.id, late, Amount::from_minor(1_000), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    // The rejected joiner keeps their stake.
    assert_eq!(ledger.balance(late), Amount::from_minor(10_000));
}
