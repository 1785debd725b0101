//! Round persistence.
//!
//! The engine runs against any [`RoundStore`]: an in-memory map for tests
//! and simulation, or a RocksDB archive for durable deployments. Stores
//! report whether they support multi-document transactions; neither of the
//! bundled implementations does, so the orchestrator always selects its
//! per-resource-lock strategy, detected at startup and never assumed.
//!
//! Writes are optimistic: callers pass the version they read, and a
//! mismatch fails with `ConcurrencyConflict` for the caller to retry.

use crate::errors::{EngineError, EngineResult};
use crate::round::{Round, RoundStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Whether the backing store can scope a multi-document transaction.
    fn supports_transactions(&self) -> bool;

    /// Insert a new round. Fails if the id already exists.
    async fn insert(&self, round: &Round) -> EngineResult<()>;

    async fn get(&self, id: Uuid) -> EngineResult<Option<Round>>;

    /// Optimistic write: succeeds only when the stored version equals
    /// `expected_version`, then persists with the version bumped by one.
    /// The caller's copy is updated to the new version on success.
    async fn put(&self, round: &mut Round, expected_version: u64) -> EngineResult<()>;

    /// All rounds not yet settled, for discovery listings.
    async fn list_open(&self) -> EngineResult<Vec<Round>>;

    /// Settled rounds, newest first, with cursor pagination.
    async fn list_settled(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<Round>, Option<String>)>;
}

// ---- in-memory ------------------------------------------------------

/// Sharded-map store for tests, simulation and single-process deployments.
#[derive(Default)]
pub struct MemoryRoundStore {
    rounds: DashMap<Uuid, Round>,
}

impl MemoryRoundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoundStore for MemoryRoundStore {
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn insert(&self, round: &Round) -> EngineResult<()> {
        match self.rounds.entry(round.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::ConcurrencyConflict {
                resource: format!("round:{}", round.id),
                attempts: 1,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(round.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<Round>> {
        Ok(self.rounds.get(&id).map(|r| r.clone()))
    }

    async fn put(&self, round: &mut Round, expected_version: u64) -> EngineResult<()> {
        // The entry guard serializes the compare-and-swap per round.
        let mut slot = self
            .rounds
            .get_mut(&round.id)
            .ok_or(EngineError::UnknownRound(round.id))?;
        if slot.version != expected_version {
            return Err(EngineError::ConcurrencyConflict {
                resource: format!("round:{}", round.id),
                attempts: 1,
            });
        }
        round.version = expected_version + 1;
        *slot = round.clone();
        Ok(())
    }

    async fn list_open(&self) -> EngineResult<Vec<Round>> {
        Ok(self
            .rounds
            .iter()
            .filter(|r| r.status != RoundStatus::Settled)
            .map(|r| r.clone())
            .collect())
    }

    async fn list_settled(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<Round>, Option<String>)> {
        let mut settled: Vec<Round> = self
            .rounds
            .iter()
            .filter(|r| r.status == RoundStatus::Settled)
            .map(|r| r.clone())
            .collect();
        settled.sort_by(|a, b| b.settled_at.cmp(&a.settled_at).then(a.id.cmp(&b.id)));

        let start = match cursor {
            Some(c) => {
                let cursor_id: Uuid = c
                    .parse()
                    .map_err(|_| EngineError::StorageUnavailable("invalid cursor".to_string()))?;
                settled
                    .iter()
                    .position(|r| r.id == cursor_id)
                    .map(|p| p + 1)
                    .unwrap_or(settled.len())
            }
            None => 0,
        };

        let page: Vec<Round> = settled.into_iter().skip(start).take(limit.max(1)).collect();
        let next_cursor = if page.len() == limit.max(1) {
            page.last().map(|r| r.id.to_string())
        } else {
            None
        };
        Ok((page, next_cursor))
    }
}

// ---- rocksdb --------------------------------------------------------

const ROUND_PREFIX: &str = "round:doc:";
const OPEN_INDEX_PREFIX: &[u8] = b"round:index:open:";
const SETTLED_INDEX_PREFIX: &[u8] = b"round:index:settled:";

fn round_key(id: Uuid) -> Vec<u8> {
    format!("{}{}", ROUND_PREFIX, id).into_bytes()
}

fn open_index_key(id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(OPEN_INDEX_PREFIX.len() + 16);
    key.extend_from_slice(OPEN_INDEX_PREFIX);
    key.extend_from_slice(id.as_bytes());
    key
}

fn settled_index_key(settled_at_millis: i64, id: Uuid) -> Vec<u8> {
    // Newest-first scan order via inverted timestamp:
    // prefix | inv_millis(be) | uuid bytes.
    let inv = u64::MAX - settled_at_millis.max(0) as u64;
    let mut key = Vec::with_capacity(SETTLED_INDEX_PREFIX.len() + 24);
    key.extend_from_slice(SETTLED_INDEX_PREFIX);
    key.extend_from_slice(&inv.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

/// Durable archive store over RocksDB. RocksDB has no multi-document
/// transactions in this configuration; the compare-and-swap path is
/// serialized behind a write lock instead.
pub struct RocksRoundStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksRoundStore {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn load(&self, id: Uuid) -> EngineResult<Option<Round>> {
        let bytes = self
            .db
            .get(round_key(id))
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        match bytes {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| EngineError::StorageUnavailable(format!("corrupt round row: {}", e))),
        }
    }

    fn write(&self, round: &Round) -> EngineResult<()> {
        let bytes = bincode::serialize(round)
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        let mut batch = rocksdb::WriteBatch::default();
        batch.put(round_key(round.id), bytes);

        if round.status == RoundStatus::Settled {
            batch.delete(open_index_key(round.id));
            let millis = round
                .settled_at
                .map(|t| t.timestamp_millis())
                .unwrap_or_default();
            batch.put(settled_index_key(millis, round.id), b"");
        } else {
            batch.put(open_index_key(round.id), b"");
        }

        self.db
            .write(batch)
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }
}

#[async_trait]
impl RoundStore for RocksRoundStore {
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn insert(&self, round: &Round) -> EngineResult<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        if self.load(round.id)?.is_some() {
            return Err(EngineError::ConcurrencyConflict {
                resource: format!("round:{}", round.id),
                attempts: 1,
            });
        }
        self.write(round)
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<Round>> {
        self.load(id)
    }

    async fn put(&self, round: &mut Round, expected_version: u64) -> EngineResult<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let stored = self.load(round.id)?.ok_or(EngineError::UnknownRound(round.id))?;
        if stored.version != expected_version {
            return Err(EngineError::ConcurrencyConflict {
                resource: format!("round:{}", round.id),
                attempts: 1,
            });
        }
        round.version = expected_version + 1;
        self.write(round)
    }

    async fn list_open(&self) -> EngineResult<Vec<Round>> {
        let mut rounds = Vec::new();
        let iter = self.db.prefix_iterator(OPEN_INDEX_PREFIX);
        for row in iter {
            let (key, _) = row.map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
            if !key.starts_with(OPEN_INDEX_PREFIX) {
                break;
            }
            let id_bytes: [u8; 16] = key[OPEN_INDEX_PREFIX.len()..]
                .try_into()
                .map_err(|_| EngineError::StorageUnavailable("corrupt open index".to_string()))?;
            if let Some(round) = self.load(Uuid::from_bytes(id_bytes))? {
                rounds.push(round);
            }
        }
        Ok(rounds)
    }

    async fn list_settled(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<Round>, Option<String>)> {
        let limit = limit.max(1);
        let start: Vec<u8> = match cursor {
            Some(c) => {
                let mut bytes = hex::decode(c)
                    .map_err(|_| EngineError::StorageUnavailable("invalid cursor".to_string()))?;
                // Resume strictly after the cursor key.
                bytes.push(0);
                bytes
            }
            None => SETTLED_INDEX_PREFIX.to_vec(),
        };

        let mut rounds = Vec::with_capacity(limit);
        let mut next_cursor = None;
        let iter = self
            .db
            .iterator(rocksdb::IteratorMode::From(&start, rocksdb::Direction::Forward));
        for row in iter {
            let (key, _) = row.map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
            if !key.starts_with(SETTLED_INDEX_PREFIX) {
                break;
            }
            let id_bytes: [u8; 16] = key[key.len() - 16..]
                .try_into()
                .map_err(|_| EngineError::StorageUnavailable("corrupt settled index".to_string()))?;
            if let Some(round) = self.load(Uuid::from_bytes(id_bytes))? {
                rounds.push(round);
            }
            if rounds.len() == limit {
                next_cursor = Some(hex::encode(&key));
                break;
            }
        }
        Ok((rounds, next_cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::case_battle::{TicketTable, WeightedItem};
    use crate::money::Amount;
    use crate::round::{Participant, RoundParams};
    use crate::seed::{EntropyProvenance, SeedCommitment};

    fn sample_round() -> Round {
        let params = RoundParams::CaseBattle {
            table: TicketTable::new(vec![WeightedItem {
                name: "only".to_string(),
                weight: 100.0,
                value: Amount::from_minor(10),
            }])
            .unwrap(),
            cases_per_participant: 1,
        };
        let seed = SeedCommitment::new(
            "ab".repeat(32),
            None,
            None,
            EntropyProvenance::LocalFallback,
        );
        Round::new(
            params,
            2,
            seed,
            Participant::human(Uuid::new_v4(), Amount::from_minor(100), 0),
        )
    }

    #[tokio::test]
    async fn test_memory_insert_get_roundtrip() {
        let store = MemoryRoundStore::new();
        let round = sample_round();
        store.insert(&round).await.unwrap();

        let loaded = store.get(round.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, round.id);
        assert_eq!(loaded.pot, round.pot);

        // Duplicate insert conflicts.
        assert!(store.insert(&round).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_optimistic_version_check() {
        let store = MemoryRoundStore::new();
        let mut round = sample_round();
        store.insert(&round).await.unwrap();

        store.put(&mut round, 0).await.unwrap();
        assert_eq!(round.version, 1);

        // Stale writer loses.
        let mut stale = store.get(round.id).await.unwrap().unwrap();
        stale.version = 0;
        let err = store.put(&mut stale, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn test_memory_open_listing_excludes_settled() {
        let store = MemoryRoundStore::new();
        let mut settled = sample_round();
        settled
            .join(Participant::bot(Amount::from_minor(100), 1))
            .unwrap();
        settled
            .settle(crate::round::RoundOutcome::CaseBattle {
                draws: vec![],
                winning_team: 0,
                tied_teams: vec![0],
            })
            .unwrap();
        store.insert(&settled).await.unwrap();

        let open = sample_round();
        store.insert(&open).await.unwrap();

        let listed = store.list_open().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, open.id);

        let (page, _) = store.list_settled(None, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, settled.id);
    }

    #[tokio::test]
    async fn test_rocks_roundtrip_and_settled_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksRoundStore::open(dir.path()).unwrap();

        let mut round = sample_round();
        store.insert(&round).await.unwrap();
        assert_eq!(store.list_open().await.unwrap().len(), 1);

        round
            .join(Participant::bot(Amount::from_minor(100), 1))
            .unwrap();
        round
            .settle(crate::round::RoundOutcome::CaseBattle {
                draws: vec![],
                winning_team: 1,
                tied_teams: vec![1],
            })
            .unwrap();
        store.put(&mut round, 0).await.unwrap();

        assert!(store.list_open().await.unwrap().is_empty());
        let (page, _) = store.list_settled(None, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, round.id);
        assert_eq!(page[0].version, 1);
    }

    #[tokio::test]
    async fn test_rocks_pagination_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksRoundStore::open(dir.path()).unwrap();

        for _ in 0..5 {
            let mut round = sample_round();
            round
                .join(Participant::bot(Amount::from_minor(100), 1))
                .unwrap();
            round
                .settle(crate::round::RoundOutcome::CaseBattle {
                    draws: vec![],
                    winning_team: 0,
                    tied_teams: vec![0],
                })
                .unwrap();
            store.insert(&round).await.unwrap();
        }

        let (first_page, cursor) = store.list_settled(None, 3).await.unwrap();
        assert_eq!(first_page.len(), 3);
        let cursor = cursor.expect("more pages remain");

        let (second_page, _) = store.list_settled(Some(&cursor), 3).await.unwrap();
        assert_eq!(second_page.len(), 2);

        let mut all: Vec<Uuid> = first_page.iter().chain(&second_page).map(|r| r.id).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 5);
    }
}
