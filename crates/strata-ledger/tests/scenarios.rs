//! End-to-end ledger scenarios over the file-backed store.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, NaiveDateTime};
use strata_crypto::{make_balance_lock, sign_block, SigningKey};
use strata_fs::FileStorage;
use strata_ledger::block_store::BLOCK_CHUNKS_DIR;
use strata_ledger::*;
use strata_types::{
    AccountId, AccountState, AccountStates, Block, BlockMessage, SignedChangeRequest, Snapshot,
    Transaction,
};

struct World {
    a: SigningKey,
    b: SigningKey,
    c: SigningKey,
    writer: SigningKey,
}

impl World {
    fn new() -> Self {
        Self {
            a: SigningKey::from_bytes([11; 32]),
            b: SigningKey::from_bytes([12; 32]),
            c: SigningKey::from_bytes([13; 32]),
            writer: SigningKey::from_bytes([99; 32]),
        }
    }

    fn genesis(&self) -> Snapshot {
        Snapshot::genesis(AccountStates::from([(
            self.a.account_id(),
            AccountState::with_balance(1000),
        )]))
    }

    fn open(&self, dir: &Path, chunk_size: u64, period: Option<u64>) -> FileLedger {
        let mut config = LedgerConfig::new(dir);
        config.block_chunk_size = chunk_size;
        config.snapshot_period_in_blocks = period;
        FileLedger::open(config)
            .unwrap()
            .with_signing_key(self.writer.clone())
    }

    fn pay(&self, ledger: &FileLedger, to: AccountId, amount: u64) -> Block {
        let request = coin_transfer(ledger, &self.a, vec![Transaction::new(to, amount)]).unwrap();
        let offset = ledger.get_next_block_number().unwrap() as i64;
        ledger.add_block_from_request(request, at(offset)).unwrap()
    }
}

fn at(offset_seconds: i64) -> NaiveDateTime {
    DateTime::from_timestamp(1_720_000_000 + offset_seconds, 0)
        .unwrap()
        .naive_utc()
}

#[test]
fn coin_transfer_and_replay() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let ledger = world.open(dir.path(), 100, None);
    ledger.add_snapshot(world.genesis()).unwrap();
    let (a, b, c) = (world.a.account_id(), world.b.account_id(), world.c.account_id());

    let request = coin_transfer(
        &ledger,
        &world.a,
        vec![Transaction::new(b, 10), Transaction::fee(c, 1)],
    )
    .unwrap();
    assert_eq!(
        ledger.get_balance_lock(&a, None).unwrap(),
        a.default_balance_lock()
    );
    let block = ledger.add_block_from_request(request.clone(), at(0)).unwrap();

    let SignedChangeRequest::CoinTransfer(transfer) = &request else {
        panic!("expected a coin transfer");
    };
    let expected_lock = make_balance_lock(&transfer.message).unwrap();
    assert_eq!(
        block.message.updated_account_states,
        AccountStates::from([
            (a, AccountState::with_balance_and_lock(989, expected_lock)),
            (b, AccountState::with_balance(10)),
            (c, AccountState::with_balance(1)),
        ])
    );
    assert_eq!(ledger.get_balance(&a, Some(0)).unwrap(), 989);
    assert_eq!(ledger.get_balance_lock(&a, Some(0)).unwrap(), expected_lock);
    assert_eq!(ledger.get_balance(&b, Some(0)).unwrap(), 10);
    assert_eq!(ledger.get_balance(&c, None).unwrap(), 1);

    // The factory refuses the stale request outright.
    let err = ledger
        .add_block_from_request(request.clone(), at(1))
        .unwrap_err();
    assert!(err.as_validation().is_some(), "{err}");

    // So does validation of a hand-built block carrying it.
    let replay = sign_block(
        BlockMessage {
            block_number: 1,
            block_identifier: block.hash,
            timestamp: at(1),
            ..block.message.clone()
        },
        &world.writer,
    )
    .unwrap();
    let err = ledger.add_block(replay, true).unwrap_err();
    let err = err.as_validation().unwrap();
    assert_eq!(
        err.field,
        "message.signed_change_request.message.balance_lock"
    );
    assert_eq!(err.block_number, Some(1));
    assert_eq!(ledger.get_next_block_number().unwrap(), 1);
}

#[test]
fn chunks_rotate_and_snapshot_closes_the_open_one() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let ledger = world.open(dir.path(), 2, None);
    ledger.add_snapshot(world.genesis()).unwrap();
    for amount in 1..=5 {
        world.pay(&ledger, world.b.account_id(), amount);
    }
    assert_eq!(
        ledger.block_store().chunks().unwrap(),
        vec![
            ChunkName::closed(0, 1),
            ChunkName::closed(2, 3),
            ChunkName::open(4)
        ]
    );

    let snapshot = ledger.snapshot(Some(4)).unwrap();
    assert_eq!(snapshot.last_block_number, Some(4));
    assert_eq!(
        ledger.block_store().chunks().unwrap(),
        vec![
            ChunkName::closed(0, 1),
            ChunkName::closed(2, 3),
            ChunkName::closed(4, 4)
        ]
    );

    world.pay(&ledger, world.b.account_id(), 6);
    assert_eq!(
        ledger.block_store().chunks().unwrap().last(),
        Some(&ChunkName::open(5))
    );
    ledger.finalize_all_open_segments().unwrap();
    ledger.finalize_all_open_segments().unwrap();
    assert_eq!(
        ledger.block_store().chunks().unwrap().last(),
        Some(&ChunkName::closed(5, 5))
    );
    ledger.validate(false).unwrap();
}

#[test]
fn second_writer_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let ledger = Arc::new(world.open(dir.path(), 10, None));
    ledger.add_snapshot(world.genesis()).unwrap();
    let request =
        coin_transfer(&*ledger, &world.a, vec![Transaction::new(world.b.account_id(), 1)])
            .unwrap();

    let block = BlockFactory::new(&*ledger, &world.writer)
        .create_block(request.clone(), at(0))
        .unwrap();

    let guard = ledger.lock().acquire().unwrap();

    let other_process = world.open(dir.path(), 10, None);
    assert!(matches!(
        other_process.add_block(block.clone(), true),
        Err(LedgerError::Locked)
    ));
    assert!(matches!(
        other_process.add_block_from_request(request.clone(), at(0)),
        Err(LedgerError::Locked)
    ));
    assert!(matches!(other_process.clear(), Err(LedgerError::Locked)));

    let shared = Arc::clone(&ledger);
    let pending = request.clone();
    let from_thread = thread::spawn(move || shared.add_block_from_request(pending, at(0)))
        .join()
        .unwrap();
    assert!(matches!(from_thread, Err(LedgerError::Locked)));

    // Reads never take the lock.
    assert_eq!(other_process.get_next_block_number().unwrap(), 0);

    drop(guard);
    other_process.add_block(block, true).unwrap();
    assert_eq!(ledger.get_next_block_number().unwrap(), 1);
}

#[test]
fn lock_internals_require_holding_it() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let ledger = world.open(dir.path(), 10, None);
    assert!(matches!(
        ledger.lock().ensure_held(),
        Err(LedgerError::InternalConsistency(_))
    ));
}

#[test]
fn snapshots_match_independent_regeneration() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let ledger = world.open(dir.path(), 4, Some(3));
    ledger.add_snapshot(world.genesis()).unwrap();
    let replay = InMemoryLedger::with_snapshot(world.genesis()).unwrap();
    for amount in 1..=8 {
        let block = world.pay(&ledger, world.b.account_id(), amount);
        replay.add_block(block, true).unwrap();
    }

    let stored: Vec<Snapshot> = ledger
        .iter_snapshots(Direction::Forward)
        .map(|s| s.unwrap())
        .collect();
    assert_eq!(stored.len(), 3);
    for snapshot in &stored[1..] {
        let regenerated = generate_snapshot(&replay, snapshot.last_block_number).unwrap();
        assert_eq!(regenerated, snapshot.unsigned());
    }
    ledger.validate(false).unwrap();
}

#[test]
fn file_ledger_agrees_with_in_memory_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let ledger = world.open(dir.path(), 3, Some(4));
    ledger.add_snapshot(world.genesis()).unwrap();
    let oracle = InMemoryLedger::with_snapshot(world.genesis()).unwrap();
    let recipients = [world.b.account_id(), world.c.account_id()];
    for i in 0..11u64 {
        let block = world.pay(&ledger, recipients[(i % 2) as usize], i + 1);
        oracle.add_block(block, true).unwrap();
    }

    let accounts = [world.a.account_id(), world.b.account_id(), world.c.account_id()];
    for n in 0..11 {
        for account in &accounts {
            assert_eq!(
                ledger.get_account_state(account, Some(n)).unwrap(),
                oracle.get_account_state(account, Some(n)).unwrap(),
                "account {account} at block {n}"
            );
        }
        assert_eq!(
            ledger.get_block_by_number(n).unwrap(),
            oracle.get_block_by_number(n).unwrap()
        );
        let closest = match n {
            0..=3 => None,
            4..=7 => Some(3),
            _ => Some(7),
        };
        assert_eq!(
            ledger
                .get_closest_snapshot_excluding_block(n)
                .unwrap()
                .and_then(|s| s.last_block_number),
            closest
        );
    }
    assert_eq!(
        ledger.yield_known_accounts(None).unwrap(),
        oracle.yield_known_accounts(None).unwrap()
    );
    assert_eq!(
        ledger.get_expected_next_block_identifier().unwrap(),
        oracle.get_expected_next_block_identifier().unwrap()
    );
}

#[test]
fn copy_from_reproduces_the_ledger() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let source = world.open(source_dir.path(), 2, Some(3));
    source.add_snapshot(world.genesis()).unwrap();
    for amount in 1..=7 {
        world.pay(&source, world.b.account_id(), amount);
    }

    let target = world.open(target_dir.path(), 5, None);
    target.copy_from(&source).unwrap();
    assert_eq!(
        target.snapshot_store().names().unwrap(),
        source.snapshot_store().names().unwrap()
    );
    let blocks = |ledger: &FileLedger| -> Vec<Block> {
        ledger
            .iter_blocks(Direction::Forward)
            .map(|b| b.unwrap())
            .collect()
    };
    assert_eq!(blocks(&target), blocks(&source));
    target.validate(false).unwrap();

    let empty_dir = tempfile::tempdir().unwrap();
    let empty = world.open(empty_dir.path(), 3, None);
    assert!(matches!(
        empty.copy_from(&InMemoryLedger::new()),
        Err(LedgerError::NotFound(_))
    ));
}

#[test]
fn reopened_ledger_heals_a_torn_open_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    {
        let ledger = world.open(dir.path(), 10, None);
        ledger.add_snapshot(world.genesis()).unwrap();
        for amount in 1..=3 {
            world.pay(&ledger, world.b.account_id(), amount);
        }
    }
    // A crash mid-append leaves half a record behind.
    let config = LedgerConfig::new(dir.path());
    let chunks = FileStorage::new(dir.path().join(BLOCK_CHUNKS_DIR), config.storage_config());
    chunks
        .append(&ChunkName::open(0).file_name(), &[200, 0, 0, 0, 1, 2, 3, 4, 5])
        .unwrap();

    let ledger = world.open(dir.path(), 10, None);
    assert_eq!(ledger.get_next_block_number().unwrap(), 3);
    assert_eq!(ledger.get_balance(&world.b.account_id(), None).unwrap(), 6);
    world.pay(&ledger, world.b.account_id(), 4);
    assert_eq!(ledger.get_balance(&world.b.account_id(), None).unwrap(), 10);
    ledger.validate(false).unwrap();
}

#[test]
fn pruned_ledger_validates_as_partial() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new();
    let mut config = LedgerConfig::new(dir.path());
    config.block_chunk_size = 2;
    config.snapshot_period_in_blocks = Some(2);
    config.snapshot_retention = Some(2);
    let ledger = FileLedger::open(config)
        .unwrap()
        .with_signing_key(world.writer.clone());
    ledger.add_snapshot(world.genesis()).unwrap();
    for amount in 1..=6 {
        world.pay(&ledger, world.b.account_id(), amount);
    }
    assert_eq!(
        ledger.snapshot_store().names().unwrap(),
        vec![SnapshotName::UpTo(3), SnapshotName::UpTo(5)]
    );
    assert_eq!(ledger.get_first_block_number().unwrap(), Some(4));
    assert!(ledger.validate(false).is_err());
    ledger.validate(true).unwrap();
    assert_eq!(ledger.get_balance(&world.b.account_id(), Some(4)).unwrap(), 15);
    assert!(matches!(
        ledger.get_balance(&world.b.account_id(), Some(2)),
        Err(LedgerError::NotFound(_))
    ));
}
