//! Property-based tests for ledger navigation and validation.

use chrono::DateTime;
use proptest::prelude::*;
use strata_crypto::{sign_block, SigningKey};
use strata_ledger::*;
use strata_types::{AccountState, AccountStates, Snapshot, Transaction};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    ledger: FileLedger,
    sender: SigningKey,
    recipient: SigningKey,
    writer: SigningKey,
}

fn fixture(chunk_size: u64, period: Option<u64>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let sender = SigningKey::from_bytes([21; 32]);
    let writer = SigningKey::from_bytes([23; 32]);
    let mut config = LedgerConfig::new(dir.path());
    config.block_chunk_size = chunk_size;
    config.snapshot_period_in_blocks = period;
    let ledger = FileLedger::open(config)
        .unwrap()
        .with_signing_key(writer.clone());
    ledger
        .add_snapshot(Snapshot::genesis(AccountStates::from([(
            sender.account_id(),
            AccountState::with_balance(1_000_000),
        )])))
        .unwrap();
    Fixture {
        _dir: dir,
        ledger,
        sender,
        recipient: SigningKey::from_bytes([22; 32]),
        writer,
    }
}

impl Fixture {
    fn pay(&self, amount: u64) {
        let request = coin_transfer(
            &self.ledger,
            &self.sender,
            vec![Transaction::new(self.recipient.account_id(), amount)],
        )
        .unwrap();
        let offset = self.ledger.get_next_block_number().unwrap() as i64;
        let timestamp = DateTime::from_timestamp(1_730_000_000 + offset, 0)
            .unwrap()
            .naive_utc();
        self.ledger.add_block_from_request(request, timestamp).unwrap();
    }

    /// Append a block whose recipient balance was inflated, bypassing validation.
    fn pay_forged(&self) {
        let request = coin_transfer(
            &self.ledger,
            &self.sender,
            vec![Transaction::new(self.recipient.account_id(), 1)],
        )
        .unwrap();
        let honest = BlockFactory::new(&self.ledger, &self.writer)
            .create_block_now(request)
            .unwrap();
        let mut message = honest.message;
        message
            .updated_account_states
            .insert(self.recipient.account_id(), AccountState::with_balance(u64::MAX / 2));
        let forged = sign_block(message, &self.writer).unwrap();
        self.ledger.add_block(forged, false).unwrap();
    }

    fn numbers(&self, iter: BlockIter<'_>) -> Vec<u64> {
        iter.map(|b| b.unwrap().number()).collect()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: backward iteration is forward iteration reversed, and the
    /// ranged iterators agree with filtering the full sequence.
    #[test]
    fn backward_is_reversed_forward(
        blocks in 0usize..12,
        chunk_size in 1u64..5,
        pivot in 0u64..14,
    ) {
        let f = fixture(chunk_size, None);
        for amount in 1..=blocks as u64 {
            f.pay(amount);
        }
        let forward = f.numbers(f.ledger.iter_blocks(Direction::Forward));
        let mut backward = f.numbers(f.ledger.iter_blocks(Direction::Backward));
        backward.reverse();
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(forward.len(), blocks);

        let from: Vec<u64> = forward.iter().copied().filter(|n| *n >= pivot).collect();
        prop_assert_eq!(f.numbers(f.ledger.iter_blocks_from(pivot)), from);
        let down: Vec<u64> = forward.iter().rev().copied().filter(|n| *n <= pivot).collect();
        prop_assert_eq!(f.numbers(f.ledger.iter_blocks_backward_from(pivot)), down);
    }

    /// Property: validating contiguous windows in order fails on the same
    /// first block as one full-range call, and passes when it passes.
    #[test]
    fn validation_tiles(
        good in 0usize..8,
        forged in proptest::bool::ANY,
        after in 0usize..3,
        chunk_size in 1u64..4,
        width in 1u64..5,
    ) {
        let f = fixture(chunk_size, None);
        for amount in 1..=good as u64 {
            f.pay(amount);
        }
        if forged {
            f.pay_forged();
        }
        for _ in 0..after {
            f.pay(1);
        }
        let total = f.ledger.get_next_block_number().unwrap();
        let failing_block = |result: LedgerResult<()>| {
            result.err().map(|e| e.as_validation().and_then(|v| v.block_number))
        };

        let full = failing_block(f.ledger.validate_blocks(0, None));
        let mut tiled = None;
        let mut offset = 0;
        while offset < total {
            tiled = failing_block(f.ledger.validate_blocks(offset, Some(width)));
            if tiled.is_some() {
                break;
            }
            offset += width;
        }
        prop_assert_eq!(full, tiled);
        prop_assert_eq!(full.is_some(), forged);
        if forged {
            prop_assert_eq!(full, Some(Some(good as u64)));
        }
    }

    /// Property: balances read through snapshots equal balances replayed
    /// from genesis alone.
    #[test]
    fn snapshots_do_not_change_balances(
        amounts in proptest::collection::vec(1u64..50, 1..10),
        period in 1u64..4,
    ) {
        let f = fixture(3, Some(period));
        let oracle = InMemoryLedger::new();
        oracle.add_snapshot(f.ledger.get_first_snapshot().unwrap().unwrap()).unwrap();
        for amount in &amounts {
            f.pay(*amount);
        }
        for block in f.ledger.iter_blocks(Direction::Forward) {
            oracle.add_block(block.unwrap(), true).unwrap();
        }
        let recipient = f.recipient.account_id();
        let mut expected = 0;
        for (n, amount) in amounts.iter().enumerate() {
            expected += amount;
            prop_assert_eq!(f.ledger.get_balance(&recipient, Some(n as u64)).unwrap(), expected);
            prop_assert_eq!(oracle.get_balance(&recipient, Some(n as u64)).unwrap(), expected);
        }
    }
}
