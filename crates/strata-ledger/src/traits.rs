use std::collections::BTreeSet;

use strata_types::{
    AccountId, AccountState, Block, HashValue, NodeInfo, Snapshot, ValidatorSchedule,
};

use crate::error::{LedgerError, LedgerResult};
use crate::snapshot::next_block_identifier;

/// Traversal direction for the lazy iteration primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Lazy, finite block sequence.
pub type BlockIter<'a> = Box<dyn Iterator<Item = LedgerResult<Block>> + 'a>;

/// Lazy, finite snapshot sequence.
pub type SnapshotIter<'a> = Box<dyn Iterator<Item = LedgerResult<Snapshot>> + 'a>;

/// Read boundary for ledger navigation.
///
/// Implementations provide the two iteration primitives. Every other method
/// has a default expressed only in terms of those primitives, so a storage
/// engine may override any of them for speed while the defaults stay a
/// correctness oracle.
///
/// Block-scoped queries take `on_block: Option<u64>`: `Some(n)` is the state
/// after block `n` has been applied, `None` is the current tip.
pub trait LedgerReader: Send + Sync {
    /// All stored blocks in block-number order (or reverse).
    fn iter_blocks(&self, direction: Direction) -> BlockIter<'_>;

    /// All stored snapshots in coverage order (or reverse). Genesis first.
    fn iter_snapshots(&self, direction: Direction) -> SnapshotIter<'_>;

    /// Blocks numbered `block_number` and above, ascending.
    fn iter_blocks_from(&self, block_number: u64) -> BlockIter<'_> {
        Box::new(
            self.iter_blocks(Direction::Forward)
                .skip_while(move |item| matches!(item, Ok(b) if b.number() < block_number)),
        )
    }

    /// Blocks numbered `block_number` and below, descending.
    fn iter_blocks_backward_from(&self, block_number: u64) -> BlockIter<'_> {
        Box::new(
            self.iter_blocks(Direction::Backward)
                .skip_while(move |item| matches!(item, Ok(b) if b.number() > block_number)),
        )
    }

    fn get_block_by_number(&self, block_number: u64) -> LedgerResult<Option<Block>> {
        match self.iter_blocks_from(block_number).next().transpose()? {
            Some(block) if block.number() == block_number => Ok(Some(block)),
            _ => Ok(None),
        }
    }

    fn get_first_block(&self) -> LedgerResult<Option<Block>> {
        self.iter_blocks(Direction::Forward).next().transpose()
    }

    fn get_last_block(&self) -> LedgerResult<Option<Block>> {
        self.iter_blocks(Direction::Backward).next().transpose()
    }

    fn get_first_snapshot(&self) -> LedgerResult<Option<Snapshot>> {
        self.iter_snapshots(Direction::Forward).next().transpose()
    }

    fn get_last_snapshot(&self) -> LedgerResult<Option<Snapshot>> {
        self.iter_snapshots(Direction::Backward).next().transpose()
    }

    /// The latest snapshot whose coverage ends before `block_number`.
    /// A genesis snapshot qualifies for every block.
    fn get_closest_snapshot_excluding_block(
        &self,
        block_number: u64,
    ) -> LedgerResult<Option<Snapshot>> {
        for item in self.iter_snapshots(Direction::Backward) {
            let snapshot = item?;
            if snapshot.excludes_block(block_number) {
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    fn get_first_block_number(&self) -> LedgerResult<Option<u64>> {
        Ok(self.get_first_block()?.map(|b| b.number()))
    }

    fn get_last_block_number(&self) -> LedgerResult<Option<u64>> {
        Ok(self.get_last_block()?.map(|b| b.number()))
    }

    /// Number the next appended block must carry.
    fn get_next_block_number(&self) -> LedgerResult<u64> {
        let from_block = self.get_last_block_number()?.map(|n| n + 1);
        let from_snapshot = self
            .get_last_snapshot()?
            .map(|s| s.next_block_number());
        from_block
            .into_iter()
            .chain(from_snapshot)
            .max()
            .ok_or_else(|| LedgerError::NotFound("ledger has no snapshot".into()))
    }

    /// Identifier the next appended block must carry: the last block's hash,
    /// or the last snapshot's next-block identifier if it is newer.
    fn get_expected_next_block_identifier(&self) -> LedgerResult<HashValue> {
        let snapshot = self.get_last_snapshot()?;
        let block = self.get_last_block()?;
        match (block, snapshot) {
            (Some(block), Some(s)) if block.number() + 1 >= s.next_block_number() => {
                Ok(block.hash)
            }
            (Some(block), None) => Ok(block.hash),
            (_, Some(s)) => next_block_identifier(&s),
            (None, None) => Err(LedgerError::NotFound("ledger has no snapshot".into())),
        }
    }

    /// Block number that state queries for `on_block` must look before.
    fn resolve_query_bound(&self, on_block: Option<u64>) -> LedgerResult<u64> {
        let next = self.get_next_block_number()?;
        match on_block {
            None => Ok(next),
            Some(n) if n < next => Ok(n + 1),
            Some(n) => Err(LedgerError::NotFound(format!(
                "block {n} is beyond the ledger tip (next block is {next})"
            ))),
        }
    }

    /// Account state with every block below `before` applied.
    ///
    /// Walks blocks backward from `before - 1` to the closest snapshot that
    /// excludes `before`, keeping the newest value of each field, and fills
    /// whatever is still missing from that snapshot.
    fn resolve_account_state_before(
        &self,
        account: &AccountId,
        before: u64,
    ) -> LedgerResult<AccountState> {
        let snapshot = self
            .get_closest_snapshot_excluding_block(before)?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("no snapshot covers the range before block {before}"))
            })?;
        let floor = snapshot.next_block_number();
        let mut state = AccountState::default();
        if before > floor {
            for item in self.iter_blocks_backward_from(before - 1) {
                let block = item?;
                if block.number() < floor {
                    break;
                }
                if let Some(update) = block.updated_state(account) {
                    state.fill_missing_from(update);
                    if state.is_complete() {
                        return Ok(state);
                    }
                }
            }
        }
        if let Some(base) = snapshot.account_states.get(account) {
            state.fill_missing_from(base);
        }
        Ok(state)
    }

    fn get_account_state(
        &self,
        account: &AccountId,
        on_block: Option<u64>,
    ) -> LedgerResult<AccountState> {
        let before = self.resolve_query_bound(on_block)?;
        self.resolve_account_state_before(account, before)
    }

    /// Balance after `on_block`. Never-touched accounts hold zero.
    fn get_balance(&self, account: &AccountId, on_block: Option<u64>) -> LedgerResult<u64> {
        Ok(self.get_account_state(account, on_block)?.balance.unwrap_or(0))
    }

    /// Balance lock after `on_block`. Defaults to the account's own id.
    fn get_balance_lock(
        &self,
        account: &AccountId,
        on_block: Option<u64>,
    ) -> LedgerResult<HashValue> {
        Ok(self
            .get_account_state(account, on_block)?
            .balance_lock
            .unwrap_or_else(|| account.default_balance_lock()))
    }

    fn get_node(&self, account: &AccountId, on_block: Option<u64>) -> LedgerResult<Option<NodeInfo>> {
        Ok(self.get_account_state(account, on_block)?.node)
    }

    fn get_validator_schedule(
        &self,
        account: &AccountId,
        on_block: Option<u64>,
    ) -> LedgerResult<Option<ValidatorSchedule>> {
        Ok(self
            .get_account_state(account, on_block)?
            .primary_validator_schedule)
    }

    /// Blocks numbered `start..=end`, ascending.
    fn yield_blocks_between(&self, start: u64, end: u64) -> BlockIter<'_> {
        Box::new(
            self.iter_blocks_from(start)
                .take_while(move |item| !matches!(item, Ok(b) if b.number() > end)),
        )
    }

    /// Every account present in the closest snapshot or touched since, as of
    /// `on_block`.
    fn yield_known_accounts(&self, on_block: Option<u64>) -> LedgerResult<BTreeSet<AccountId>> {
        let before = self.resolve_query_bound(on_block)?;
        let snapshot = self
            .get_closest_snapshot_excluding_block(before)?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("no snapshot covers the range before block {before}"))
            })?;
        let mut accounts: BTreeSet<AccountId> = snapshot.account_states.keys().copied().collect();
        let floor = snapshot.next_block_number();
        if before > floor {
            for item in self.yield_blocks_between(floor, before - 1) {
                accounts.extend(item?.message.updated_account_states.keys().copied());
            }
        }
        Ok(accounts)
    }

    /// Declared nodes as of `on_block`.
    fn yield_nodes(&self, on_block: Option<u64>) -> LedgerResult<Vec<NodeInfo>> {
        let mut nodes = Vec::new();
        for account in self.yield_known_accounts(on_block)? {
            if let Some(node) = self.get_node(&account, on_block)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// The declared node whose current validator schedule covers `block_number`.
    fn get_primary_validator(&self, block_number: u64) -> LedgerResult<Option<NodeInfo>> {
        for account in self.yield_known_accounts(None)? {
            let state = self.get_account_state(&account, None)?;
            let covers = state
                .primary_validator_schedule
                .is_some_and(|s| s.covers(block_number));
            if covers {
                if let Some(node) = state.node {
                    return Ok(Some(node));
                }
            }
        }
        Ok(None)
    }
}

/// Write boundary for ledger mutation.
pub trait LedgerWriter: Send + Sync {
    /// Append `block`, validating it against the current tip first when
    /// `validate` is set.
    fn add_block(&self, block: Block, validate: bool) -> LedgerResult<()>;

    fn add_snapshot(&self, snapshot: Snapshot) -> LedgerResult<()>;

    /// Remove every block and snapshot.
    fn clear(&self) -> LedgerResult<()>;
}
