use strata_crypto::CanonicalMessage;
use strata_types::{Block, HashValue, Snapshot};

use crate::error::{LedgerError, LedgerResult};
use crate::state::apply_account_updates;
use crate::traits::LedgerReader;

/// Identifier of the first block after `snapshot`.
///
/// A genesis snapshot has no linkage, so the first block is linked to the
/// hash of the genesis snapshot's message instead.
pub fn next_block_identifier(snapshot: &Snapshot) -> LedgerResult<HashValue> {
    match snapshot.next_block_identifier {
        Some(id) => Ok(id),
        None => Ok(snapshot.message().get_hash()?),
    }
}

/// Apply `blocks` (which must start right after `base`) onto `base`.
///
/// The result is unsigned. With no blocks it is an unsigned copy of `base`.
pub fn fold_snapshot<I>(base: &Snapshot, blocks: I) -> LedgerResult<Snapshot>
where
    I: IntoIterator<Item = LedgerResult<Block>>,
{
    let mut result = base.unsigned();
    let mut expected = base.next_block_number();
    for item in blocks {
        let block = item?;
        if block.number() != expected {
            return Err(LedgerError::InternalConsistency(format!(
                "expected block {expected} while folding snapshot, found {}",
                block.number()
            )));
        }
        apply_account_updates(&mut result.account_states, &block.message.updated_account_states);
        result.last_block_number = Some(block.number());
        result.last_block_identifier = Some(block.message.block_identifier);
        result.last_block_timestamp = Some(block.message.timestamp);
        result.next_block_identifier = Some(block.hash);
        expected += 1;
    }
    Ok(result)
}

/// Regenerate the snapshot covering every block up to `upto` (default: the
/// tip) from the closest earlier snapshot.
///
/// Deterministic and read-only. If a snapshot already covers exactly `upto`
/// its unsigned copy comes back.
pub fn generate_snapshot(reader: &dyn LedgerReader, upto: Option<u64>) -> LedgerResult<Snapshot> {
    let next = reader.get_next_block_number()?;
    let last = match upto {
        Some(n) if n < next => Some(n),
        Some(n) => {
            return Err(LedgerError::NotFound(format!(
                "cannot snapshot block {n}: the ledger ends before it"
            )))
        }
        None => next.checked_sub(1),
    };

    let Some(last) = last else {
        // No blocks at all: the latest snapshot is the whole ledger.
        return reader
            .get_last_snapshot()?
            .map(|s| s.unsigned())
            .ok_or_else(|| LedgerError::NotFound("ledger has no snapshot".into()));
    };

    let base = reader
        .get_closest_snapshot_excluding_block(last + 1)?
        .ok_or_else(|| {
            LedgerError::NotFound(format!("no snapshot precedes block {last}"))
        })?;
    let start = base.next_block_number();
    if start > last {
        return Ok(base.unsigned());
    }
    let snapshot = fold_snapshot(&base, reader.yield_blocks_between(start, last))?;
    if snapshot.last_block_number != Some(last) {
        return Err(LedgerError::NotFound(format!(
            "blocks {start}..={last} are not all stored"
        )));
    }
    tracing::debug!(base = ?base.last_block_number, last, "generated snapshot");
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use strata_types::AccountState;

    use super::*;
    use crate::testing::{chain_of, Actors};
    use crate::traits::LedgerWriter;

    #[test]
    fn genesis_links_to_its_message_hash() {
        let actors = Actors::new();
        let id = next_block_identifier(&actors.genesis).unwrap();
        assert_eq!(id, actors.genesis.message().get_hash().unwrap());
        let chain = chain_of(&actors, 1);
        assert_eq!(chain[0].message.block_identifier, id);
    }

    #[test]
    fn fold_applies_blocks_and_links() {
        let actors = Actors::new();
        let chain = chain_of(&actors, 3);
        let folded = fold_snapshot(&actors.genesis, chain.iter().cloned().map(Ok)).unwrap();
        assert_eq!(folded.last_block_number, Some(2));
        assert_eq!(folded.next_block_identifier, Some(chain[2].hash));
        assert_eq!(folded.last_block_identifier, Some(chain[2].message.block_identifier));
        assert_eq!(folded.account_states[&actors.b()], AccountState::with_balance(3));
        assert_eq!(folded.account_states[&actors.a()].balance, Some(997));
        assert!(folded.has_consistent_linkage());
    }

    #[test]
    fn fold_rejects_gaps() {
        let actors = Actors::new();
        let chain = chain_of(&actors, 3);
        let gapped = [chain[0].clone(), chain[2].clone()].into_iter().map(Ok);
        assert!(matches!(
            fold_snapshot(&actors.genesis, gapped),
            Err(LedgerError::InternalConsistency(_))
        ));
    }

    #[test]
    fn generate_up_to_any_block() {
        let actors = Actors::new();
        let ledger = actors.ledger();
        for block in chain_of(&actors, 4) {
            ledger.add_block(block, false).unwrap();
        }
        let at_one = generate_snapshot(&ledger, Some(1)).unwrap();
        assert_eq!(at_one.last_block_number, Some(1));
        assert_eq!(at_one.account_states[&actors.b()].balance, Some(2));

        let tip = generate_snapshot(&ledger, None).unwrap();
        assert_eq!(tip.last_block_number, Some(3));
        ledger.add_snapshot(at_one.clone()).unwrap();
        assert_eq!(generate_snapshot(&ledger, None).unwrap(), tip);
        assert_eq!(generate_snapshot(&ledger, Some(1)).unwrap(), at_one);

        assert!(matches!(
            generate_snapshot(&ledger, Some(4)),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn generate_without_blocks_returns_last_snapshot() {
        let actors = Actors::new();
        let ledger = actors.ledger();
        assert_eq!(generate_snapshot(&ledger, None).unwrap(), actors.genesis);
        assert!(matches!(
            generate_snapshot(&ledger, Some(0)),
            Err(LedgerError::NotFound(_))
        ));
    }
}
