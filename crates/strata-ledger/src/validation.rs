use strata_crypto::{CanonicalMessage, SignatureError, SignedEntity};
use strata_types::{AccountState, AccountStates, Block, HashValue, Snapshot};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::snapshot::{fold_snapshot, next_block_identifier};
use crate::state::{derive_updated_account_states, LedgerView};
use crate::traits::{Direction, LedgerReader};

/// How far a block got through validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationStage {
    Pending,
    StructuralOk,
    SignatureOk,
    StateOk,
    Accepted,
    Rejected,
}

/// Outcome of validating one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockValidationReport {
    pub block_number: u64,
    pub stage: ValidationStage,
    /// Last stage passed before a rejection.
    pub reached: ValidationStage,
    pub error: Option<ValidationError>,
}

impl BlockValidationReport {
    pub fn is_accepted(&self) -> bool {
        self.stage == ValidationStage::Accepted
    }

    pub fn into_result(self) -> LedgerResult<()> {
        match self.error {
            Some(err) => Err(LedgerError::Validation(err)),
            None => Ok(()),
        }
    }
}

/// Where a block must sit in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainPosition {
    pub block_number: u64,
    pub block_identifier: HashValue,
}

impl ChainPosition {
    /// The position right after the current tip of `reader`.
    pub fn next_of(reader: &dyn LedgerReader) -> LedgerResult<Self> {
        Ok(Self {
            block_number: reader.get_next_block_number()?,
            block_identifier: reader.get_expected_next_block_identifier()?,
        })
    }

    /// The position right after `block`.
    pub fn after(block: &Block) -> Self {
        Self {
            block_number: block.number() + 1,
            block_identifier: block.hash,
        }
    }
}

/// Runs one block through
/// `Pending → StructuralOk → SignatureOk → StateOk → Accepted`, stopping at
/// `Rejected` on the first failure.
///
/// State is checked against `reader` as it stood before the block, so a block
/// that is already stored can be re-validated in place.
pub struct BlockValidator<'a> {
    reader: &'a dyn LedgerReader,
}

impl<'a> BlockValidator<'a> {
    pub fn new(reader: &'a dyn LedgerReader) -> Self {
        Self { reader }
    }

    /// Validate `block` at `position`. Rejections land in the report;
    /// storage failures are returned as errors.
    pub fn run(&self, block: &Block, position: ChainPosition) -> LedgerResult<BlockValidationReport> {
        let mut reached = ValidationStage::Pending;
        let stages = [
            ValidationStage::StructuralOk,
            ValidationStage::SignatureOk,
            ValidationStage::StateOk,
        ];
        for stage in stages {
            let outcome = match stage {
                ValidationStage::StructuralOk => check_structure(block, position),
                ValidationStage::SignatureOk => check_signatures(block),
                _ => self.check_state(block),
            };
            match outcome {
                Ok(()) => reached = stage,
                Err(LedgerError::Validation(err)) => {
                    let err = err.at_block(block.number());
                    debug!(block_number = block.number(), stage = ?reached, %err, "block rejected");
                    return Ok(BlockValidationReport {
                        block_number: block.number(),
                        stage: ValidationStage::Rejected,
                        reached,
                        error: Some(err),
                    });
                }
                Err(other) => return Err(other),
            }
        }
        Ok(BlockValidationReport {
            block_number: block.number(),
            stage: ValidationStage::Accepted,
            reached,
            error: None,
        })
    }

    /// [`run`](Self::run), turning a rejection into an error.
    pub fn validate(&self, block: &Block, position: ChainPosition) -> LedgerResult<()> {
        self.run(block, position)?.into_result()
    }

    fn check_state(&self, block: &Block) -> LedgerResult<()> {
        let view = LedgerView::new(self.reader, block.number());
        let request = &block.message.signed_change_request;
        let derived = derive_updated_account_states(&view, request).map_err(|e| match e {
            LedgerError::Validation(err) => {
                LedgerError::Validation(err.within("message.signed_change_request"))
            }
            other => other,
        })?;
        compare_states(
            "message.updated_account_states",
            &derived,
            &block.message.updated_account_states,
        )
        .map_err(LedgerError::Validation)
    }
}

fn check_structure(block: &Block, position: ChainPosition) -> LedgerResult<()> {
    let message = &block.message;
    if message.block_number != position.block_number {
        return Err(LedgerError::validation(
            "message.block_number",
            format!("expected {}, found {}", position.block_number, message.block_number),
        ));
    }
    if message.block_identifier != position.block_identifier {
        return Err(LedgerError::validation(
            "message.block_identifier",
            format!(
                "expected {}, found {}",
                position.block_identifier, message.block_identifier
            ),
        ));
    }
    let request_type = message.signed_change_request.block_type();
    if message.block_type != request_type {
        return Err(LedgerError::validation(
            "message.block_type",
            format!("{} does not match a {request_type} request", message.block_type),
        ));
    }
    if message.updated_account_states.is_empty() {
        return Err(LedgerError::validation(
            "message.updated_account_states",
            "must not be empty",
        ));
    }
    let hash = message.get_hash()?;
    if hash != block.hash {
        return Err(LedgerError::validation(
            "hash",
            format!("expected {hash}, found {}", block.hash),
        ));
    }
    Ok(())
}

fn check_signatures(block: &Block) -> LedgerResult<()> {
    block
        .message
        .signed_change_request
        .verify_signature()
        .map_err(|e| signature_rejection("message.signed_change_request.signature", e))?;
    block
        .verify_signature()
        .map_err(|e| signature_rejection("signature", e))
}

fn signature_rejection(field: &str, err: SignatureError) -> LedgerError {
    LedgerError::validation(field, err.to_string())
}

/// Field-by-field comparison of account-state maps.
fn compare_states(
    field: &str,
    expected: &AccountStates,
    actual: &AccountStates,
) -> Result<(), ValidationError> {
    if expected.len() != actual.len() {
        return Err(ValidationError::new(
            field,
            format!("expected {} accounts, found {}", expected.len(), actual.len()),
        ));
    }
    for (account, want) in expected {
        let Some(have) = actual.get(account) else {
            return Err(ValidationError::new(
                format!("{field}.{account}"),
                "account is missing",
            ));
        };
        compare_account(&format!("{field}.{account}"), want, have)?;
    }
    Ok(())
}

fn compare_account(
    field: &str,
    want: &AccountState,
    have: &AccountState,
) -> Result<(), ValidationError> {
    let mismatch = |name: &str, want: String, have: String| {
        ValidationError::new(
            format!("{field}.{name}"),
            format!("expected {want}, found {have}"),
        )
    };
    if want.balance != have.balance {
        return Err(mismatch("balance", format!("{:?}", want.balance), format!("{:?}", have.balance)));
    }
    if want.balance_lock != have.balance_lock {
        return Err(mismatch(
            "balance_lock",
            format!("{:?}", want.balance_lock),
            format!("{:?}", have.balance_lock),
        ));
    }
    if want.node != have.node {
        return Err(mismatch("node", format!("{:?}", want.node), format!("{:?}", have.node)));
    }
    if want.primary_validator_schedule != have.primary_validator_schedule {
        return Err(mismatch(
            "primary_validator_schedule",
            format!("{:?}", want.primary_validator_schedule),
            format!("{:?}", have.primary_validator_schedule),
        ));
    }
    Ok(())
}

/// Whole-ledger validation over any [`LedgerReader`].
pub struct ChainValidator<'a> {
    reader: &'a dyn LedgerReader,
}

impl<'a> ChainValidator<'a> {
    pub fn new(reader: &'a dyn LedgerReader) -> Self {
        Self { reader }
    }

    /// Validate snapshots, then every block.
    ///
    /// With `require_full` the first snapshot must be genesis, so the ledger
    /// is verifiable from its very beginning.
    pub fn validate(&self, require_full: bool) -> LedgerResult<()> {
        self.validate_snapshots(require_full)?;
        self.validate_blocks(0, None)
    }

    /// Check each snapshot's own shape and signature, and that each one is
    /// exactly what its predecessor plus the blocks between them produce.
    pub fn validate_snapshots(&self, require_full: bool) -> LedgerResult<()> {
        let mut previous: Option<Snapshot> = None;
        for (index, item) in self.reader.iter_snapshots(Direction::Forward).enumerate() {
            let snapshot = item?;
            let field = format!("snapshots[{index}]");
            if index == 0 && require_full && !snapshot.is_genesis() {
                return Err(LedgerError::validation(field, "first snapshot is not genesis"));
            }
            check_snapshot_shape(&snapshot).map_err(|e| LedgerError::Validation(e.within(&field)))?;

            if let Some(prev) = &previous {
                if snapshot.is_genesis() {
                    return Err(LedgerError::validation(field, "genesis snapshot out of order"));
                }
                let blocks = self
                    .reader
                    .yield_blocks_between(prev.next_block_number(), snapshot.next_block_number() - 1);
                let regenerated = fold_snapshot(prev, blocks)?;
                compare_snapshots(&regenerated, &snapshot)
                    .map_err(|e| LedgerError::Validation(e.within(&field)))?;
            }
            debug!(last_block_number = ?snapshot.last_block_number, "snapshot valid");
            previous = Some(snapshot);
        }
        if previous.is_none() {
            return Err(LedgerError::validation("snapshots", "ledger has no snapshot"));
        }
        Ok(())
    }

    /// Validate blocks numbered `offset..offset + limit` (to the tip when
    /// `limit` is `None`).
    ///
    /// Each block is checked against the ledger as it stood before it, so
    /// consecutive windows raise on the same first bad block as one call
    /// over their union. Blocks below the first snapshot's coverage are
    /// skipped: nothing to check them against.
    pub fn validate_blocks(&self, offset: u64, limit: Option<u64>) -> LedgerResult<()> {
        let first = self
            .reader
            .get_first_snapshot()?
            .ok_or_else(|| LedgerError::validation("snapshots", "ledger has no snapshot"))?;
        let start = offset.max(first.next_block_number());
        let end = match limit {
            Some(0) => return Ok(()),
            Some(limit) => offset.saturating_add(limit - 1),
            None => u64::MAX,
        };
        if start > end {
            return Ok(());
        }

        let mut blocks = self.reader.yield_blocks_between(start, end);
        let Some(first) = blocks.next().transpose()? else {
            return Ok(());
        };
        let mut position = self.position_before(start, first.number())?;
        let validator = BlockValidator::new(self.reader);
        let mut checked = 0u64;
        for item in std::iter::once(Ok(first)).chain(blocks) {
            let block = item?;
            let report = validator.run(&block, position)?;
            if let Some(err) = report.error {
                warn!(block_number = block.number(), %err, "chain validation failed");
                return Err(LedgerError::Validation(err));
            }
            position = ChainPosition::after(&block);
            checked += 1;
        }
        debug!(start, checked, "blocks valid");
        Ok(())
    }

    /// Expected position of block `start`: after the block stored before it,
    /// or after the snapshot it follows when that block is not stored. A
    /// missing predecessor is reported against `first_found`, the first
    /// block actually stored in the range.
    fn position_before(&self, start: u64, first_found: u64) -> LedgerResult<ChainPosition> {
        let previous = start.checked_sub(1).map(|n| self.reader.get_block_by_number(n));
        if let Some(block) = previous.transpose()?.flatten() {
            return Ok(ChainPosition::after(&block));
        }
        if let Some(snapshot) = self.reader.get_closest_snapshot_excluding_block(start)? {
            if snapshot.next_block_number() == start {
                return Ok(ChainPosition {
                    block_number: start,
                    block_identifier: next_block_identifier(&snapshot)?,
                });
            }
        }
        Err(LedgerError::Validation(
            ValidationError::new(
                "message.block_number",
                format!("block {} preceding it is missing", start.saturating_sub(1)),
            )
            .at_block(first_found),
        ))
    }
}

/// Linkage and signature checks that need no other ledger state.
pub(crate) fn check_snapshot_shape(snapshot: &Snapshot) -> Result<(), ValidationError> {
    if !snapshot.has_consistent_linkage() {
        return Err(ValidationError::new(
            "last_block_number",
            "linkage fields must be all set or all unset",
        ));
    }
    if snapshot.last_block_number == Some(u64::MAX) {
        return Err(ValidationError::new(
            "last_block_number",
            "no block can follow the last covered block",
        ));
    }
    match (&snapshot.signer, &snapshot.signature) {
        (None, None) => Ok(()),
        (Some(_), Some(_)) => snapshot
            .verify_signature()
            .map_err(|e| ValidationError::new("signature", e.to_string())),
        _ => Err(ValidationError::new(
            "signature",
            "signer and signature must be set together",
        )),
    }
}

fn compare_snapshots(regenerated: &Snapshot, stored: &Snapshot) -> Result<(), ValidationError> {
    compare_states("account_states", &regenerated.account_states, &stored.account_states)?;
    let linkage = [
        (
            "last_block_number",
            format!("{:?}", regenerated.last_block_number),
            format!("{:?}", stored.last_block_number),
        ),
        (
            "last_block_identifier",
            format!("{:?}", regenerated.last_block_identifier),
            format!("{:?}", stored.last_block_identifier),
        ),
        (
            "last_block_timestamp",
            format!("{:?}", regenerated.last_block_timestamp),
            format!("{:?}", stored.last_block_timestamp),
        ),
        (
            "next_block_identifier",
            format!("{:?}", regenerated.next_block_identifier),
            format!("{:?}", stored.next_block_identifier),
        ),
    ];
    for (field, want, have) in linkage {
        if want != have {
            return Err(ValidationError::new(field, format!("expected {want}, found {have}")));
        }
    }
    Ok(())
}

/// Validate `block` as the next block of `reader`.
pub fn validate_next_block(reader: &dyn LedgerReader, block: &Block) -> LedgerResult<BlockValidationReport> {
    let position = ChainPosition::next_of(reader)?;
    BlockValidator::new(reader).run(block, position)
}
