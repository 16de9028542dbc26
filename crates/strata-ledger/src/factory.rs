use chrono::{NaiveDateTime, Utc};
use strata_crypto::{sign_block, sign_message, SignedEntity, SigningKey};
use strata_types::{
    Block, BlockMessage, CoinTransferMessage, NodeDeclarationMessage, NodeInfo,
    SignedChangeRequest, Transaction, ValidatorScheduleMessage,
};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::state::{derive_updated_account_states, LedgerView};
use crate::traits::LedgerReader;

/// Turns accepted change requests into signed blocks on top of `reader`.
pub struct BlockFactory<'a> {
    reader: &'a dyn LedgerReader,
    key: &'a SigningKey,
}

impl<'a> BlockFactory<'a> {
    pub fn new(reader: &'a dyn LedgerReader, key: &'a SigningKey) -> Self {
        Self { reader, key }
    }

    /// Build the next block for `request`, stamped with `timestamp`.
    pub fn create_block(
        &self,
        request: SignedChangeRequest,
        timestamp: NaiveDateTime,
    ) -> LedgerResult<Block> {
        request.verify_signature().map_err(|e| {
            LedgerError::validation("signed_change_request.signature", e.to_string())
        })?;
        let block_number = self.reader.get_next_block_number()?;
        let view = LedgerView::new(self.reader, block_number);
        let updated_account_states = derive_updated_account_states(&view, &request)
            .map_err(|e| match e {
                LedgerError::Validation(err) => {
                    LedgerError::Validation(err.within("signed_change_request").at_block(block_number))
                }
                other => other,
            })?;
        let message = BlockMessage {
            block_type: request.block_type(),
            block_number,
            block_identifier: self.reader.get_expected_next_block_identifier()?,
            timestamp,
            signed_change_request: request,
            updated_account_states,
        };
        let block = sign_block(message, self.key)?;
        debug!(block_number, block_type = %block.block_type(), "created block");
        Ok(block)
    }

    /// [`create_block`](Self::create_block) stamped with the current UTC time.
    pub fn create_block_now(&self, request: SignedChangeRequest) -> LedgerResult<Block> {
        self.create_block(request, Utc::now().naive_utc())
    }
}

/// Coin transfer from `key`'s account, locked to its current balance lock.
pub fn coin_transfer(
    reader: &dyn LedgerReader,
    key: &SigningKey,
    txs: Vec<Transaction>,
) -> LedgerResult<SignedChangeRequest> {
    let balance_lock = reader.get_balance_lock(&key.account_id(), None)?;
    let message = CoinTransferMessage { balance_lock, txs };
    Ok(SignedChangeRequest::CoinTransfer(sign_message(message, key)?))
}

pub fn node_declaration(key: &SigningKey, node: NodeInfo) -> LedgerResult<SignedChangeRequest> {
    let message = NodeDeclarationMessage { node };
    Ok(SignedChangeRequest::NodeDeclaration(sign_message(message, key)?))
}

pub fn validator_schedule(
    key: &SigningKey,
    begin_block_number: u64,
    end_block_number: u64,
) -> LedgerResult<SignedChangeRequest> {
    let message = ValidatorScheduleMessage {
        begin_block_number,
        end_block_number,
    };
    Ok(SignedChangeRequest::ValidatorSchedule(sign_message(message, key)?))
}

#[cfg(test)]
mod tests {
    use strata_types::{BlockType, Signature};

    use super::*;
    use crate::testing::{timestamp, Actors};
    use crate::traits::LedgerWriter;
    use crate::validation::validate_next_block;

    #[test]
    fn created_block_validates() {
        let actors = Actors::new();
        let ledger = actors.ledger();
        let request =
            coin_transfer(&ledger, &actors.key_a, vec![Transaction::new(actors.b(), 10)]).unwrap();
        let block = BlockFactory::new(&ledger, &actors.writer)
            .create_block(request, timestamp(0))
            .unwrap();
        assert_eq!(block.number(), 0);
        assert_eq!(block.block_type(), BlockType::CoinTransfer);
        assert_eq!(block.signer, actors.writer.account_id());
        assert!(validate_next_block(&ledger, &block).unwrap().is_accepted());
    }

    #[test]
    fn forged_request_is_refused() {
        let actors = Actors::new();
        let ledger = actors.ledger();
        let mut request =
            coin_transfer(&ledger, &actors.key_a, vec![Transaction::new(actors.b(), 10)]).unwrap();
        if let SignedChangeRequest::CoinTransfer(r) = &mut request {
            r.signature = Signature::from_bytes([0; 64]);
        }
        let err = BlockFactory::new(&ledger, &actors.writer)
            .create_block(request, timestamp(0))
            .unwrap_err();
        assert_eq!(
            err.as_validation().map(|e| e.field.as_str()),
            Some("signed_change_request.signature")
        );
    }

    #[test]
    fn replayed_request_fails_on_balance_lock() {
        let actors = Actors::new();
        let ledger = actors.ledger();
        let factory = BlockFactory::new(&ledger, &actors.writer);
        let request =
            coin_transfer(&ledger, &actors.key_a, vec![Transaction::new(actors.b(), 10)]).unwrap();
        let block = factory.create_block(request.clone(), timestamp(0)).unwrap();
        ledger.add_block(block, true).unwrap();

        let err = factory.create_block(request, timestamp(1)).unwrap_err();
        let err = err.as_validation().unwrap();
        assert_eq!(err.field, "signed_change_request.message.balance_lock");
        assert_eq!(err.block_number, Some(1));
    }

    #[test]
    fn node_and_schedule_requests() {
        let actors = Actors::new();
        let ledger = actors.ledger();
        let factory = BlockFactory::new(&ledger, &actors.writer);
        let node = NodeInfo {
            identifier: actors.a(),
            network_addresses: vec!["http://127.0.0.1:8555".into()],
            fee_amount: 4,
            fee_account: None,
        };
        let requests = [
            node_declaration(&actors.key_a, node.clone()).unwrap(),
            validator_schedule(&actors.key_a, 0, 99).unwrap(),
        ];
        for (i, request) in requests.into_iter().enumerate() {
            let block = factory.create_block(request, timestamp(i as i64)).unwrap();
            ledger.add_block(block, true).unwrap();
        }
        assert_eq!(ledger.get_node(&actors.a(), None).unwrap(), Some(node.clone()));
        assert_eq!(ledger.get_primary_validator(50).unwrap(), Some(node));
        assert_eq!(ledger.get_primary_validator(100).unwrap(), None);
        assert_eq!(ledger.yield_nodes(Some(0)).unwrap().len(), 1);
    }
}
