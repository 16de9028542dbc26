use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::account::AccountState;
use crate::identity::{AccountId, HashValue, Signature};
use crate::request::{BlockType, SignedChangeRequest};

/// Account states touched by one block, keyed by account.
pub type AccountStates = BTreeMap<AccountId, AccountState>;

/// The signed content of a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockMessage {
    pub block_type: BlockType,
    pub block_number: u64,
    /// Hash of the previous block, or the closest snapshot's
    /// next-block identifier for the first block after it.
    pub block_identifier: HashValue,
    /// Naive UTC.
    pub timestamp: NaiveDateTime,
    pub signed_change_request: SignedChangeRequest,
    pub updated_account_states: AccountStates,
}

/// One accepted change with its hash and the writer's signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub message: BlockMessage,
    pub hash: HashValue,
    pub signer: AccountId,
    pub signature: Signature,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.message.block_number
    }

    pub fn block_type(&self) -> BlockType {
        self.message.block_type
    }

    /// Updated state for `account` in this block, if it was touched.
    pub fn updated_state(&self, account: &AccountId) -> Option<&AccountState> {
        self.message.updated_account_states.get(account)
    }
}
