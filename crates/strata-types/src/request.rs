use serde::{Deserialize, Serialize};

use crate::account::{NodeInfo, ValidatorSchedule};
use crate::identity::{AccountId, HashValue, Signature};

/// Longest memo a transaction may carry, in characters.
pub const MAX_MEMO_LENGTH: usize = 64;

fn is_false(value: &bool) -> bool {
    !*value
}

/// One payment inside a coin transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transaction {
    pub recipient: AccountId,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_fee: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Transaction {
    pub fn new(recipient: AccountId, amount: u64) -> Self {
        Self {
            recipient,
            amount,
            is_fee: false,
            memo: None,
        }
    }

    pub fn fee(recipient: AccountId, amount: u64) -> Self {
        Self {
            is_fee: true,
            ..Self::new(recipient, amount)
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// Coin transfer payload: the sender's current lock plus the payments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoinTransferMessage {
    pub balance_lock: HashValue,
    pub txs: Vec<Transaction>,
}

impl CoinTransferMessage {
    /// Sum of all amounts, fees included. `None` on overflow.
    pub fn total_amount(&self) -> Option<u64> {
        self.txs
            .iter()
            .try_fold(0u64, |total, tx| total.checked_add(tx.amount))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDeclarationMessage {
    pub node: NodeInfo,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorScheduleMessage {
    pub begin_block_number: u64,
    pub end_block_number: u64,
}

impl ValidatorScheduleMessage {
    pub fn schedule(&self) -> ValidatorSchedule {
        ValidatorSchedule::new(self.begin_block_number, self.end_block_number)
    }
}

impl From<ValidatorSchedule> for ValidatorScheduleMessage {
    fn from(schedule: ValidatorSchedule) -> Self {
        Self {
            begin_block_number: schedule.begin_block_number,
            end_block_number: schedule.end_block_number,
        }
    }
}

/// A message together with its signer and the signer's signature over the
/// message's canonical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedMessage<M> {
    pub signer: AccountId,
    pub message: M,
    pub signature: Signature,
}

/// Discriminant stored alongside each block's request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    #[serde(rename = "ct")]
    CoinTransfer,
    #[serde(rename = "nd")]
    NodeDeclaration,
    #[serde(rename = "pvs")]
    ValidatorSchedule,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoinTransfer => write!(f, "coin-transfer"),
            Self::NodeDeclaration => write!(f, "node-declaration"),
            Self::ValidatorSchedule => write!(f, "validator-schedule"),
        }
    }
}

/// The change a block applies, as requested and signed by an account holder.
///
/// On the wire the variant is recognised by the shape of its message (each
/// message type rejects unknown fields); `BlockMessage::block_type` carries the
/// explicit discriminant and must agree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignedChangeRequest {
    CoinTransfer(SignedMessage<CoinTransferMessage>),
    NodeDeclaration(SignedMessage<NodeDeclarationMessage>),
    ValidatorSchedule(SignedMessage<ValidatorScheduleMessage>),
}

impl SignedChangeRequest {
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::CoinTransfer(_) => BlockType::CoinTransfer,
            Self::NodeDeclaration(_) => BlockType::NodeDeclaration,
            Self::ValidatorSchedule(_) => BlockType::ValidatorSchedule,
        }
    }

    pub fn signer(&self) -> &AccountId {
        match self {
            Self::CoinTransfer(r) => &r.signer,
            Self::NodeDeclaration(r) => &r.signer,
            Self::ValidatorSchedule(r) => &r.signer,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Self::CoinTransfer(r) => &r.signature,
            Self::NodeDeclaration(r) => &r.signature,
            Self::ValidatorSchedule(r) => &r.signature,
        }
    }
}
