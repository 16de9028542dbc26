use serde::{Deserialize, Serialize};

use crate::identity::{AccountId, HashValue};

/// A node's public declaration: where to reach it and what it charges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeInfo {
    pub identifier: AccountId,
    pub network_addresses: Vec<String>,
    pub fee_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_account: Option<AccountId>,
}

/// Inclusive block range during which a node acts as the primary validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorSchedule {
    pub begin_block_number: u64,
    pub end_block_number: u64,
}

impl ValidatorSchedule {
    pub fn new(begin_block_number: u64, end_block_number: u64) -> Self {
        Self {
            begin_block_number,
            end_block_number,
        }
    }

    /// Whether `block_number` falls inside the schedule.
    pub fn covers(&self, block_number: u64) -> bool {
        self.begin_block_number <= block_number && block_number <= self.end_block_number
    }
}

/// Partial account state.
///
/// A `None` field means "not changed here" (in a block) or "absent" (in a
/// snapshot), never zero. Readers fall back to the documented defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_lock: Option<HashValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_validator_schedule: Option<ValidatorSchedule>,
}

impl AccountState {
    pub fn with_balance(balance: u64) -> Self {
        Self {
            balance: Some(balance),
            ..Self::default()
        }
    }

    pub fn with_balance_and_lock(balance: u64, balance_lock: HashValue) -> Self {
        Self {
            balance: Some(balance),
            balance_lock: Some(balance_lock),
            ..Self::default()
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.balance.is_none()
            && self.balance_lock.is_none()
            && self.node.is_none()
            && self.primary_validator_schedule.is_none()
    }

    /// True when every field is set.
    pub fn is_complete(&self) -> bool {
        self.balance.is_some()
            && self.balance_lock.is_some()
            && self.node.is_some()
            && self.primary_validator_schedule.is_some()
    }

    /// Overwrite every field that `update` sets.
    pub fn apply(&mut self, update: &AccountState) {
        if let Some(balance) = update.balance {
            self.balance = Some(balance);
        }
        if let Some(lock) = update.balance_lock {
            self.balance_lock = Some(lock);
        }
        if let Some(node) = &update.node {
            self.node = Some(node.clone());
        }
        if let Some(schedule) = update.primary_validator_schedule {
            self.primary_validator_schedule = Some(schedule);
        }
    }

    /// Fill only the fields that are still unset from `older`.
    ///
    /// Used when walking history backwards: the newest value of each field wins.
    pub fn fill_missing_from(&mut self, older: &AccountState) {
        if self.balance.is_none() {
            self.balance = older.balance;
        }
        if self.balance_lock.is_none() {
            self.balance_lock = older.balance_lock;
        }
        if self.node.is_none() {
            self.node = older.node.clone();
        }
        if self.primary_validator_schedule.is_none() {
            self.primary_validator_schedule = older.primary_validator_schedule;
        }
    }
}
