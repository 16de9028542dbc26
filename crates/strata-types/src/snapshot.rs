use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::block::AccountStates;
use crate::identity::{AccountId, HashValue, Signature};

/// Full point-in-time account-state checkpoint.
///
/// A genesis snapshot has every linkage field unset. Every later snapshot
/// covers all blocks up to and including `last_block_number`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    pub account_states: AccountStates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_block_identifier: Option<HashValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_block_timestamp: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_block_identifier: Option<HashValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// The signed portion of a snapshot: everything except `signer` and `signature`.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SnapshotMessage<'a> {
    pub account_states: &'a AccountStates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_block_identifier: Option<HashValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_block_timestamp: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_block_identifier: Option<HashValue>,
}

impl Snapshot {
    pub fn genesis(account_states: AccountStates) -> Self {
        Self {
            account_states,
            ..Self::default()
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.last_block_number.is_none()
    }

    /// Number of the first block this snapshot does not cover.
    pub fn next_block_number(&self) -> u64 {
        self.last_block_number.map_or(0, |n| n + 1)
    }

    /// Whether the snapshot's covered range excludes `block_number`.
    pub fn excludes_block(&self, block_number: u64) -> bool {
        self.last_block_number.map_or(true, |last| last < block_number)
    }

    /// Linkage fields are either all set or all unset.
    pub fn has_consistent_linkage(&self) -> bool {
        let set = [
            self.last_block_number.is_some(),
            self.last_block_identifier.is_some(),
            self.last_block_timestamp.is_some(),
            self.next_block_identifier.is_some(),
        ];
        set.iter().all(|s| *s) || set.iter().all(|s| !*s)
    }

    pub fn message(&self) -> SnapshotMessage<'_> {
        SnapshotMessage {
            account_states: &self.account_states,
            last_block_number: self.last_block_number,
            last_block_identifier: self.last_block_identifier,
            last_block_timestamp: self.last_block_timestamp,
            next_block_identifier: self.next_block_identifier,
        }
    }

    /// Copy without `signer`/`signature`.
    pub fn unsigned(&self) -> Self {
        Self {
            signer: None,
            signature: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::account::AccountState;

    fn linked() -> Snapshot {
        Snapshot {
            last_block_number: Some(9),
            last_block_identifier: Some(HashValue::from_bytes([1; 32])),
            last_block_timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            next_block_identifier: Some(HashValue::from_bytes([2; 32])),
            ..Snapshot::default()
        }
    }

    #[test]
    fn genesis_covers_nothing() {
        let genesis = Snapshot::genesis(AccountStates::new());
        assert!(genesis.is_genesis());
        assert_eq!(genesis.next_block_number(), 0);
        assert!(genesis.excludes_block(0));
        assert!(genesis.has_consistent_linkage());
    }

    #[test]
    fn linked_snapshot_ranges() {
        let snapshot = linked();
        assert_eq!(snapshot.next_block_number(), 10);
        assert!(!snapshot.excludes_block(9));
        assert!(snapshot.excludes_block(10));
        assert!(snapshot.has_consistent_linkage());
    }

    #[test]
    fn partial_linkage_is_inconsistent() {
        let mut snapshot = linked();
        snapshot.next_block_identifier = None;
        assert!(!snapshot.has_consistent_linkage());
    }

    #[test]
    fn message_omits_signature_fields() {
        let mut snapshot = Snapshot::genesis(AccountStates::from([(
            AccountId::from_bytes([4; 32]),
            AccountState::with_balance(1),
        )]));
        snapshot.signer = Some(AccountId::from_bytes([5; 32]));
        snapshot.signature = Some(Signature::from_bytes([6; 64]));
        let value = serde_json::to_value(snapshot.message()).unwrap();
        assert!(value.get("signer").is_none());
        assert!(value.get("signature").is_none());
        assert_eq!(snapshot.unsigned().signer, None);
    }
}
