//! Account-state derivation.
//!
//! [`derive_updated_account_states`] is the one rule that turns a signed
//! change request into the account updates a block carries. Block creation,
//! block validation, and the validator's state checks all go through it.

use std::collections::BTreeMap;

use strata_crypto::make_balance_lock;
use strata_types::{
    AccountId, AccountState, AccountStates, CoinTransferMessage, NodeDeclarationMessage,
    SignedChangeRequest, SignedMessage, ValidatorScheduleMessage, MAX_MEMO_LENGTH,
};

use crate::error::{LedgerError, LedgerResult};
use crate::traits::LedgerReader;

/// Where derivation reads the pre-block state of an account from.
pub trait AccountStateSource {
    fn account_state(&self, account: &AccountId) -> LedgerResult<AccountState>;
}

/// A ledger as it stood just before block `before`.
pub struct LedgerView<'a> {
    reader: &'a dyn LedgerReader,
    before: u64,
}

impl<'a> LedgerView<'a> {
    pub fn new(reader: &'a dyn LedgerReader, before: u64) -> Self {
        Self { reader, before }
    }
}

impl AccountStateSource for LedgerView<'_> {
    fn account_state(&self, account: &AccountId) -> LedgerResult<AccountState> {
        self.reader.resolve_account_state_before(account, self.before)
    }
}

/// A running map of full account states, as kept by snapshot generation.
impl AccountStateSource for AccountStates {
    fn account_state(&self, account: &AccountId) -> LedgerResult<AccountState> {
        Ok(self.get(account).cloned().unwrap_or_default())
    }
}

/// Account updates `request` produces against `source`.
///
/// Rejections are [`LedgerError::Validation`] with field paths relative to
/// the request (`message.txs[0].amount`, `message.balance_lock`, ...).
pub fn derive_updated_account_states(
    source: &dyn AccountStateSource,
    request: &SignedChangeRequest,
) -> LedgerResult<AccountStates> {
    match request {
        SignedChangeRequest::CoinTransfer(r) => derive_coin_transfer(source, r),
        SignedChangeRequest::NodeDeclaration(r) => derive_node_declaration(r),
        SignedChangeRequest::ValidatorSchedule(r) => derive_validator_schedule(r),
    }
}

fn derive_coin_transfer(
    source: &dyn AccountStateSource,
    request: &SignedMessage<CoinTransferMessage>,
) -> LedgerResult<AccountStates> {
    let signer = request.signer;
    let message = &request.message;
    if message.txs.is_empty() {
        return Err(LedgerError::validation("message.txs", "must not be empty"));
    }

    let mut credits: BTreeMap<AccountId, u64> = BTreeMap::new();
    for (i, tx) in message.txs.iter().enumerate() {
        if tx.amount == 0 {
            return Err(LedgerError::validation(
                format!("message.txs[{i}].amount"),
                "must be at least 1",
            ));
        }
        if tx.recipient == signer {
            return Err(LedgerError::validation(
                format!("message.txs[{i}].recipient"),
                "must differ from the signer",
            ));
        }
        if tx.memo.as_ref().is_some_and(|m| m.chars().count() > MAX_MEMO_LENGTH) {
            return Err(LedgerError::validation(
                format!("message.txs[{i}].memo"),
                format!("longer than {MAX_MEMO_LENGTH} characters"),
            ));
        }
        let credit = credits.entry(tx.recipient).or_insert(0);
        *credit = credit
            .checked_add(tx.amount)
            .ok_or_else(|| LedgerError::validation("message.txs", "amount overflow"))?;
    }
    let total = message
        .total_amount()
        .ok_or_else(|| LedgerError::validation("message.txs", "amount overflow"))?;

    let sender = source.account_state(&signer)?;
    let current_lock = sender
        .balance_lock
        .unwrap_or_else(|| signer.default_balance_lock());
    if message.balance_lock != current_lock {
        return Err(LedgerError::validation(
            "message.balance_lock",
            format!("expected {current_lock}, found {}", message.balance_lock),
        ));
    }
    let balance = sender.balance.unwrap_or(0);
    let remaining = balance.checked_sub(total).ok_or_else(|| {
        LedgerError::validation(
            "message.txs",
            format!("insufficient balance: {balance} available, {total} required"),
        )
    })?;

    let mut updates = AccountStates::new();
    updates.insert(
        signer,
        AccountState::with_balance_and_lock(remaining, make_balance_lock(message)?),
    );
    for (recipient, credit) in credits {
        let current = source.account_state(&recipient)?.balance.unwrap_or(0);
        let credited = current.checked_add(credit).ok_or_else(|| {
            LedgerError::validation("message.txs", format!("balance overflow for {recipient}"))
        })?;
        updates.insert(recipient, AccountState::with_balance(credited));
    }
    Ok(updates)
}

fn derive_node_declaration(
    request: &SignedMessage<NodeDeclarationMessage>,
) -> LedgerResult<AccountStates> {
    let node = &request.message.node;
    if node.identifier != request.signer {
        return Err(LedgerError::validation(
            "message.node.identifier",
            "must equal the signer",
        ));
    }
    let state = AccountState {
        node: Some(node.clone()),
        ..AccountState::default()
    };
    Ok(AccountStates::from([(request.signer, state)]))
}

fn derive_validator_schedule(
    request: &SignedMessage<ValidatorScheduleMessage>,
) -> LedgerResult<AccountStates> {
    let message = &request.message;
    if message.begin_block_number > message.end_block_number {
        return Err(LedgerError::validation(
            "message.end_block_number",
            "must not precede begin_block_number",
        ));
    }
    let state = AccountState {
        primary_validator_schedule: Some(message.schedule()),
        ..AccountState::default()
    };
    Ok(AccountStates::from([(request.signer, state)]))
}

/// Fold `updates` into `states`, field by field.
pub fn apply_account_updates(states: &mut AccountStates, updates: &AccountStates) {
    for (account, update) in updates {
        states.entry(*account).or_default().apply(update);
    }
}

#[cfg(test)]
mod tests {
    use strata_crypto::{sign_message, SigningKey};
    use strata_types::{HashValue, NodeInfo, Transaction};

    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes([seed; 32])
    }

    fn transfer(
        key: &SigningKey,
        lock: HashValue,
        txs: Vec<Transaction>,
    ) -> SignedChangeRequest {
        let message = CoinTransferMessage {
            balance_lock: lock,
            txs,
        };
        SignedChangeRequest::CoinTransfer(sign_message(message, key).unwrap())
    }

    fn funded(account: AccountId, balance: u64) -> AccountStates {
        AccountStates::from([(account, AccountState::with_balance(balance))])
    }

    fn rejected_field(result: LedgerResult<AccountStates>) -> String {
        match result {
            Err(LedgerError::Validation(err)) => err.field,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn coin_transfer_debits_sender_and_credits_recipients() {
        let a = key(1);
        let (b, c) = (key(2).account_id(), key(3).account_id());
        let states = funded(a.account_id(), 1000);
        let request = transfer(
            &a,
            a.account_id().default_balance_lock(),
            vec![Transaction::new(b, 10), Transaction::fee(c, 1)],
        );
        let updates = derive_updated_account_states(&states, &request).unwrap();

        let SignedChangeRequest::CoinTransfer(r) = &request else {
            unreachable!()
        };
        let sender = &updates[&a.account_id()];
        assert_eq!(sender.balance, Some(989));
        assert_eq!(sender.balance_lock, Some(make_balance_lock(&r.message).unwrap()));
        assert_eq!(updates[&b], AccountState::with_balance(10));
        assert_eq!(updates[&c], AccountState::with_balance(1));
    }

    #[test]
    fn repeated_recipient_is_summed() {
        let a = key(1);
        let b = key(2).account_id();
        let mut states = funded(a.account_id(), 100);
        states.insert(b, AccountState::with_balance(5));
        let request = transfer(
            &a,
            a.account_id().default_balance_lock(),
            vec![Transaction::new(b, 10), Transaction::new(b, 20)],
        );
        let updates = derive_updated_account_states(&states, &request).unwrap();
        assert_eq!(updates[&b].balance, Some(35));
        assert_eq!(updates[&b].balance_lock, None);
        assert_eq!(updates[&a.account_id()].balance, Some(70));
    }

    #[test]
    fn stale_lock_is_rejected() {
        let a = key(1);
        let mut states = funded(a.account_id(), 100);
        states
            .get_mut(&a.account_id())
            .unwrap()
            .balance_lock = Some(HashValue::from_bytes([9; 32]));
        let request = transfer(
            &a,
            a.account_id().default_balance_lock(),
            vec![Transaction::new(key(2).account_id(), 1)],
        );
        assert_eq!(
            rejected_field(derive_updated_account_states(&states, &request)),
            "message.balance_lock"
        );
    }

    #[test]
    fn rule_violations_name_the_field() {
        let a = key(1);
        let lock = a.account_id().default_balance_lock();
        let states = funded(a.account_id(), 100);
        let b = key(2).account_id();
        let cases = [
            (vec![], "message.txs"),
            (vec![Transaction::new(b, 0)], "message.txs[0].amount"),
            (
                vec![Transaction::new(b, 1), Transaction::new(a.account_id(), 1)],
                "message.txs[1].recipient",
            ),
            (
                vec![Transaction::new(b, 1).with_memo("m".repeat(65))],
                "message.txs[0].memo",
            ),
            (vec![Transaction::new(b, 101)], "message.txs"),
            (
                vec![Transaction::new(b, u64::MAX), Transaction::fee(key(3).account_id(), 1)],
                "message.txs",
            ),
        ];
        for (txs, field) in cases {
            let request = transfer(&a, lock, txs);
            assert_eq!(
                rejected_field(derive_updated_account_states(&states, &request)),
                field
            );
        }
    }

    #[test]
    fn node_declaration_replaces_node() {
        let a = key(1);
        let node = NodeInfo {
            identifier: a.account_id(),
            network_addresses: vec!["http://10.0.0.1:8555".into()],
            fee_amount: 2,
            fee_account: None,
        };
        let request = SignedChangeRequest::NodeDeclaration(
            sign_message(NodeDeclarationMessage { node: node.clone() }, &a).unwrap(),
        );
        let updates = derive_updated_account_states(&AccountStates::new(), &request).unwrap();
        assert_eq!(updates[&a.account_id()].node, Some(node));
        assert_eq!(updates[&a.account_id()].balance, None);
    }

    #[test]
    fn node_declaration_for_someone_else_is_rejected() {
        let a = key(1);
        let node = NodeInfo {
            identifier: key(2).account_id(),
            network_addresses: Vec::new(),
            fee_amount: 0,
            fee_account: None,
        };
        let request = SignedChangeRequest::NodeDeclaration(
            sign_message(NodeDeclarationMessage { node }, &a).unwrap(),
        );
        assert_eq!(
            rejected_field(derive_updated_account_states(&AccountStates::new(), &request)),
            "message.node.identifier"
        );
    }

    #[test]
    fn inverted_schedule_is_rejected() {
        let a = key(1);
        let message = ValidatorScheduleMessage {
            begin_block_number: 10,
            end_block_number: 9,
        };
        let request =
            SignedChangeRequest::ValidatorSchedule(sign_message(message, &a).unwrap());
        assert_eq!(
            rejected_field(derive_updated_account_states(&AccountStates::new(), &request)),
            "message.end_block_number"
        );
    }

    #[test]
    fn apply_merges_fields() {
        let account = key(1).account_id();
        let mut states = funded(account, 50);
        let lock = HashValue::from_bytes([4; 32]);
        apply_account_updates(
            &mut states,
            &AccountStates::from([(account, AccountState::with_balance_and_lock(40, lock))]),
        );
        assert_eq!(states[&account], AccountState::with_balance_and_lock(40, lock));
    }
}
