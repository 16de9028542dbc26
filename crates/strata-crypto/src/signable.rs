//! Hashing and signing tied to ledger entities.
//!
//! [`CanonicalMessage`] is implemented by everything that gets hashed or
//! signed; [`SignedEntity`] by everything that carries a signer and signature
//! over such a message.

use serde::Serialize;
use strata_types::canonical::to_canonical_bytes;
use strata_types::{
    AccountId, Block, BlockMessage, CoinTransferMessage, HashValue, NodeDeclarationMessage,
    Signature, SignedChangeRequest, SignedMessage, Snapshot, SnapshotMessage,
    ValidatorScheduleMessage,
};

use crate::hasher::{HasherError, Sha3Hasher};
use crate::signer::{SignatureError, SigningKey, VerifyingKey};

/// A value whose canonical bytes are hashed and signed.
pub trait CanonicalMessage: Serialize {
    /// Sorted-key, whitespace-free UTF-8 encoding.
    fn canonical_bytes(&self) -> Result<Vec<u8>, HasherError> {
        Ok(to_canonical_bytes(self)?)
    }

    /// SHA3-256 over [`canonical_bytes`](Self::canonical_bytes).
    fn get_hash(&self) -> Result<HashValue, HasherError> {
        Ok(Sha3Hasher::hash(&self.canonical_bytes()?))
    }
}

impl CanonicalMessage for CoinTransferMessage {}
impl CanonicalMessage for NodeDeclarationMessage {}
impl CanonicalMessage for ValidatorScheduleMessage {}
impl CanonicalMessage for BlockMessage {}
impl CanonicalMessage for SnapshotMessage<'_> {}

/// An entity signed by an account holder.
pub trait SignedEntity {
    /// The bytes the signature covers.
    fn signed_bytes(&self) -> Result<Vec<u8>, SignatureError>;

    fn signer_account(&self) -> Option<&AccountId>;

    fn signature_value(&self) -> Option<&Signature>;

    /// Check the signature against the signer's public key.
    fn verify_signature(&self) -> Result<(), SignatureError> {
        let (Some(signer), Some(signature)) = (self.signer_account(), self.signature_value())
        else {
            return Err(SignatureError::MissingSignature);
        };
        let key = VerifyingKey::from_account(signer)?;
        key.verify(&self.signed_bytes()?, signature)
    }
}

impl<M: CanonicalMessage> SignedEntity for SignedMessage<M> {
    fn signed_bytes(&self) -> Result<Vec<u8>, SignatureError> {
        Ok(self.message.canonical_bytes()?)
    }

    fn signer_account(&self) -> Option<&AccountId> {
        Some(&self.signer)
    }

    fn signature_value(&self) -> Option<&Signature> {
        Some(&self.signature)
    }
}

impl SignedEntity for SignedChangeRequest {
    fn signed_bytes(&self) -> Result<Vec<u8>, SignatureError> {
        match self {
            Self::CoinTransfer(r) => r.signed_bytes(),
            Self::NodeDeclaration(r) => r.signed_bytes(),
            Self::ValidatorSchedule(r) => r.signed_bytes(),
        }
    }

    fn signer_account(&self) -> Option<&AccountId> {
        Some(self.signer())
    }

    fn signature_value(&self) -> Option<&Signature> {
        Some(self.signature())
    }
}

impl SignedEntity for Block {
    fn signed_bytes(&self) -> Result<Vec<u8>, SignatureError> {
        Ok(self.message.canonical_bytes()?)
    }

    fn signer_account(&self) -> Option<&AccountId> {
        Some(&self.signer)
    }

    fn signature_value(&self) -> Option<&Signature> {
        Some(&self.signature)
    }
}

impl SignedEntity for Snapshot {
    fn signed_bytes(&self) -> Result<Vec<u8>, SignatureError> {
        Ok(self.message().canonical_bytes()?)
    }

    fn signer_account(&self) -> Option<&AccountId> {
        self.signer.as_ref()
    }

    fn signature_value(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }
}

/// Sign `message` with `key`, producing a change request payload.
pub fn sign_message<M: CanonicalMessage>(
    message: M,
    key: &SigningKey,
) -> Result<SignedMessage<M>, SignatureError> {
    let signature = key.sign(&message.canonical_bytes()?);
    Ok(SignedMessage {
        signer: key.account_id(),
        message,
        signature,
    })
}

/// Hash and sign a block message.
pub fn sign_block(message: BlockMessage, key: &SigningKey) -> Result<Block, SignatureError> {
    let bytes = message.canonical_bytes()?;
    Ok(Block {
        hash: Sha3Hasher::hash(&bytes),
        signature: key.sign(&bytes),
        signer: key.account_id(),
        message,
    })
}

/// Sign a snapshot, replacing any previous signature.
pub fn sign_snapshot(mut snapshot: Snapshot, key: &SigningKey) -> Result<Snapshot, SignatureError> {
    let signature = key.sign(&snapshot.message().canonical_bytes()?);
    snapshot.signer = Some(key.account_id());
    snapshot.signature = Some(signature);
    Ok(snapshot)
}

/// The lock a coin transfer leaves on its sender's account.
pub fn make_balance_lock(message: &CoinTransferMessage) -> Result<HashValue, HasherError> {
    message.get_hash()
}
