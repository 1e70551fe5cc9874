/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The unit of dissemination: a typed, authenticated, community-scoped message.
//!
//! Messages are borsh-encoded for the wire. The `storage_id` field is local bookkeeping and never
//! serialized; two peers holding the same message will know it under different storage ids.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, Verifier};

use crate::payload::Payload;
use crate::types::{
    CommunityId, GlobalTime, PublicKeyBytes, Signature, SignatureBytes, SigningKey, StorageId,
    VerifyingKey,
};

/// Proof of authorship attached to a message. Which variant a kind requires is fixed by its
/// authentication policy in the catalog.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub enum MessageAuthentication {
    None,
    Single {
        signer: PublicKeyBytes,
        signature: SignatureBytes,
    },
    Double {
        first: PublicKeyBytes,
        second: PublicKeyBytes,
        first_signature: SignatureBytes,
        second_signature: SignatureBytes,
    },
}

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Message {
    pub kind: String,
    pub community_id: CommunityId,
    pub global_time: GlobalTime,
    pub authentication: MessageAuthentication,
    pub payload: Payload,
    #[borsh_skip]
    pub storage_id: Option<StorageId>,
}

impl Message {
    /// Creates an unauthenticated message. Kinds that require signatures call
    /// [`sign_single`](Self::sign_single) (or assemble a `Double` authentication) afterwards.
    pub fn new(
        community_id: CommunityId,
        global_time: GlobalTime,
        payload: Payload,
    ) -> Message {
        Message {
            kind: payload.kind().to_string(),
            community_id,
            global_time,
            authentication: MessageAuthentication::None,
            payload,
            storage_id: None,
        }
    }

    /// The bytes that signatures commit to: everything except the signatures themselves. For
    /// double-signed messages the two signer keys are part of the signed bytes, binding the
    /// signatures to the member pair.
    pub fn message_bytes(&self) -> Vec<u8> {
        match &self.authentication {
            MessageAuthentication::Double { first, second, .. } => (
                &self.kind,
                &self.community_id,
                first,
                second,
                self.global_time,
                &self.payload,
            )
                .try_to_vec()
                .unwrap(),
            _ => (
                &self.kind,
                &self.community_id,
                self.global_time,
                &self.payload,
            )
                .try_to_vec()
                .unwrap(),
        }
    }

    pub fn sign_single(&mut self, keypair: &SigningKey) {
        let signature = keypair.sign(&self.message_bytes());
        self.authentication = MessageAuthentication::Single {
            signer: keypair.verifying_key().to_bytes(),
            signature: signature.to_bytes(),
        };
    }

    /// Checks every signature the authentication section claims. Messages with
    /// `MessageAuthentication::None` are vacuously correct.
    pub fn is_correctly_signed(&self) -> bool {
        let bytes = self.message_bytes();
        match &self.authentication {
            MessageAuthentication::None => true,
            MessageAuthentication::Single { signer, signature } => {
                verify(signer, &bytes, signature)
            }
            MessageAuthentication::Double {
                first,
                second,
                first_signature,
                second_signature,
            } => verify(first, &bytes, first_signature) && verify(second, &bytes, second_signature),
        }
    }

    /// The message's primary author, if it is authenticated.
    pub fn signer(&self) -> Option<PublicKeyBytes> {
        match &self.authentication {
            MessageAuthentication::None => None,
            MessageAuthentication::Single { signer, .. } => Some(*signer),
            MessageAuthentication::Double { first, .. } => Some(*first),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn decode(bytes: &[u8]) -> Result<Message, std::io::Error> {
        Message::try_from_slice(bytes)
    }
}

pub(crate) fn verify(public_key: &PublicKeyBytes, bytes: &[u8], signature: &SignatureBytes) -> bool {
    match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key.verify(bytes, &Signature::from_bytes(signature)).is_ok(),
        Err(_) => false,
    }
}

/// Structural description of a future message that a parked message is waiting for. Matching is
/// purely structural: kind name, community id, and an optional payload filter.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Footprint {
    pub kind: &'static str,
    pub community_id: CommunityId,
    pub filter: Filter,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Filter {
    Any,
    /// Matches only payloads carrying this request-cache identifier.
    Identifier(u32),
}

impl Footprint {
    pub fn matches(&self, message: &Message) -> bool {
        if message.kind != self.kind || message.community_id != self.community_id {
            return false;
        }
        match self.filter {
            Filter::Any => true,
            Filter::Identifier(identifier) => match &message.payload {
                Payload::SignatureResponse(p) => p.identifier == identifier,
                Payload::Pong(p) => p.identifier == identifier,
                _ => false,
            },
        }
    }
}

/// Verdict of a kind's check function on a single message of a batch.
pub enum CheckOutcome {
    /// Proceed to apply.
    Accept,
    /// Discard, with a reason for the drop event. No retry, no NACK.
    Drop(&'static str),
    /// Park until a message matching the footprint is accepted, and send the given fetch request
    /// toward the batch's origin.
    Delay(Delay),
}

pub struct Delay {
    pub footprint: Footprint,
    pub request: Payload,
}

/// A kind's apply function could not produce its side effects. Logged per message; the rest of the
/// batch continues.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ApplyError {
    /// The message references a record that is not (or no longer) in storage.
    MissingRecord {
        kind: &'static str,
        storage_id: StorageId,
    },
    /// No channel has been applied yet, but the payload needs one.
    MissingChannel,
    /// A signature inside the payload (not the message authentication) failed verification.
    BadSignature,
    /// The payload variant does not belong to the kind's table. Only reachable if the structural
    /// filter in the poller is bypassed.
    UnexpectedPayload,
    /// The payload carries a request-cache identifier that is no longer claimed.
    UnknownIdentifier(u32),
}
