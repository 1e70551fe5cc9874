/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for 'inert' types, i.e., those that are sent around and inspected, but have no active behavior.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};

/// Identifier of a community, derived from the founder's verifying key with
/// [`community_id_from_founder`].
pub type CommunityId = [u8; 20];

/// Lamport-style logical clock value stamped on every disseminated message.
pub type GlobalTime = u64;

/// Local storage row identifier assigned by the [Store](crate::storage::Store) when a message is
/// persisted. Never valid on the wire: two peers assign different storage ids to the same message.
pub type StorageId = u64;

/// Small numeric alias for a member's public key, assigned by the local Store. Community state is
/// keyed by `MemberId`, never by key bytes.
pub type MemberId = u32;

/// Index of a reputation cycle. Cycle *n* covers the wall-clock interval
/// `[n * cycle_size, (n + 1) * cycle_size)`.
pub type Cycle = u64;

pub type InfoHash = [u8; 20];
pub type PublicKeyBytes = [u8; 32];
pub type SignatureBytes = [u8; 64];

/// Transport-level address of a peer, as reported by the [Gossip](crate::gossip::Gossip)
/// collaborator.
pub type PeerAddress = std::net::SocketAddr;

/// Derives a community id by hashing the founder's public key and truncating to 20 bytes.
pub fn community_id_from_founder(founder: &PublicKeyBytes) -> CommunityId {
    let mut hasher = sha2::Sha256::new();
    hasher.update(founder);
    let digest = hasher.finalize();
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest[..20]);
    id
}

/// A community member: the pairing of a locally-assigned numeric id and the member's public key
/// bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Member {
    pub id: MemberId,
    pub public_key: PublicKeyBytes,
}

/// A sliding window of reputation cycles in which a peer was observed online. Bit 0 corresponds to
/// `cycle`, bit *i* to `cycle - i`; cycles further back than 64 are forgotten.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct EffortHistory {
    bits: u64,
    cycle: Cycle,
}

impl EffortHistory {
    pub fn new(cycle: Cycle) -> EffortHistory {
        EffortHistory { bits: 0, cycle }
    }

    pub fn from_parts(bits: u64, cycle: Cycle) -> EffortHistory {
        EffortHistory { bits, cycle }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Advances the window to `cycle` (shifting older observations down) and marks the current
    /// cycle as observed. The window position never moves backwards.
    pub fn promote(&mut self, cycle: Cycle) {
        if cycle > self.cycle {
            let shift = cycle - self.cycle;
            self.bits = if shift >= 64 { 0 } else { self.bits << shift };
            self.cycle = cycle;
        }
        self.bits |= 1;
    }

    /// Intersects two histories. Both sides keep only the cycles they agree on. Returns `None` if
    /// the windows are positioned at different cycles, in which case no comparison is meaningful.
    pub fn intersect(&self, other: &EffortHistory) -> Option<EffortHistory> {
        if self.cycle == other.cycle {
            Some(EffortHistory {
                bits: self.bits & other.bits,
                cycle: self.cycle,
            })
        } else {
            None
        }
    }
}
