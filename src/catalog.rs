/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The message catalog: one [`MessageKind`] descriptor per kind a community speaks.
//!
//! A descriptor fixes the kind's four policies and carries its check and apply functions as plain
//! function pointers over the community worker. The catalog is populated once at community start
//! and read-only afterwards.

use std::collections::HashMap;

use crate::engine::CommunityWorker;
use crate::gossip::Gossip;
use crate::message::{ApplyError, CheckOutcome, Message};
use crate::storage::Store;
use crate::types::PeerAddress;

/// Names of the message kinds a community registers.
pub mod kinds {
    pub const CHANNEL: &str = "channel";
    pub const TORRENT: &str = "torrent";
    pub const PLAYLIST: &str = "playlist";
    pub const COMMENT: &str = "comment";
    pub const MODIFICATION: &str = "modification";
    pub const PLAYLIST_TORRENT: &str = "playlist-torrent";
    pub const MISSING_CHANNEL: &str = "missing-channel";
    pub const BARTER_RECORD: &str = "barter-record";
    pub const SIGNATURE_REQUEST: &str = "signature-request";
    pub const SIGNATURE_RESPONSE: &str = "signature-response";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
}

/// What proof of authorship a message of this kind must carry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AuthenticationPolicy {
    None,
    SingleMember,
    DoubleMember,
}

/// Who is permitted to author a message of this kind.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResolutionPolicy {
    /// Any member.
    Public,
    /// Only the community founder.
    Linear,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncDirection {
    Ascending,
    Descending,
    Random,
}

/// How messages of this kind spread and persist.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DistributionPolicy {
    /// Point-to-point, never persisted, never re-disseminated.
    Direct,
    /// Persisted and gossiped indefinitely.
    FullSync { direction: SyncDirection },
    /// Persisted, but only the latest `history_size` messages per author survive.
    LastSync {
        direction: SyncDirection,
        priority: u8,
        history_size: u64,
    },
}

impl DistributionPolicy {
    /// Whether messages of this kind are persisted and re-disseminated.
    pub fn is_synced(&self) -> bool {
        !matches!(self, DistributionPolicy::Direct)
    }
}

/// Where an outbound message of this kind is sent.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DestinationPolicy {
    /// An explicit peer address.
    Address,
    /// A random subset of the community, at most `node_count` peers.
    Community { node_count: usize },
    /// A specific known-live candidate.
    Candidate,
}

pub type CheckFn<S, G> = fn(&CommunityWorker<S, G>, &Message) -> CheckOutcome;
pub type ApplyFn<S, G> =
    fn(&mut CommunityWorker<S, G>, &Message, Option<PeerAddress>) -> Result<(), ApplyError>;

/// The full description of one message kind.
pub struct MessageKind<S: Store, G: Gossip> {
    pub name: &'static str,
    pub authentication: AuthenticationPolicy,
    pub resolution: ResolutionPolicy,
    pub distribution: DistributionPolicy,
    pub destination: DestinationPolicy,
    pub check: CheckFn<S, G>,
    pub apply: ApplyFn<S, G>,
}

impl<S: Store, G: Gossip> Clone for MessageKind<S, G> {
    fn clone(&self) -> Self {
        MessageKind {
            name: self.name,
            authentication: self.authentication,
            resolution: self.resolution,
            distribution: self.distribution,
            destination: self.destination,
            check: self.check,
            apply: self.apply,
        }
    }
}

impl<S: Store, G: Gossip> Copy for MessageKind<S, G> {}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CatalogError {
    UnknownKind(String),
}

/// Name-keyed registry of the kinds a community speaks.
pub struct Catalog<S: Store, G: Gossip> {
    kinds: HashMap<&'static str, MessageKind<S, G>>,
}

impl<S: Store, G: Gossip> Catalog<S, G> {
    pub fn new() -> Catalog<S, G> {
        Catalog {
            kinds: HashMap::new(),
        }
    }

    /// Registers a kind. Registration happens once at community start; registering the same name
    /// twice is a programming error.
    pub fn register(&mut self, kind: MessageKind<S, G>) {
        let previous = self.kinds.insert(kind.name, kind);
        assert!(
            previous.is_none(),
            "message kind registered twice: {}",
            kind.name
        );
    }

    pub fn lookup(&self, name: &str) -> Result<MessageKind<S, G>, CatalogError> {
        self.kinds
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownKind(name.to_string()))
    }
}
