/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persistence collaborator.
//!
//! The library does not persist anything itself. Users provide an implementation of [`Store`] and
//! the community worker calls into it synchronously from its own thread. Implementations decide
//! durability; the worker only assumes that storage ids and member ids are stable for the lifetime
//! of the store.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::ledger::RecordRow;
use crate::message::Message;
use crate::types::{CommunityId, Cycle, GlobalTime, InfoHash, MemberId, PublicKeyBytes, StorageId};

pub trait Store: Clone + Send + 'static {
    /// Returns the local numeric id for a public key, assigning a fresh one on first sight. Ids
    /// are stable: the same key always maps to the same id.
    fn member_id(&mut self, public_key: &PublicKeyBytes) -> MemberId;

    /// Persists an encoded message, returning its freshly assigned storage id.
    fn persist_message(&mut self, message: &Message, encoded: &[u8]) -> StorageId;

    /// Whether a message with this storage id is (still) persisted.
    fn contains_message(&self, storage_id: StorageId) -> bool;

    /// The encoded bytes of the most recent persisted message of `kind`, by global time.
    fn latest_message(&self, kind: &str) -> Option<Vec<u8>>;

    /// Deletes all but the newest `history_size` messages of `kind` authored by `signer`,
    /// returning the storage ids of the deleted messages.
    fn prune_last_sync(&mut self, kind: &str, signer: MemberId, history_size: u64) -> Vec<StorageId>;

    /// The persisted global-time high-water mark for a community, 0 if never stored.
    fn load_global_time(&self, community_id: &CommunityId) -> GlobalTime;

    fn store_global_time(&mut self, community_id: &CommunityId, global_time: GlobalTime);

    fn upsert_channel(&mut self, community_id: &CommunityId, row: ChannelRow);

    fn channel(&self, community_id: &CommunityId) -> Option<ChannelRow>;

    fn upsert_torrent(&mut self, row: TorrentRow);

    fn upsert_playlist(&mut self, row: PlaylistRow);

    fn upsert_comment(&mut self, row: CommentRow);

    fn upsert_modification(&mut self, row: ModificationRow);

    fn upsert_playlist_torrent(&mut self, row: PlaylistTorrentRow);

    fn load_book(&self, member: MemberId) -> Option<BookRow>;

    fn store_book(&mut self, row: BookRow);

    fn upsert_record(&mut self, row: RecordRow);
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ChannelRow {
    pub storage_id: StorageId,
    pub author: MemberId,
    pub name: String,
    pub description: String,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TorrentRow {
    pub storage_id: StorageId,
    pub channel: StorageId,
    pub author: MemberId,
    pub infohash: InfoHash,
    pub timestamp: u64,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PlaylistRow {
    pub storage_id: StorageId,
    pub channel: StorageId,
    pub author: MemberId,
    pub name: String,
    pub description: String,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct CommentRow {
    pub storage_id: StorageId,
    pub channel: StorageId,
    pub author: MemberId,
    pub text: String,
    pub timestamp: u64,
    pub reply_to: Option<StorageId>,
    pub reply_after: Option<StorageId>,
    pub playlist: Option<StorageId>,
    pub infohash: Option<InfoHash>,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ModificationRow {
    pub storage_id: StorageId,
    pub author: MemberId,
    pub modification_on: StorageId,
    pub entries: BTreeMap<String, String>,
    pub latest_modification: Option<StorageId>,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PlaylistTorrentRow {
    pub storage_id: StorageId,
    pub author: MemberId,
    pub playlist: StorageId,
    pub infohash: InfoHash,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct BookRow {
    pub member: MemberId,
    pub cycle: Cycle,
    pub effort_bits: u64,
    pub upload: u64,
    pub download: u64,
}
