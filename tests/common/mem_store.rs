//! A simple, volatile, in-memory implementation of [`Store`].

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use gossipy::{
    ledger::RecordRow,
    message::Message,
    storage::{
        BookRow, ChannelRow, CommentRow, ModificationRow, PlaylistRow, PlaylistTorrentRow, Store,
        TorrentRow,
    },
    types::{CommunityId, GlobalTime, MemberId, PublicKeyBytes, StorageId},
};

/// An in-memory implementation of [`Store`], shared between a node and the test that observes it.
#[derive(Clone)]
pub(crate) struct MemStore(Arc<Mutex<Inner>>);

struct Inner {
    next_member_id: MemberId,
    members: HashMap<PublicKeyBytes, MemberId>,
    next_storage_id: StorageId,
    messages: BTreeMap<StorageId, MessageRow>,
    global_times: HashMap<CommunityId, GlobalTime>,
    channels: HashMap<CommunityId, ChannelRow>,
    torrents: BTreeMap<StorageId, TorrentRow>,
    playlists: BTreeMap<StorageId, PlaylistRow>,
    comments: BTreeMap<StorageId, CommentRow>,
    modifications: BTreeMap<StorageId, ModificationRow>,
    playlist_torrents: BTreeMap<StorageId, PlaylistTorrentRow>,
    books: HashMap<MemberId, BookRow>,
    records: HashMap<(MemberId, MemberId, u64), RecordRow>,
}

struct MessageRow {
    kind: String,
    signer: Option<MemberId>,
    global_time: GlobalTime,
    encoded: Vec<u8>,
}

impl MemStore {
    /// Create a new, empty `MemStore`.
    pub(crate) fn new() -> MemStore {
        MemStore(Arc::new(Mutex::new(Inner {
            next_member_id: 1,
            members: HashMap::new(),
            next_storage_id: 1,
            messages: BTreeMap::new(),
            global_times: HashMap::new(),
            channels: HashMap::new(),
            torrents: BTreeMap::new(),
            playlists: BTreeMap::new(),
            comments: BTreeMap::new(),
            modifications: BTreeMap::new(),
            playlist_torrents: BTreeMap::new(),
            books: HashMap::new(),
            records: HashMap::new(),
        })))
    }

    fn lock(&self) -> MutexGuard<Inner> {
        self.0.lock().unwrap()
    }

    // Observation methods used by tests:

    pub(crate) fn channel_row(&self, community_id: &CommunityId) -> Option<ChannelRow> {
        self.lock().channels.get(community_id).cloned()
    }

    pub(crate) fn torrent_rows(&self) -> Vec<TorrentRow> {
        self.lock().torrents.values().cloned().collect()
    }

    pub(crate) fn comment_rows(&self) -> Vec<CommentRow> {
        self.lock().comments.values().cloned().collect()
    }

    pub(crate) fn record_rows(&self) -> Vec<RecordRow> {
        self.lock().records.values().cloned().collect()
    }

    pub(crate) fn member_id_of(&self, public_key: &PublicKeyBytes) -> Option<MemberId> {
        self.lock().members.get(public_key).copied()
    }

    pub(crate) fn message_count(&self, kind: &str) -> usize {
        self.lock()
            .messages
            .values()
            .filter(|row| row.kind == kind)
            .count()
    }
}

impl Store for MemStore {
    fn member_id(&mut self, public_key: &PublicKeyBytes) -> MemberId {
        let mut inner = self.lock();
        if let Some(id) = inner.members.get(public_key) {
            return *id;
        }
        let id = inner.next_member_id;
        inner.next_member_id += 1;
        inner.members.insert(*public_key, id);
        id
    }

    fn persist_message(&mut self, message: &Message, encoded: &[u8]) -> StorageId {
        let signer = message.signer();
        let mut inner = self.lock();
        let signer = signer.map(|public_key| match inner.members.get(&public_key) {
            Some(id) => *id,
            None => {
                let id = inner.next_member_id;
                inner.next_member_id += 1;
                inner.members.insert(public_key, id);
                id
            }
        });
        let storage_id = inner.next_storage_id;
        inner.next_storage_id += 1;
        inner.messages.insert(
            storage_id,
            MessageRow {
                kind: message.kind.clone(),
                signer,
                global_time: message.global_time,
                encoded: encoded.to_vec(),
            },
        );
        storage_id
    }

    fn contains_message(&self, storage_id: StorageId) -> bool {
        self.lock().messages.contains_key(&storage_id)
    }

    fn latest_message(&self, kind: &str) -> Option<Vec<u8>> {
        self.lock()
            .messages
            .values()
            .filter(|row| row.kind == kind)
            .max_by_key(|row| row.global_time)
            .map(|row| row.encoded.clone())
    }

    fn prune_last_sync(
        &mut self,
        kind: &str,
        signer: MemberId,
        history_size: u64,
    ) -> Vec<StorageId> {
        let mut inner = self.lock();
        let mut matching: Vec<(StorageId, GlobalTime)> = inner
            .messages
            .iter()
            .filter(|(_, row)| row.kind == kind && row.signer == Some(signer))
            .map(|(storage_id, row)| (*storage_id, row.global_time))
            .collect();
        matching.sort_by_key(|(_, global_time)| std::cmp::Reverse(*global_time));
        let pruned: Vec<StorageId> = matching
            .into_iter()
            .skip(history_size as usize)
            .map(|(storage_id, _)| storage_id)
            .collect();
        for storage_id in &pruned {
            inner.messages.remove(storage_id);
        }
        pruned
    }

    fn load_global_time(&self, community_id: &CommunityId) -> GlobalTime {
        self.lock()
            .global_times
            .get(community_id)
            .copied()
            .unwrap_or(0)
    }

    fn store_global_time(&mut self, community_id: &CommunityId, global_time: GlobalTime) {
        self.lock().global_times.insert(*community_id, global_time);
    }

    fn upsert_channel(&mut self, community_id: &CommunityId, row: ChannelRow) {
        self.lock().channels.insert(*community_id, row);
    }

    fn channel(&self, community_id: &CommunityId) -> Option<ChannelRow> {
        self.lock().channels.get(community_id).cloned()
    }

    fn upsert_torrent(&mut self, row: TorrentRow) {
        self.lock().torrents.insert(row.storage_id, row);
    }

    fn upsert_playlist(&mut self, row: PlaylistRow) {
        self.lock().playlists.insert(row.storage_id, row);
    }

    fn upsert_comment(&mut self, row: CommentRow) {
        self.lock().comments.insert(row.storage_id, row);
    }

    fn upsert_modification(&mut self, row: ModificationRow) {
        self.lock().modifications.insert(row.storage_id, row);
    }

    fn upsert_playlist_torrent(&mut self, row: PlaylistTorrentRow) {
        self.lock().playlist_torrents.insert(row.storage_id, row);
    }

    fn load_book(&self, member: MemberId) -> Option<BookRow> {
        self.lock().books.get(&member).cloned()
    }

    fn store_book(&mut self, row: BookRow) {
        self.lock().books.insert(row.member, row);
    }

    fn upsert_record(&mut self, row: RecordRow) {
        let key = (row.first_member, row.second_member, row.cycle);
        self.lock().records.insert(key, row);
    }
}
