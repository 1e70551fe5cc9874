use std::time::Duration;

use gossipy::{
    community::{Community, CommunityError, CommunitySpec, Configuration},
    ledger::Book,
    message::Message,
    types::{InfoHash, MemberId, PeerAddress, PublicKeyBytes, SigningKey},
};

use crate::common::{logging::log_with_context, mem_store::MemStore, network::GossipStub};

/// Things the nodes will have in common:
/// - The community founder (and hence the community id).
/// - Their configuration, save for the cycle length.
///
/// Things that they will differ in:
/// - Keypair.
/// - Gossip stub.
/// - Store.
pub(crate) struct Node {
    address: PeerAddress,
    store: MemStore,
    community: Community,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        founder: PublicKeyBytes,
        gossip: GossipStub,
        cycle_size: Duration,
    ) -> Node {
        let store = MemStore::new();
        let address = gossip.address();

        let configuration = Configuration::builder()
            .me(keypair)
            .founder(founder)
            .cycle_size(cycle_size)
            .signature_count(1)
            .slope_length(10)
            .book_cache_size(16)
            .ping_interval(Duration::from_millis(300))
            .ping_timeout(Duration::from_millis(500))
            .signature_timeout(Duration::from_secs(2))
            .delay_timeout(Duration::from_secs(5))
            .log_events(false)
            .build();

        let community = CommunitySpec::builder()
            .store(store.clone())
            .gossip(gossip)
            .configuration(configuration)
            .on_add_to_slope(add_to_slope_handler(address))
            .on_remove_from_slope(remove_from_slope_handler(address))
            .on_receive_record(receive_record_handler(address))
            .build()
            .start();

        Node {
            address,
            store,
            community,
        }
    }

    pub(crate) fn address(&self) -> PeerAddress {
        self.address
    }

    pub(crate) fn store(&self) -> &MemStore {
        &self.store
    }

    pub(crate) fn create_channel(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Message, CommunityError> {
        self.community.create_channel(name, description)
    }

    pub(crate) fn create_torrent(
        &self,
        infohash: InfoHash,
        timestamp: u64,
    ) -> Result<Message, CommunityError> {
        self.community.create_torrent(infohash, timestamp)
    }

    pub(crate) fn report_transfer(&self, public_key: PublicKeyBytes, upload: u64, download: u64) {
        self.community.report_transfer(public_key, upload, download)
    }

    pub(crate) fn try_add_to_slope(&self, candidate: PeerAddress, public_key: PublicKeyBytes) {
        self.community.try_add_to_slope(candidate, public_key)
    }

    pub(crate) fn book(&self, public_key: PublicKeyBytes) -> Book {
        self.community.book(public_key)
    }

    pub(crate) fn slope_members(&self) -> Vec<MemberId> {
        self.community.slope_members()
    }
}

fn add_to_slope_handler(
    address: PeerAddress,
) -> impl Fn(&gossipy::events::AddToSlopeEvent) + Send + 'static {
    move |add_to_slope_event| {
        log_with_context(
            Some(address),
            &format!(
                "Added to slope, member: {}, candidate: {}, score: {}",
                add_to_slope_event.member, add_to_slope_event.candidate, add_to_slope_event.score
            ),
        );
    }
}

fn remove_from_slope_handler(
    address: PeerAddress,
) -> impl Fn(&gossipy::events::RemoveFromSlopeEvent) + Send + 'static {
    move |remove_from_slope_event| {
        log_with_context(
            Some(address),
            &format!("Removed from slope, member: {}", remove_from_slope_event.member),
        );
    }
}

fn receive_record_handler(
    address: PeerAddress,
) -> impl Fn(&gossipy::events::ReceiveRecordEvent) + Send + 'static {
    move |receive_record_event| {
        log_with_context(
            Some(address),
            &format!(
                "Received record, first: {}, second: {}",
                receive_record_event.first, receive_record_event.second
            ),
        );
    }
}
