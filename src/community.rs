/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and interact with a community.
//!
//! A community is a group of peers gossiping typed messages with each other, identified by the
//! public key of its founder. Each running community owns three background threads: a poller that
//! drains the [Gossip](crate::gossip::Gossip) provider, the worker that owns all community state,
//! and (if any event handlers are registered) an event bus.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the community](CommunitySpec):
//!   1. `CommunitySpec::builder` to construct a `CommunitySpecBuilder`,
//!   2. The setters of the `CommunitySpecBuilder`, and
//!   3. The `CommunitySpecBuilder::build` method to construct a [CommunitySpec],
//! - The function to [start](CommunitySpec::start) a [Community] given its specification,
//! - [The type](Community) which keeps the community alive, and through which messages are created.
//!
//! ## Starting a community
//!
//! Here is an example that demonstrates how to build and start a community using the builder
//! pattern:
//!
//! ```ignore
//! let community =
//!     CommunitySpec::builder()
//!     .store(store)
//!     .gossip(gossip)
//!     .configuration(configuration)
//!     .on_store_message(store_handler)
//!     .on_receive_record(record_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a community:
//! - `.store(...)`
//! - `.gossip(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_store_message(...)`
//! - `.on_forward_message(...)`
//! - `.on_drop_message(...)`
//! - `.on_delay_message(...)`
//! - `.on_resume_message(...)`
//! - `.on_delay_timeout(...)`
//! - `.on_start_cycle_phase(...)`
//! - `.on_add_to_slope(...)`
//! - `.on_remove_from_slope(...)`
//! - `.on_request_signature(...)`
//! - `.on_receive_record(...)`
//! - `.on_ping(...)`
//! - `.on_pong(...)`
//!
//! The community's [configuration](Configuration) can also be defined using the builder pattern,
//! for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(keypair)
//!     .founder(founder_public_key)
//!     .cycle_size(Duration::from_secs(300))
//!     .signature_count(5)
//!     .slope_length(10)
//!     .book_cache_size(512)
//!     .ping_interval(Duration::from_secs(50))
//!     .ping_timeout(Duration::from_secs(10))
//!     .signature_timeout(Duration::from_secs(10))
//!     .delay_timeout(Duration::from_secs(10))
//!     .log_events(true)
//!     .build()
//! ```

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::engine::{Command, CommunityWorker, WorkItem};
use crate::event_bus::*;
use crate::events::*;
use crate::gossip::{start_polling, Gossip};
use crate::ledger::Book;
use crate::message::Message;
use crate::payload::{
    ChannelPayload, CommentPayload, ModificationPayload, Payload, PlaylistPayload,
    PlaylistTorrentPayload, TorrentPayload,
};
use crate::storage::Store;
use crate::types::{
    community_id_from_founder, CommunityId, InfoHash, MemberId, PeerAddress, PublicKeyBytes,
    StorageId,
};

pub use crate::engine::CommunityError;

/// Stores the user-defined parameters required to start a community, that is:
/// 1. The local member's [keypair](ed25519_dalek::SigningKey).
/// 2. The founder's public key, from which the community id is derived.
/// 3. The reputation cycle length, and the number of signature exchanges attempted per cycle.
/// 4. The slope length (how many candidates are lined up for exchanges at once) and the book
///    cache size (how many reputation books are kept in memory).
/// 5. The ping interval and timeout for probing slope candidates, the signature exchange timeout,
///    and how long a message missing a dependency is parked before it is dropped.
/// 6. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// Gossipy logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.founder(...)`
    - `.cycle_size(...)`
    - `.signature_count(...)`
    - `.slope_length(...)`
    - `.book_cache_size(...)`
    - `.ping_interval(...)`
    - `.ping_timeout(...)`
    - `.signature_timeout(...)`
    - `.delay_timeout(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the local member's keypair, used to sign messages. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the community founder's public key. The community id is derived from it. Required."))]
    pub founder: PublicKeyBytes,
    #[builder(setter(doc = "Set the length of one reputation cycle. Required."))]
    pub cycle_size: Duration,
    #[builder(setter(doc = "Set the number of signature exchanges attempted per cycle. Required."))]
    pub signature_count: usize,
    #[builder(setter(doc = "Set the maximum number of candidates on the slope. Required."))]
    pub slope_length: usize,
    #[builder(setter(doc = "Set the maximum number of reputation books held in memory. Required."))]
    pub book_cache_size: usize,
    #[builder(setter(doc = "Set the interval between liveness probes of a slope candidate. Required."))]
    pub ping_interval: Duration,
    #[builder(setter(doc = "Set how long to wait for a pong before a candidate is removed from the slope. Required."))]
    pub ping_timeout: Duration,
    #[builder(setter(doc = "Set how long to wait for a signature response before the exchange is abandoned. Required."))]
    pub signature_timeout: Duration,
    #[builder(setter(doc = "Set how long a message waiting for a dependency is parked before it is dropped. Required."))]
    pub delay_timeout: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run a [Community].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [CommunitySpec]. On the builder call the following methods to construct a valid [CommunitySpec].

    Required:
    - `.store(...)`
    - `.gossip(...)`
    - `.configuration(...)`

    Optional:
    - `.on_store_message(...)`
    - `.on_forward_message(...)`
    - `.on_drop_message(...)`
    - `.on_delay_message(...)`
    - `.on_resume_message(...)`
    - `.on_delay_timeout(...)`
    - `.on_start_cycle_phase(...)`
    - `.on_add_to_slope(...)`
    - `.on_remove_from_slope(...)`
    - `.on_request_signature(...)`
    - `.on_receive_record(...)`
    - `.on_ping(...)`
    - `.on_pong(...)`
"))]
pub struct CommunitySpec<S: Store, G: Gossip> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of the community's persistence. The argument must implement the [Store](crate::storage::Store) trait. Required."))]
    store: S,
    #[builder(setter(doc = "Set the implementation of the gossip transport. The argument must implement the [Gossip](crate::gossip::Gossip) trait. Required."))]
    gossip: G,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a community. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StoreMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StoreMessageEvent>),
    doc = "Register a handler closure to be invoked after a message is persisted. Optional."))]
    on_store_message: Option<HandlerPtr<StoreMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ForwardMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ForwardMessageEvent>),
    doc = "Register a handler closure to be invoked after a message is forwarded to peers. Optional."))]
    on_forward_message: Option<HandlerPtr<ForwardMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DropMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DropMessageEvent>),
    doc = "Register a handler closure to be invoked after a message is dropped. Optional."))]
    on_drop_message: Option<HandlerPtr<DropMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DelayMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DelayMessageEvent>),
    doc = "Register a handler closure to be invoked after a message is parked waiting for a dependency. Optional."))]
    on_delay_message: Option<HandlerPtr<DelayMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ResumeMessageEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ResumeMessageEvent>),
    doc = "Register a handler closure to be invoked after a parked message re-enters the pipeline. Optional."))]
    on_resume_message: Option<HandlerPtr<ResumeMessageEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DelayTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DelayTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a parked message is dropped because its dependency never arrived. Optional."))]
    on_delay_timeout: Option<HandlerPtr<DelayTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartCyclePhaseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartCyclePhaseEvent>),
    doc = "Register a handler closure to be invoked when the reputation cycle enters a new phase. Optional."))]
    on_start_cycle_phase: Option<HandlerPtr<StartCyclePhaseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AddToSlopeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AddToSlopeEvent>),
    doc = "Register a handler closure to be invoked after a candidate is admitted to the slope. Optional."))]
    on_add_to_slope: Option<HandlerPtr<AddToSlopeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RemoveFromSlopeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RemoveFromSlopeEvent>),
    doc = "Register a handler closure to be invoked after a member leaves the slope. Optional."))]
    on_remove_from_slope: Option<HandlerPtr<RemoveFromSlopeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RequestSignatureEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RequestSignatureEvent>),
    doc = "Register a handler closure to be invoked after a signature exchange is initiated. Optional."))]
    on_request_signature: Option<HandlerPtr<RequestSignatureEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveRecordEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveRecordEvent>),
    doc = "Register a handler closure to be invoked after a double-signed barter record is applied. Optional."))]
    on_receive_record: Option<HandlerPtr<ReceiveRecordEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PingEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PingEvent>),
    doc = "Register a handler closure to be invoked after a liveness probe is sent. Optional."))]
    on_ping: Option<HandlerPtr<PingEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PongEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PongEvent>),
    doc = "Register a handler closure to be invoked after a liveness probe is answered. Optional."))]
    on_pong: Option<HandlerPtr<PongEvent>>,
}

impl<S: Store, G: Gossip> CommunitySpec<S, G> {
    /// Starts all threads and channels associated with running a community, and returns the
    /// handles to them in a [Community] struct.
    pub fn start(self) -> Community {
        let community_id = community_id_from_founder(&self.configuration.founder);
        let log_events = self.configuration.log_events;

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_store_message,
            self.on_forward_message,
            self.on_drop_message,
            self.on_delay_message,
            self.on_resume_message,
            self.on_delay_timeout,
            self.on_start_cycle_phase,
            self.on_add_to_slope,
            self.on_remove_from_slope,
            self.on_request_signature,
            self.on_receive_record,
            self.on_ping,
            self.on_pong,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (inbox_sender, inbox_receiver) = mpsc::channel();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(
            self.gossip.clone(),
            community_id,
            inbox_sender.clone(),
            poller_shutdown_receiver,
        );

        let (worker_shutdown, worker_shutdown_receiver) = mpsc::channel();
        let worker = CommunityWorker::new(
            self.configuration,
            self.store,
            self.gossip,
            inbox_receiver,
            worker_shutdown_receiver,
            event_publisher,
        )
        .start();

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let event_bus = if !event_handlers.is_empty() {
            Some(start_event_bus(
                event_handlers,
                event_subscriber.unwrap(), // Safety: should be Some(...).
                event_bus_shutdown_receiver.unwrap(), // Safety: should be Some(...).
            ))
        } else {
            None
        };

        Community {
            community_id,
            inbox: inbox_sender,
            worker: Some(worker),
            worker_shutdown,
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a running community. When this value is dropped, all
/// background threads are gracefully shut down and cached community state is flushed to the Store.
pub struct Community {
    community_id: CommunityId,
    inbox: Sender<WorkItem>,
    worker: Option<JoinHandle<()>>,
    worker_shutdown: Sender<()>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Community {
    pub fn community_id(&self) -> CommunityId {
        self.community_id
    }

    /// Defines the community's channel. Only the founder can do this.
    pub fn create_channel(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Message, CommunityError> {
        let payload = Payload::Channel(ChannelPayload::new(name, description)?);
        self.create(payload)
    }

    pub fn create_torrent(
        &self,
        infohash: InfoHash,
        timestamp: u64,
    ) -> Result<Message, CommunityError> {
        self.create(Payload::Torrent(TorrentPayload::new(infohash, timestamp)))
    }

    /// Announces a batch of torrents in one go. The messages share one trip through the worker,
    /// but each claims its own global time.
    pub fn create_torrents(
        &self,
        torrents: Vec<(InfoHash, u64)>,
    ) -> Result<Vec<Message>, CommunityError> {
        let payloads = torrents
            .into_iter()
            .map(|(infohash, timestamp)| Payload::Torrent(TorrentPayload::new(infohash, timestamp)))
            .collect();
        self.create_batch(payloads)
    }

    pub fn create_playlist(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Message, CommunityError> {
        let payload = Payload::Playlist(PlaylistPayload::new(name, description)?);
        self.create(payload)
    }

    pub fn create_comment(
        &self,
        text: &str,
        timestamp: u64,
        reply_to: Option<StorageId>,
        reply_after: Option<StorageId>,
        playlist: Option<StorageId>,
        infohash: Option<InfoHash>,
    ) -> Result<Message, CommunityError> {
        let payload = Payload::Comment(CommentPayload::new(
            text,
            timestamp,
            reply_to,
            reply_after,
            playlist,
            infohash,
        )?);
        self.create(payload)
    }

    pub fn create_modification(
        &self,
        entries: BTreeMap<String, String>,
        modification_on: StorageId,
        latest_modification: Option<StorageId>,
    ) -> Result<Message, CommunityError> {
        let payload = Payload::Modification(ModificationPayload::new(
            entries,
            modification_on,
            latest_modification,
        ));
        self.create(payload)
    }

    pub fn create_playlist_torrents(
        &self,
        playlist: StorageId,
        infohashes: Vec<InfoHash>,
    ) -> Result<Vec<Message>, CommunityError> {
        let payloads = infohashes
            .into_iter()
            .map(|infohash| {
                Payload::PlaylistTorrent(PlaylistTorrentPayload::new(infohash, playlist))
            })
            .collect();
        self.create_batch(payloads)
    }

    /// Credits traffic exchanged with a peer to its reputation book. Called by the transport
    /// layer's bandwidth accounting.
    pub fn report_transfer(&self, public_key: PublicKeyBytes, upload: u64, download: u64) {
        self.send_command(Command::ReportTransfer {
            public_key,
            upload,
            download,
        });
    }

    /// Offers a peer as a candidate for this cycle's signature exchanges. Admission requires a
    /// positive score and room on the slope (or a weaker occupant).
    pub fn try_add_to_slope(&self, candidate: PeerAddress, public_key: PublicKeyBytes) {
        self.send_command(Command::TryAddToSlope {
            candidate,
            public_key,
        });
    }

    /// A snapshot of the reputation book for a peer.
    pub fn book(&self, public_key: PublicKeyBytes) -> Book {
        let (reply, receiver) = mpsc::channel();
        self.send_command(Command::QueryBook { public_key, reply });
        receiver.recv().expect("community worker has shut down")
    }

    /// The member ids currently on the slope.
    pub fn slope_members(&self) -> Vec<MemberId> {
        let (reply, receiver) = mpsc::channel();
        self.send_command(Command::QuerySlope { reply });
        receiver.recv().expect("community worker has shut down")
    }

    fn create(&self, payload: Payload) -> Result<Message, CommunityError> {
        let (reply, receiver) = mpsc::channel();
        self.send_command(Command::Create { payload, reply });
        receiver.recv().expect("community worker has shut down")
    }

    fn create_batch(&self, payloads: Vec<Payload>) -> Result<Vec<Message>, CommunityError> {
        let (reply, receiver) = mpsc::channel();
        self.send_command(Command::CreateBatch { payloads, reply });
        receiver.recv().expect("community worker has shut down")
    }

    fn send_command(&self, command: Command) {
        self.inbox
            .send(WorkItem::Command(command))
            .expect("community worker has shut down")
    }
}

impl Drop for Community {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important. The worker flushes
        // its cached books while the event bus and poller are still alive, so its final events and
        // the poller's inbox sends have somewhere to go.

        self.worker_shutdown.send(()).unwrap();
        self.worker.take().unwrap().join().unwrap();

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap());
        if self.event_bus.is_some() {
            self.event_bus.take().unwrap().join().unwrap();
        }

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();
    }
}
