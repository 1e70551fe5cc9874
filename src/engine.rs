/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The community worker: a single thread that owns all of a community's mutable state and drives
//! the message lifecycle.
//!
//! All state transitions happen on this thread, so no community state is behind a lock. Work
//! arrives through one inbox: message batches from the poller and [commands](Command) from the
//! [Community](crate::community::Community) handle. Between work items the thread sleeps until the
//! earliest pending deadline — the cycle scheduler's next wake, the next due slope probe, the next
//! request-cache timeout, or the next parked-message deadline.
//!
//! The lifecycle of a received message:
//! 1. Authentication gate: the message must carry the authentication variant its kind demands, and
//!    every claimed signature must verify.
//! 2. Check: the kind's check function yields [Accept](CheckOutcome::Accept),
//!    [Drop](CheckOutcome::Drop), or [Delay](CheckOutcome::Delay). The whole batch is checked
//!    before anything is applied.
//! 3. Accepted messages are persisted (synced kinds only), applied, and then forwarded per the
//!    kind's destination policy. Between apply and forward, parked messages waiting for this
//!    message re-enter the pipeline, so a dependency is always fully applied before its dependents
//!    and before it propagates further.

use std::collections::HashSet;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use ed25519_dalek::Signer;

use crate::catalog::{
    kinds, AuthenticationPolicy, Catalog, CatalogError, DestinationPolicy, DistributionPolicy,
    MessageKind,
};
use crate::community::Configuration;
use crate::events::*;
use crate::gossip::Gossip;
use crate::handlers;
use crate::ledger::{current_cycle, cycle_position, Book, BookCache, CyclePhase, Slope};
use crate::ledger::AdmitOutcome;
use crate::message::{CheckOutcome, Message, MessageAuthentication};
use crate::payload::{
    BarterRecordPayload, InvalidPayload, Payload, PingPayload, ProposedRecord,
    SignatureRequestPayload,
};
use crate::request_cache::{CacheEntry, PingCache, RequestCache, SignatureCache};
use crate::resolver::DependencyResolver;
use crate::storage::Store;
use crate::types::{
    community_id_from_founder, CommunityId, GlobalTime, Member, MemberId, PeerAddress,
    PublicKeyBytes, SigningKey, StorageId,
};

/// A unit of work on the community worker's inbox.
pub(crate) enum WorkItem {
    /// A batch of consecutive messages of one kind from one origin.
    Batch {
        kind: String,
        origin: Option<PeerAddress>,
        messages: Vec<Message>,
    },
    Command(Command),
}

/// A call from the [Community](crate::community::Community) handle, hopping onto the worker thread.
pub(crate) enum Command {
    Create {
        payload: Payload,
        reply: Sender<Result<Message, CommunityError>>,
    },
    CreateBatch {
        payloads: Vec<Payload>,
        reply: Sender<Result<Vec<Message>, CommunityError>>,
    },
    ReportTransfer {
        public_key: PublicKeyBytes,
        upload: u64,
        download: u64,
    },
    TryAddToSlope {
        candidate: PeerAddress,
        public_key: PublicKeyBytes,
    },
    QueryBook {
        public_key: PublicKeyBytes,
        reply: Sender<Book>,
    },
    QuerySlope {
        reply: Sender<Vec<MemberId>>,
    },
}

/// Why a locally created message was refused.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CommunityError {
    InvalidPayload(InvalidPayload),
    /// The payload references the community's channel, but no channel has been applied yet.
    MissingChannel,
    /// The kind's resolution policy reserves authorship to the founder.
    NotAuthorized,
}

impl From<InvalidPayload> for CommunityError {
    fn from(invalid: InvalidPayload) -> CommunityError {
        CommunityError::InvalidPayload(invalid)
    }
}

fn requires_channel(kind: &str) -> bool {
    matches!(
        kind,
        kinds::TORRENT
            | kinds::PLAYLIST
            | kinds::COMMENT
            | kinds::MODIFICATION
            | kinds::PLAYLIST_TORRENT
    )
}

fn authentication_matches(
    policy: AuthenticationPolicy,
    authentication: &MessageAuthentication,
) -> bool {
    matches!(
        (policy, authentication),
        (AuthenticationPolicy::None, MessageAuthentication::None)
            | (
                AuthenticationPolicy::SingleMember,
                MessageAuthentication::Single { .. }
            )
            | (
                AuthenticationPolicy::DoubleMember,
                MessageAuthentication::Double { .. }
            )
    )
}

pub(crate) struct CommunityWorker<S: Store, G: Gossip> {
    pub(crate) community_id: CommunityId,
    pub(crate) keypair: SigningKey,
    pub(crate) my_public_key: PublicKeyBytes,
    pub(crate) my_member: Member,
    pub(crate) founder: PublicKeyBytes,

    pub(crate) catalog: Catalog<S, G>,
    pub(crate) store: S,
    pub(crate) gossip: G,

    pub(crate) global_time: GlobalTime,
    pub(crate) channel_id: Option<StorageId>,
    pub(crate) books: BookCache,
    pub(crate) slope: Slope,
    pub(crate) winners: HashSet<MemberId>,
    pub(crate) resolver: DependencyResolver,
    pub(crate) request_cache: RequestCache,

    cycle_size: Duration,
    signature_count: usize,
    ping_interval: Duration,
    ping_timeout: Duration,
    signature_timeout: Duration,

    phase: CyclePhase,
    next_cycle_wake: Instant,

    inbox: Receiver<WorkItem>,
    shutdown: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<S: Store, G: Gossip> CommunityWorker<S, G> {
    pub(crate) fn new(
        configuration: Configuration,
        mut store: S,
        gossip: G,
        inbox: Receiver<WorkItem>,
        shutdown: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> CommunityWorker<S, G> {
        let community_id = community_id_from_founder(&configuration.founder);
        let my_public_key = configuration.me.verifying_key().to_bytes();
        let my_member = Member {
            id: store.member_id(&my_public_key),
            public_key: my_public_key,
        };
        let global_time = store.load_global_time(&community_id);
        let channel_id = store.channel(&community_id).map(|row| row.storage_id);

        CommunityWorker {
            community_id,
            keypair: configuration.me,
            my_public_key,
            my_member,
            founder: configuration.founder,
            catalog: handlers::initiate_catalog(),
            store,
            gossip,
            global_time,
            channel_id,
            books: BookCache::new(configuration.book_cache_size),
            slope: Slope::new(configuration.slope_length),
            winners: HashSet::new(),
            resolver: DependencyResolver::new(configuration.delay_timeout),
            request_cache: RequestCache::new(),
            cycle_size: configuration.cycle_size,
            signature_count: configuration.signature_count,
            ping_interval: configuration.ping_interval,
            ping_timeout: configuration.ping_timeout,
            signature_timeout: configuration.signature_timeout,
            phase: CyclePhase::Idle,
            next_cycle_wake: Instant::now(),
            inbox,
            shutdown,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(&mut self) {
        loop {
            match self.shutdown.try_recv() {
                Ok(()) => {
                    self.flush();
                    return;
                }
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Worker thread disconnected from main thread")
                }
            }

            let now = Instant::now();
            // Cap the sleep so a shutdown signal is noticed promptly even when no deadline is
            // near.
            let timeout = self
                .next_deadline()
                .saturating_duration_since(now)
                .min(Duration::from_millis(100));
            match self.inbox.recv_timeout(timeout) {
                Ok(WorkItem::Batch {
                    kind,
                    origin,
                    messages,
                }) => self.process_batch(&kind, origin, messages),
                Ok(WorkItem::Command(command)) => self.handle_command(command),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    panic!("Worker thread disconnected from main thread")
                }
            }

            self.fire_due_timers(Instant::now());
        }
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = self.next_cycle_wake;
        if let Some(probe) = self.slope.next_probe_deadline() {
            deadline = deadline.min(probe);
        }
        if let Some(cache) = self.request_cache.next_deadline() {
            deadline = deadline.min(cache);
        }
        if let Some(delay) = self.resolver.next_deadline() {
            deadline = deadline.min(delay);
        }
        deadline
    }

    fn fire_due_timers(&mut self, now: Instant) {
        if now >= self.next_cycle_wake {
            self.cycle_tick(now);
        }

        for member in self.slope.due_probes(now) {
            self.send_ping(member, now);
        }

        for (identifier, entry) in self.request_cache.expired(now) {
            match entry {
                CacheEntry::Ping(ping) => {
                    log::debug!("PingTimeout, {}, {}", identifier, ping.member.id);
                    self.remove_from_slope(ping.member.id);
                }
                CacheEntry::Signature(signature) => {
                    log::debug!("SignatureTimeout, {}, {}", identifier, signature.second.id);
                    self.remove_from_slope(signature.second.id);
                }
            }
        }

        for pending in self.resolver.expired(now) {
            self.publish(Event::DelayTimeout(DelayTimeoutEvent {
                timestamp: SystemTime::now(),
                message: pending.message,
            }));
        }
    }

    // == The reputation cycle scheduler ==

    fn cycle_tick(&mut self, now: Instant) {
        let cycle_secs = self.cycle_size.as_secs_f64();
        let (cycle, position) = cycle_position(self.cycle_size);
        let position = position.as_secs_f64();
        let create_start = 0.5 * cycle_secs;
        let idle_start = 0.9 * cycle_secs;

        if position < create_start {
            self.set_phase(cycle, CyclePhase::Climbing);
            self.next_cycle_wake = now + Duration::from_secs_f64(create_start - position);
        } else if position < idle_start && self.winners.len() < self.signature_count {
            self.set_phase(cycle, CyclePhase::Creating);
            self.pick_winner(now);
            self.next_cycle_wake =
                now + Duration::from_secs_f64(0.4 * cycle_secs / self.signature_count as f64);
        } else {
            self.set_phase(cycle, CyclePhase::Idle);
            let cleared = self.slope.clear();
            if cleared > 0 {
                log::debug!("ClearSlope, {}", cleared);
            }
            self.winners.clear();
            self.next_cycle_wake =
                now + Duration::from_secs_f64((cycle_secs - position).max(0.0));
        }
    }

    fn set_phase(&mut self, cycle: u64, phase: CyclePhase) {
        if self.phase != phase {
            self.phase = phase;
            self.publish(Event::StartCyclePhase(StartCyclePhaseEvent {
                timestamp: SystemTime::now(),
                cycle,
                phase,
            }));
        }
    }

    /// Picks the highest-scored slope member that has not won this cycle yet, and initiates a
    /// signature exchange with it.
    fn pick_winner(&mut self, now: Instant) {
        let candidates: Vec<Member> = self
            .slope
            .entries()
            .filter(|entry| !self.winners.contains(&entry.member.id))
            .map(|entry| entry.member)
            .collect();

        let mut best: Option<(Member, i64)> = None;
        for member in candidates {
            let score = self.book_mut(member).score();
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((member, score));
            }
        }

        if let Some((winner, _)) = best {
            self.winners.insert(winner.id);
            let candidate = match self.slope.get_mut(winner.id) {
                Some(entry) => {
                    // Pause probing while the exchange is in flight.
                    entry.next_probe = now + self.cycle_size;
                    entry.candidate
                }
                None => return,
            };
            self.initiate_exchange(winner, candidate, now);
        }
    }

    /// Builds a half-signed record from our book for `member` and sends it to the member's
    /// candidate address for counter-signing.
    fn initiate_exchange(&mut self, member: Member, candidate: PeerAddress, now: Instant) {
        let book = self.book_mut(member).clone();
        let wall_secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock before the Unix Epoch")
            .as_secs();
        let record = BarterRecordPayload {
            cycle: book.cycle,
            effort: book.effort,
            upload_first_to_second: book.download,
            upload_second_to_first: book.upload,
            first_timestamp: wall_secs,
            second_timestamp: 0,
            first_upload: book.download,
            first_download: book.upload,
            second_upload: 0,
            second_download: 0,
        };
        let global_time = self.claim_global_time();
        let mut proposed = ProposedRecord {
            first: self.my_public_key,
            second: member.public_key,
            global_time,
            record,
            first_signature: [0u8; 64],
            second_signature: None,
        };
        let signable = proposed.signable_bytes(&self.community_id);
        proposed.first_signature = self.keypair.sign(&signable).to_bytes();

        let identifier = self.request_cache.claim(
            CacheEntry::Signature(SignatureCache {
                candidate,
                second: member,
                record: proposed.clone(),
            }),
            self.signature_timeout,
            now,
        );
        let payload = Payload::SignatureRequest(SignatureRequestPayload {
            identifier,
            record: proposed,
        });
        let message = Message::new(self.community_id, self.global_time, payload);
        let kind = self
            .catalog
            .lookup(kinds::SIGNATURE_REQUEST)
            .expect("signature-request is registered at startup");
        self.store_update_forward(&kind, message, Some(candidate), false, false, true);

        self.publish(Event::RequestSignature(RequestSignatureEvent {
            timestamp: SystemTime::now(),
            second: member.id,
            candidate,
            identifier,
            global_time,
        }));
    }

    fn send_ping(&mut self, member: MemberId, now: Instant) {
        let (member, candidate) = match self.slope.get_mut(member) {
            Some(entry) => {
                entry.next_probe = now + self.ping_interval;
                (entry.member, entry.candidate)
            }
            None => return,
        };
        let identifier = self.request_cache.claim(
            CacheEntry::Ping(PingCache { candidate, member }),
            self.ping_timeout,
            now,
        );
        let payload = Payload::Ping(PingPayload {
            identifier,
            member: self.my_public_key,
        });
        let message = Message::new(self.community_id, self.global_time, payload);
        let kind = self
            .catalog
            .lookup(kinds::PING)
            .expect("ping is registered at startup");
        self.store_update_forward(&kind, message, Some(candidate), false, false, true);

        self.publish(Event::Ping(PingEvent {
            timestamp: SystemTime::now(),
            member: member.public_key,
            candidate,
            identifier,
        }));
    }

    // == The message pipeline ==

    fn process_batch(
        &mut self,
        kind_name: &str,
        origin: Option<PeerAddress>,
        messages: Vec<Message>,
    ) {
        let kind = match self.catalog.lookup(kind_name) {
            Ok(kind) => kind,
            Err(CatalogError::UnknownKind(name)) => {
                log::debug!("UnknownKind, {}", name);
                return;
            }
        };

        let mut authenticated = Vec::with_capacity(messages.len());
        for message in messages {
            if !authentication_matches(kind.authentication, &message.authentication)
                || !message.is_correctly_signed()
            {
                self.publish(Event::DropMessage(DropMessageEvent {
                    timestamp: SystemTime::now(),
                    message,
                    reason: "authentication",
                }));
                continue;
            }
            // Receiving a message advances the local logical clock.
            if message.global_time > self.global_time {
                self.global_time = message.global_time;
            }
            authenticated.push(message);
        }

        // The whole batch is checked before anything is applied.
        let outcomes: Vec<CheckOutcome> = authenticated
            .iter()
            .map(|message| (kind.check)(self, message))
            .collect();

        let now = Instant::now();
        for (message, outcome) in authenticated.into_iter().zip(outcomes) {
            match outcome {
                CheckOutcome::Drop(reason) => {
                    self.publish(Event::DropMessage(DropMessageEvent {
                        timestamp: SystemTime::now(),
                        message,
                        reason,
                    }));
                }
                CheckOutcome::Delay(delay) => {
                    if let Some(peer) = origin {
                        let request =
                            Message::new(self.community_id, self.global_time, delay.request);
                        self.gossip.send(peer, request.encode());
                    }
                    self.publish(Event::DelayMessage(DelayMessageEvent {
                        timestamp: SystemTime::now(),
                        message: message.clone(),
                        awaited_kind: delay.footprint.kind,
                    }));
                    self.resolver.park(message, origin, delay.footprint, now);
                }
                CheckOutcome::Accept => {
                    let forward =
                        matches!(kind.destination, DestinationPolicy::Community { .. });
                    self.store_update_forward(&kind, message, origin, true, true, forward);
                }
            }
        }
    }

    /// Runs a checked message through the tail of the pipeline. `peer` is the origin for inbound
    /// messages and the destination for outbound direct messages; community-destined forwards
    /// ignore it.
    pub(crate) fn store_update_forward(
        &mut self,
        kind: &MessageKind<S, G>,
        mut message: Message,
        peer: Option<PeerAddress>,
        store: bool,
        update: bool,
        forward: bool,
    ) -> Message {
        if store && kind.distribution.is_synced() {
            let encoded = message.encode();
            let storage_id = self.store.persist_message(&message, &encoded);
            message.storage_id = Some(storage_id);
            self.publish(Event::StoreMessage(StoreMessageEvent {
                timestamp: SystemTime::now(),
                message: message.clone(),
            }));
        }

        if update {
            if let Err(error) = (kind.apply)(self, &message, peer) {
                log::warn!(
                    "ApplyFailure, {}, {}, {:?}",
                    message.kind,
                    message.global_time,
                    error
                );
                return message;
            }

            if let DistributionPolicy::LastSync { history_size, .. } = kind.distribution {
                if let Some(signer) = message.signer() {
                    let signer_id = self.store.member_id(&signer);
                    let pruned = self.store.prune_last_sync(kind.name, signer_id, history_size);
                    if !pruned.is_empty() {
                        log::debug!("PruneLastSync, {}, {}", kind.name, pruned.len());
                    }
                }
            }

            // Messages parked on this one re-enter the pipeline now, before the message is
            // forwarded, so dependents never overtake their dependency.
            let released = self.resolver.release_matching(&message);
            for pending in released {
                self.publish(Event::ResumeMessage(ResumeMessageEvent {
                    timestamp: SystemTime::now(),
                    message: pending.message.clone(),
                }));
                let kind_name = pending.message.kind.clone();
                self.process_batch(&kind_name, pending.origin, vec![pending.message]);
            }
        }

        if forward {
            match kind.destination {
                DestinationPolicy::Community { node_count } => {
                    self.gossip.broadcast(node_count, message.encode());
                    self.publish(Event::ForwardMessage(ForwardMessageEvent {
                        timestamp: SystemTime::now(),
                        message: message.clone(),
                    }));
                }
                DestinationPolicy::Address | DestinationPolicy::Candidate => {
                    if let Some(peer) = peer {
                        self.gossip.send(peer, message.encode());
                        self.publish(Event::ForwardMessage(ForwardMessageEvent {
                            timestamp: SystemTime::now(),
                            message: message.clone(),
                        }));
                    }
                }
            }
        }

        message
    }

    // == Commands from the handle ==

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create { payload, reply } => {
                let result = self.create(payload);
                let _ = reply.send(result);
            }
            Command::CreateBatch { payloads, reply } => {
                let result = payloads
                    .into_iter()
                    .map(|payload| self.create(payload))
                    .collect();
                let _ = reply.send(result);
            }
            Command::ReportTransfer {
                public_key,
                upload,
                download,
            } => {
                let member = self.member(&public_key);
                let book = self.book_mut(member);
                book.upload += upload;
                book.download += download;
            }
            Command::TryAddToSlope {
                candidate,
                public_key,
            } => self.try_add_to_slope(candidate, public_key),
            Command::QueryBook { public_key, reply } => {
                let member = self.member(&public_key);
                let book = self.book_mut(member).clone();
                let _ = reply.send(book);
            }
            Command::QuerySlope { reply } => {
                let _ = reply.send(self.slope.members());
            }
        }
    }

    fn create(&mut self, payload: Payload) -> Result<Message, CommunityError> {
        let kind = self
            .catalog
            .lookup(payload.kind())
            .expect("all creatable kinds are registered at startup");
        if matches!(kind.resolution, crate::catalog::ResolutionPolicy::Linear)
            && self.my_public_key != self.founder
        {
            return Err(CommunityError::NotAuthorized);
        }
        if requires_channel(kind.name) && self.channel_id.is_none() {
            return Err(CommunityError::MissingChannel);
        }

        let global_time = self.claim_global_time();
        let mut message = Message::new(self.community_id, global_time, payload);
        if let AuthenticationPolicy::SingleMember = kind.authentication {
            message.sign_single(&self.keypair);
        }
        let forward = matches!(kind.destination, DestinationPolicy::Community { .. });
        Ok(self.store_update_forward(&kind, message, None, true, true, forward))
    }

    // == State helpers shared with the per-kind handlers ==

    pub(crate) fn claim_global_time(&mut self) -> GlobalTime {
        self.global_time += 1;
        self.store
            .store_global_time(&self.community_id, self.global_time);
        self.global_time
    }

    pub(crate) fn member(&mut self, public_key: &PublicKeyBytes) -> Member {
        Member {
            id: self.store.member_id(public_key),
            public_key: *public_key,
        }
    }

    /// The book for `member`, pulled into the cache if absent. Eviction flushes the displaced
    /// book to the Store.
    pub(crate) fn book_mut(&mut self, member: Member) -> &mut Book {
        if !self.books.contains(member.id) {
            let book = match self.store.load_book(member.id) {
                Some(row) => Book::from_row(member, row),
                None => Book::new(member, current_cycle(self.cycle_size)),
            };
            if let Some(evicted) = self.books.insert(book) {
                self.store.store_book(evicted.to_row());
            }
        }
        self.books
            .get_mut(member.id)
            .expect("book was inserted above")
    }

    /// Credits `member` with being online in the current cycle.
    pub(crate) fn mark_contact(&mut self, member: Member) {
        let cycle = current_cycle(self.cycle_size);
        let book = self.book_mut(member);
        book.effort.promote(cycle);
        if book.cycle < cycle {
            book.cycle = cycle;
        }
    }

    pub(crate) fn remove_from_slope(&mut self, member: MemberId) {
        if self.slope.remove(member).is_some() {
            self.publish(Event::RemoveFromSlope(RemoveFromSlopeEvent {
                timestamp: SystemTime::now(),
                member,
            }));
        }
    }

    fn try_add_to_slope(&mut self, candidate: PeerAddress, public_key: PublicKeyBytes) {
        let member = self.member(&public_key);
        if member.public_key == self.my_public_key || self.slope.contains(member.id) {
            return;
        }
        let score = self.book_mut(member).score();
        let occupants: Vec<Member> = self.slope.entries().map(|entry| entry.member).collect();
        let occupant_scores: Vec<(MemberId, i64)> = occupants
            .into_iter()
            .map(|occupant| (occupant.id, self.book_mut(occupant).score()))
            .collect();
        let next_probe = Instant::now() + self.ping_interval;

        match self
            .slope
            .try_admit(member, candidate, score, &occupant_scores, next_probe)
        {
            AdmitOutcome::Admitted { evicted } => {
                if let Some(evicted) = evicted {
                    self.publish(Event::RemoveFromSlope(RemoveFromSlopeEvent {
                        timestamp: SystemTime::now(),
                        member: evicted,
                    }));
                }
                self.publish(Event::AddToSlope(AddToSlopeEvent {
                    timestamp: SystemTime::now(),
                    member: member.id,
                    candidate,
                    score,
                }));
            }
            AdmitOutcome::Rejected => (),
        }
    }

    pub(crate) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    fn flush(&mut self) {
        for book in self.books.drain() {
            self.store.store_book(book.to_row());
        }
        self.store
            .store_global_time(&self.community_id, self.global_time);
    }
}
