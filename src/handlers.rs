/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-kind check and apply functions, and the catalog registration table that ties them to
//! their policies.
//!
//! Check functions run read-only against the worker and may not touch state; apply functions run
//! after a message is persisted and own its side effects. Both are plain function pointers stored
//! in the [catalog](crate::catalog::Catalog).

use std::time::SystemTime;

use ed25519_dalek::Signer;

use crate::catalog::{
    kinds, AuthenticationPolicy, Catalog, DestinationPolicy, DistributionPolicy, MessageKind,
    ResolutionPolicy, SyncDirection,
};
use crate::engine::CommunityWorker;
use crate::events::{Event, PongEvent, ReceiveRecordEvent};
use crate::gossip::Gossip;
use crate::ledger::{merge_proposed_record, RecordRow};
use crate::message::{
    verify, ApplyError, CheckOutcome, Delay, Filter, Footprint, Message, MessageAuthentication,
};
use crate::payload::{
    MissingChannelPayload, Payload, PongPayload, SignatureResponsePayload,
};
use crate::request_cache::{CacheEntry, CacheEntryKind};
use crate::storage::{
    ChannelRow, CommentRow, ModificationRow, PlaylistRow, PlaylistTorrentRow, TorrentRow,
};
use crate::types::PeerAddress;

pub(crate) fn initiate_catalog<S: crate::storage::Store, G: Gossip>() -> Catalog<S, G> {
    let mut catalog = Catalog::new();
    catalog.register(MessageKind {
        name: kinds::CHANNEL,
        authentication: AuthenticationPolicy::SingleMember,
        resolution: ResolutionPolicy::Linear,
        distribution: DistributionPolicy::FullSync {
            direction: SyncDirection::Descending,
        },
        destination: DestinationPolicy::Community { node_count: 10 },
        check: check_channel,
        apply: apply_channel,
    });
    catalog.register(MessageKind {
        name: kinds::TORRENT,
        authentication: AuthenticationPolicy::SingleMember,
        resolution: ResolutionPolicy::Linear,
        distribution: DistributionPolicy::FullSync {
            direction: SyncDirection::Random,
        },
        destination: DestinationPolicy::Community { node_count: 10 },
        check: check_torrent,
        apply: apply_torrent,
    });
    catalog.register(MessageKind {
        name: kinds::PLAYLIST,
        authentication: AuthenticationPolicy::SingleMember,
        resolution: ResolutionPolicy::Linear,
        distribution: DistributionPolicy::FullSync {
            direction: SyncDirection::Descending,
        },
        destination: DestinationPolicy::Community { node_count: 10 },
        check: check_playlist,
        apply: apply_playlist,
    });
    catalog.register(MessageKind {
        name: kinds::COMMENT,
        authentication: AuthenticationPolicy::SingleMember,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::FullSync {
            direction: SyncDirection::Descending,
        },
        destination: DestinationPolicy::Community { node_count: 10 },
        check: check_comment,
        apply: apply_comment,
    });
    catalog.register(MessageKind {
        name: kinds::MODIFICATION,
        authentication: AuthenticationPolicy::SingleMember,
        resolution: ResolutionPolicy::Linear,
        distribution: DistributionPolicy::FullSync {
            direction: SyncDirection::Descending,
        },
        destination: DestinationPolicy::Community { node_count: 10 },
        check: check_modification,
        apply: apply_modification,
    });
    catalog.register(MessageKind {
        name: kinds::PLAYLIST_TORRENT,
        authentication: AuthenticationPolicy::SingleMember,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::FullSync {
            direction: SyncDirection::Descending,
        },
        destination: DestinationPolicy::Community { node_count: 10 },
        check: check_playlist_torrent,
        apply: apply_playlist_torrent,
    });
    catalog.register(MessageKind {
        name: kinds::MISSING_CHANNEL,
        authentication: AuthenticationPolicy::None,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::Direct,
        destination: DestinationPolicy::Address,
        check: check_missing_channel,
        apply: apply_missing_channel,
    });
    catalog.register(MessageKind {
        name: kinds::BARTER_RECORD,
        authentication: AuthenticationPolicy::DoubleMember,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::LastSync {
            direction: SyncDirection::Descending,
            priority: 128,
            history_size: 1,
        },
        destination: DestinationPolicy::Community { node_count: 10 },
        check: check_barter_record,
        apply: apply_barter_record,
    });
    catalog.register(MessageKind {
        name: kinds::SIGNATURE_REQUEST,
        authentication: AuthenticationPolicy::None,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::Direct,
        destination: DestinationPolicy::Candidate,
        check: check_signature_request,
        apply: apply_signature_request,
    });
    catalog.register(MessageKind {
        name: kinds::SIGNATURE_RESPONSE,
        authentication: AuthenticationPolicy::None,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::Direct,
        destination: DestinationPolicy::Candidate,
        check: check_signature_response,
        apply: apply_signature_response,
    });
    catalog.register(MessageKind {
        name: kinds::PING,
        authentication: AuthenticationPolicy::None,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::Direct,
        destination: DestinationPolicy::Candidate,
        check: check_ping,
        apply: apply_ping,
    });
    catalog.register(MessageKind {
        name: kinds::PONG,
        authentication: AuthenticationPolicy::None,
        resolution: ResolutionPolicy::Public,
        distribution: DistributionPolicy::Direct,
        destination: DestinationPolicy::Candidate,
        check: check_pong,
        apply: apply_pong,
    });
    catalog
}

// == Check functions ==

/// Linear resolution: only the founder's messages pass.
fn violates_linear<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> Option<CheckOutcome> {
    if message.signer() != Some(worker.founder) {
        Some(CheckOutcome::Drop("resolution"))
    } else {
        None
    }
}

/// Parks the message until a channel arrives, and asks the origin to push its channel back.
fn delay_for_channel<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
) -> CheckOutcome {
    CheckOutcome::Delay(Delay {
        footprint: Footprint {
            kind: kinds::CHANNEL,
            community_id: worker.community_id,
            filter: Filter::Any,
        },
        request: Payload::MissingChannel(MissingChannelPayload {}),
    })
}

fn check_channel<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> CheckOutcome {
    if let Some(outcome) = violates_linear(worker, message) {
        return outcome;
    }
    CheckOutcome::Accept
}

fn check_torrent<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> CheckOutcome {
    if let Some(outcome) = violates_linear(worker, message) {
        return outcome;
    }
    if worker.channel_id.is_none() {
        return delay_for_channel(worker);
    }
    CheckOutcome::Accept
}

fn check_playlist<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> CheckOutcome {
    if let Some(outcome) = violates_linear(worker, message) {
        return outcome;
    }
    if worker.channel_id.is_none() {
        return delay_for_channel(worker);
    }
    CheckOutcome::Accept
}

fn check_comment<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    _message: &Message,
) -> CheckOutcome {
    if worker.channel_id.is_none() {
        return delay_for_channel(worker);
    }
    CheckOutcome::Accept
}

fn check_modification<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> CheckOutcome {
    if let Some(outcome) = violates_linear(worker, message) {
        return outcome;
    }
    if worker.channel_id.is_none() {
        return delay_for_channel(worker);
    }
    CheckOutcome::Accept
}

fn check_playlist_torrent<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    _message: &Message,
) -> CheckOutcome {
    if worker.channel_id.is_none() {
        return delay_for_channel(worker);
    }
    CheckOutcome::Accept
}

fn check_missing_channel<S: crate::storage::Store, G: Gossip>(
    _worker: &CommunityWorker<S, G>,
    _message: &Message,
) -> CheckOutcome {
    CheckOutcome::Accept
}

fn check_barter_record<S: crate::storage::Store, G: Gossip>(
    _worker: &CommunityWorker<S, G>,
    _message: &Message,
) -> CheckOutcome {
    // The authentication gate has already verified both signatures.
    CheckOutcome::Accept
}

fn check_signature_request<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> CheckOutcome {
    let payload = match &message.payload {
        Payload::SignatureRequest(payload) => payload,
        _ => return CheckOutcome::Drop("payload"),
    };
    if payload.record.second != worker.my_public_key {
        return CheckOutcome::Drop("not addressed to us");
    }
    CheckOutcome::Accept
}

fn check_signature_response<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> CheckOutcome {
    let payload = match &message.payload {
        Payload::SignatureResponse(payload) => payload,
        _ => return CheckOutcome::Drop("payload"),
    };
    if !worker
        .request_cache
        .has(payload.identifier, CacheEntryKind::Signature)
    {
        return CheckOutcome::Drop("unknown identifier");
    }
    CheckOutcome::Accept
}

fn check_ping<S: crate::storage::Store, G: Gossip>(
    _worker: &CommunityWorker<S, G>,
    _message: &Message,
) -> CheckOutcome {
    CheckOutcome::Accept
}

fn check_pong<S: crate::storage::Store, G: Gossip>(
    worker: &CommunityWorker<S, G>,
    message: &Message,
) -> CheckOutcome {
    let payload = match &message.payload {
        Payload::Pong(payload) => payload,
        _ => return CheckOutcome::Drop("payload"),
    };
    if !worker
        .request_cache
        .has(payload.identifier, CacheEntryKind::Ping)
    {
        return CheckOutcome::Drop("unknown identifier");
    }
    CheckOutcome::Accept
}

// == Apply functions ==

fn apply_channel<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::Channel(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let storage_id = message
        .storage_id
        .expect("synced kinds are persisted before apply");
    let signer = message
        .signer()
        .expect("the authentication gate admits only signed channel messages");
    let author = worker.store.member_id(&signer);
    let community_id = worker.community_id;
    worker.store.upsert_channel(
        &community_id,
        ChannelRow {
            storage_id,
            author,
            name: payload.name().to_string(),
            description: payload.description().to_string(),
        },
    );
    worker.channel_id = Some(storage_id);
    Ok(())
}

fn apply_torrent<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::Torrent(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let channel = worker.channel_id.ok_or(ApplyError::MissingChannel)?;
    let storage_id = message
        .storage_id
        .expect("synced kinds are persisted before apply");
    let signer = message
        .signer()
        .expect("the authentication gate admits only signed torrent messages");
    let author = worker.store.member_id(&signer);
    worker.store.upsert_torrent(TorrentRow {
        storage_id,
        channel,
        author,
        infohash: *payload.infohash(),
        timestamp: payload.timestamp(),
    });
    Ok(())
}

fn apply_playlist<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::Playlist(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let channel = worker.channel_id.ok_or(ApplyError::MissingChannel)?;
    let storage_id = message
        .storage_id
        .expect("synced kinds are persisted before apply");
    let signer = message
        .signer()
        .expect("the authentication gate admits only signed playlist messages");
    let author = worker.store.member_id(&signer);
    worker.store.upsert_playlist(PlaylistRow {
        storage_id,
        channel,
        author,
        name: payload.name().to_string(),
        description: payload.description().to_string(),
    });
    Ok(())
}

fn apply_comment<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::Comment(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let channel = worker.channel_id.ok_or(ApplyError::MissingChannel)?;
    for reference in [payload.reply_to(), payload.reply_after(), payload.playlist()]
        .into_iter()
        .flatten()
    {
        if !worker.store.contains_message(reference) {
            return Err(ApplyError::MissingRecord {
                kind: kinds::COMMENT,
                storage_id: reference,
            });
        }
    }
    let storage_id = message
        .storage_id
        .expect("synced kinds are persisted before apply");
    let signer = message
        .signer()
        .expect("the authentication gate admits only signed comment messages");
    let author = worker.store.member_id(&signer);
    worker.store.upsert_comment(CommentRow {
        storage_id,
        channel,
        author,
        text: payload.text().to_string(),
        timestamp: payload.timestamp(),
        reply_to: payload.reply_to(),
        reply_after: payload.reply_after(),
        playlist: payload.playlist(),
        infohash: payload.infohash(),
    });
    Ok(())
}

fn apply_modification<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::Modification(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    if !worker.store.contains_message(payload.modification_on()) {
        return Err(ApplyError::MissingRecord {
            kind: kinds::MODIFICATION,
            storage_id: payload.modification_on(),
        });
    }
    let storage_id = message
        .storage_id
        .expect("synced kinds are persisted before apply");
    let signer = message
        .signer()
        .expect("the authentication gate admits only signed modification messages");
    let author = worker.store.member_id(&signer);
    worker.store.upsert_modification(ModificationRow {
        storage_id,
        author,
        modification_on: payload.modification_on(),
        entries: payload.entries().clone(),
        latest_modification: payload.latest_modification(),
    });
    Ok(())
}

fn apply_playlist_torrent<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::PlaylistTorrent(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    if !worker.store.contains_message(payload.playlist()) {
        return Err(ApplyError::MissingRecord {
            kind: kinds::PLAYLIST_TORRENT,
            storage_id: payload.playlist(),
        });
    }
    let storage_id = message
        .storage_id
        .expect("synced kinds are persisted before apply");
    let signer = message
        .signer()
        .expect("the authentication gate admits only signed playlist-torrent messages");
    let author = worker.store.member_id(&signer);
    worker.store.upsert_playlist_torrent(PlaylistTorrentRow {
        storage_id,
        author,
        playlist: payload.playlist(),
        infohash: *payload.infohash(),
    });
    Ok(())
}

/// Pushes our latest channel message back to the requester. If we have none, the requester's
/// parked messages will simply time out.
fn apply_missing_channel<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    _message: &Message,
    peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let peer = match peer {
        Some(peer) => peer,
        None => return Ok(()),
    };
    if let Some(encoded) = worker.store.latest_message(kinds::CHANNEL) {
        worker.gossip.send(peer, encoded);
    }
    Ok(())
}

fn apply_barter_record<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::BarterRecord(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let (first_key, second_key) = match &message.authentication {
        MessageAuthentication::Double { first, second, .. } => (*first, *second),
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let first = worker.member(&first_key);
    let second = worker.member(&second_key);
    let storage_id = message
        .storage_id
        .expect("synced kinds are persisted before apply");
    worker.store.upsert_record(RecordRow::canonical(
        storage_id,
        first.id,
        second.id,
        message.global_time,
        payload,
    ));
    worker.publish(Event::ReceiveRecord(ReceiveRecordEvent {
        timestamp: SystemTime::now(),
        first: first.id,
        second: second.id,
        storage_id,
    }));
    Ok(())
}

/// The responder half of the signature exchange: merge the proposed record against our own book
/// for the initiator, counter-sign, and reply. A cycle disagreement rejects the exchange but is
/// not an apply fault.
fn apply_signature_request<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::SignatureRequest(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let proposed = &payload.record;
    let signable = proposed.signable_bytes(&worker.community_id);
    if !verify(&proposed.first, &signable, &proposed.first_signature) {
        return Err(ApplyError::BadSignature);
    }

    let first = worker.member(&proposed.first);
    worker.mark_contact(first);
    let book = worker.book_mut(first).clone();
    let merged = match merge_proposed_record(&proposed.record, &book) {
        Some(merged) => merged,
        None => {
            log::debug!("RejectExchange, {}, {}", payload.identifier, first.id);
            return Ok(());
        }
    };
    // One record between a pair per cycle: the initiator leaves our slope.
    worker.remove_from_slope(first.id);

    let mut counter = proposed.clone();
    counter.record = merged;
    counter.record.second_timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock before the Unix Epoch")
        .as_secs();
    let signable = counter.signable_bytes(&worker.community_id);
    counter.second_signature = Some(worker.keypair.sign(&signable).to_bytes());

    let peer = match peer {
        Some(peer) => peer,
        None => return Ok(()),
    };
    let response = Payload::SignatureResponse(SignatureResponsePayload {
        identifier: payload.identifier,
        record: counter,
    });
    let reply = Message::new(worker.community_id, worker.global_time, response);
    let kind = worker
        .catalog
        .lookup(kinds::SIGNATURE_RESPONSE)
        .expect("signature-response is registered at startup");
    worker.store_update_forward(&kind, reply, Some(peer), false, false, true);
    Ok(())
}

/// The initiator half: pop the cache entry, verify the counter-signature over the merged record,
/// re-sign as first, and release the completed double-signed record into the community.
fn apply_signature_response<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::SignatureResponse(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let entry = worker
        .request_cache
        .pop(payload.identifier, CacheEntryKind::Signature)
        .map_err(|_| ApplyError::UnknownIdentifier(payload.identifier))?;
    let cache = match entry {
        CacheEntry::Signature(cache) => cache,
        _ => return Err(ApplyError::UnknownIdentifier(payload.identifier)),
    };

    let proposed = &payload.record;
    // The responder may only have merged the record; the pair and the claimed global time must
    // survive the round trip.
    if proposed.first != worker.my_public_key
        || proposed.second != cache.second.public_key
        || proposed.global_time != cache.record.global_time
    {
        worker.remove_from_slope(cache.second.id);
        return Err(ApplyError::BadSignature);
    }
    let second_signature = match proposed.second_signature {
        Some(signature) => signature,
        None => {
            worker.remove_from_slope(cache.second.id);
            return Err(ApplyError::BadSignature);
        }
    };
    let signable = proposed.signable_bytes(&worker.community_id);
    if !verify(&proposed.second, &signable, &second_signature) {
        worker.remove_from_slope(cache.second.id);
        return Err(ApplyError::BadSignature);
    }

    worker.mark_contact(cache.second);

    let first_signature = worker.keypair.sign(&signable).to_bytes();
    let mut record_message = Message::new(
        worker.community_id,
        proposed.global_time,
        Payload::BarterRecord(proposed.record.clone()),
    );
    record_message.authentication = MessageAuthentication::Double {
        first: proposed.first,
        second: proposed.second,
        first_signature,
        second_signature,
    };
    let kind = worker
        .catalog
        .lookup(kinds::BARTER_RECORD)
        .expect("barter-record is registered at startup");
    worker.store_update_forward(&kind, record_message, None, true, true, true);
    Ok(())
}

fn apply_ping<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::Ping(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let member = worker.member(&payload.member);
    worker.mark_contact(member);

    let peer = match peer {
        Some(peer) => peer,
        None => return Ok(()),
    };
    let pong = Payload::Pong(PongPayload {
        identifier: payload.identifier,
        member: worker.my_public_key,
    });
    let reply = Message::new(worker.community_id, worker.global_time, pong);
    let kind = worker
        .catalog
        .lookup(kinds::PONG)
        .expect("pong is registered at startup");
    worker.store_update_forward(&kind, reply, Some(peer), false, false, true);
    Ok(())
}

fn apply_pong<S: crate::storage::Store, G: Gossip>(
    worker: &mut CommunityWorker<S, G>,
    message: &Message,
    _peer: Option<PeerAddress>,
) -> Result<(), ApplyError> {
    let payload = match &message.payload {
        Payload::Pong(payload) => payload,
        _ => return Err(ApplyError::UnexpectedPayload),
    };
    let entry = worker
        .request_cache
        .pop(payload.identifier, CacheEntryKind::Ping)
        .map_err(|_| ApplyError::UnknownIdentifier(payload.identifier))?;
    let cache = match entry {
        CacheEntry::Ping(cache) => cache,
        _ => return Err(ApplyError::UnknownIdentifier(payload.identifier)),
    };
    worker.mark_contact(cache.member);
    worker.publish(Event::Pong(PongEvent {
        timestamp: SystemTime::now(),
        member: cache.member.public_key,
        candidate: cache.candidate,
        identifier: payload.identifier,
    }));
    Ok(())
}
