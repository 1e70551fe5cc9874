/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed message payloads with construction-time validation.
//!
//! Every payload type enforces its bounds in its constructor and returns [`InvalidPayload`] on
//! violation, so a payload value that exists is valid by construction. Payloads decoded from the
//! wire are re-checked with [`Payload::validate`] before they enter the message pipeline.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::catalog::kinds;
use crate::types::{Cycle, EffortHistory, GlobalTime, InfoHash, PublicKeyBytes, SignatureBytes, StorageId};

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 1023;
pub const MAX_COMMENT_LEN: usize = 65535;

/// A payload failed its bounds checks. The string names the violated bound.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InvalidPayload(pub &'static str);

/// The payload of a [Message](crate::message::Message), one variant per registered message kind.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub enum Payload {
    Channel(ChannelPayload),
    Torrent(TorrentPayload),
    Playlist(PlaylistPayload),
    Comment(CommentPayload),
    Modification(ModificationPayload),
    PlaylistTorrent(PlaylistTorrentPayload),
    MissingChannel(MissingChannelPayload),
    BarterRecord(BarterRecordPayload),
    SignatureRequest(SignatureRequestPayload),
    SignatureResponse(SignatureResponsePayload),
    Ping(PingPayload),
    Pong(PongPayload),
}

impl Payload {
    /// The name of the message kind this payload belongs to.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Channel(_) => kinds::CHANNEL,
            Payload::Torrent(_) => kinds::TORRENT,
            Payload::Playlist(_) => kinds::PLAYLIST,
            Payload::Comment(_) => kinds::COMMENT,
            Payload::Modification(_) => kinds::MODIFICATION,
            Payload::PlaylistTorrent(_) => kinds::PLAYLIST_TORRENT,
            Payload::MissingChannel(_) => kinds::MISSING_CHANNEL,
            Payload::BarterRecord(_) => kinds::BARTER_RECORD,
            Payload::SignatureRequest(_) => kinds::SIGNATURE_REQUEST,
            Payload::SignatureResponse(_) => kinds::SIGNATURE_RESPONSE,
            Payload::Ping(_) => kinds::PING,
            Payload::Pong(_) => kinds::PONG,
        }
    }

    /// Re-checks the bounds that the constructors enforce. Used on payloads that arrived over the
    /// wire, where borsh decoding bypasses the constructors.
    pub fn validate(&self) -> Result<(), InvalidPayload> {
        match self {
            Payload::Channel(p) => check_named(&p.name, &p.description),
            Payload::Torrent(_) => Ok(()),
            Payload::Playlist(p) => check_named(&p.name, &p.description),
            Payload::Comment(p) => check_comment_text(&p.text),
            Payload::Modification(_) => Ok(()),
            Payload::PlaylistTorrent(_) => Ok(()),
            Payload::MissingChannel(_) => Ok(()),
            Payload::BarterRecord(p) => check_record(p),
            Payload::SignatureRequest(p) => {
                check_identifier(p.identifier)?;
                check_record(&p.record.record)
            }
            Payload::SignatureResponse(p) => {
                check_identifier(p.identifier)?;
                check_record(&p.record.record)
            }
            Payload::Ping(p) => check_identifier(p.identifier),
            Payload::Pong(p) => check_identifier(p.identifier),
        }
    }
}

fn check_named(name: &str, description: &str) -> Result<(), InvalidPayload> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        Err(InvalidPayload("name length"))
    } else if description.len() > MAX_DESCRIPTION_LEN {
        Err(InvalidPayload("description length"))
    } else {
        Ok(())
    }
}

fn check_comment_text(text: &str) -> Result<(), InvalidPayload> {
    if text.is_empty() || text.len() > MAX_COMMENT_LEN {
        Err(InvalidPayload("text length"))
    } else {
        Ok(())
    }
}

fn check_identifier(identifier: u32) -> Result<(), InvalidPayload> {
    if identifier == 0 {
        Err(InvalidPayload("zero identifier"))
    } else {
        Ok(())
    }
}

fn check_record(record: &BarterRecordPayload) -> Result<(), InvalidPayload> {
    if record.effort.cycle() != record.cycle {
        Err(InvalidPayload("effort cycle mismatch"))
    } else {
        Ok(())
    }
}

/// Defines a community: its display name and description. The first channel message a peer applies
/// pins the community's channel storage id, which content payloads reference.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ChannelPayload {
    name: String,
    description: String,
}

impl ChannelPayload {
    pub fn new(name: &str, description: &str) -> Result<ChannelPayload, InvalidPayload> {
        check_named(name, description)?;
        Ok(ChannelPayload {
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Announces a piece of content by infohash.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TorrentPayload {
    infohash: InfoHash,
    timestamp: u64,
}

impl TorrentPayload {
    pub fn new(infohash: InfoHash, timestamp: u64) -> TorrentPayload {
        TorrentPayload {
            infohash,
            timestamp,
        }
    }

    pub fn infohash(&self) -> &InfoHash {
        &self.infohash
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Groups content under a named playlist within the channel.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PlaylistPayload {
    name: String,
    description: String,
}

impl PlaylistPayload {
    pub fn new(name: &str, description: &str) -> Result<PlaylistPayload, InvalidPayload> {
        check_named(name, description)?;
        Ok(PlaylistPayload {
            name: name.to_string(),
            description: description.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Free-text remark on the channel, a torrent, or a playlist. References to prior messages use the
/// referrer's storage ids.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct CommentPayload {
    text: String,
    timestamp: u64,
    reply_to: Option<StorageId>,
    reply_after: Option<StorageId>,
    playlist: Option<StorageId>,
    infohash: Option<InfoHash>,
}

impl CommentPayload {
    pub fn new(
        text: &str,
        timestamp: u64,
        reply_to: Option<StorageId>,
        reply_after: Option<StorageId>,
        playlist: Option<StorageId>,
        infohash: Option<InfoHash>,
    ) -> Result<CommentPayload, InvalidPayload> {
        check_comment_text(text)?;
        Ok(CommentPayload {
            text: text.to_string(),
            timestamp,
            reply_to,
            reply_after,
            playlist,
            infohash,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn reply_to(&self) -> Option<StorageId> {
        self.reply_to
    }

    pub fn reply_after(&self) -> Option<StorageId> {
        self.reply_after
    }

    pub fn playlist(&self) -> Option<StorageId> {
        self.playlist
    }

    pub fn infohash(&self) -> Option<InfoHash> {
        self.infohash
    }
}

/// Corrects attributes of a previously disseminated message, identified by storage id.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ModificationPayload {
    entries: BTreeMap<String, String>,
    modification_on: StorageId,
    latest_modification: Option<StorageId>,
}

impl ModificationPayload {
    pub fn new(
        entries: BTreeMap<String, String>,
        modification_on: StorageId,
        latest_modification: Option<StorageId>,
    ) -> ModificationPayload {
        ModificationPayload {
            entries,
            modification_on,
            latest_modification,
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn modification_on(&self) -> StorageId {
        self.modification_on
    }

    pub fn latest_modification(&self) -> Option<StorageId> {
        self.latest_modification
    }
}

/// Places a torrent (by infohash) into a playlist.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PlaylistTorrentPayload {
    infohash: InfoHash,
    playlist: StorageId,
}

impl PlaylistTorrentPayload {
    pub fn new(infohash: InfoHash, playlist: StorageId) -> PlaylistTorrentPayload {
        PlaylistTorrentPayload { infohash, playlist }
    }

    pub fn infohash(&self) -> &InfoHash {
        &self.infohash
    }

    pub fn playlist(&self) -> StorageId {
        self.playlist
    }
}

/// Asks a peer to push its channel message back to us. Emitted when a content message arrives
/// before the channel that defines the community.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct MissingChannelPayload {}

/// One reputation record covering a single cycle of traffic between two members. The `first_*` and
/// `second_*` fields are from the perspective of the member that initiated the signature exchange.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct BarterRecordPayload {
    pub cycle: Cycle,
    pub effort: EffortHistory,
    pub upload_first_to_second: u64,
    pub upload_second_to_first: u64,
    // Diagnostic counters carried for post-hoc analysis, not consulted by the engine.
    pub first_timestamp: u64,
    pub second_timestamp: u64,
    pub first_upload: u64,
    pub first_download: u64,
    pub second_upload: u64,
    pub second_download: u64,
}

/// A barter record in flight between the two members that must both sign it. Carries the members'
/// keys and the global time the initiator claimed for the final record, so both signatures commit
/// to the same bytes.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ProposedRecord {
    pub first: PublicKeyBytes,
    pub second: PublicKeyBytes,
    pub global_time: GlobalTime,
    pub record: BarterRecordPayload,
    pub first_signature: SignatureBytes,
    pub second_signature: Option<SignatureBytes>,
}

impl ProposedRecord {
    /// The bytes both members sign. Identical to the message bytes of the double-signed
    /// barter-record message that concludes the exchange.
    pub fn signable_bytes(&self, community_id: &crate::types::CommunityId) -> Vec<u8> {
        (
            kinds::BARTER_RECORD.to_string(),
            community_id,
            &self.first,
            &self.second,
            self.global_time,
            Payload::BarterRecord(self.record.clone()),
        )
            .try_to_vec()
            .unwrap()
    }
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SignatureRequestPayload {
    pub identifier: u32,
    pub record: ProposedRecord,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SignatureResponsePayload {
    pub identifier: u32,
    pub record: ProposedRecord,
}

/// Liveness probe sent to slope candidates. `member` carries the sender's key so the receiver can
/// credit the contact.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PingPayload {
    pub identifier: u32,
    pub member: PublicKeyBytes,
}

#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PongPayload {
    pub identifier: u32,
    pub member: PublicKeyBytes,
}
