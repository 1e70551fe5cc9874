//! Definitions of gossipy events for event handling and logging
//! Note: an event for a given action indicates that the action has been completed

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::ledger::CyclePhase;
use crate::message::Message;
use crate::types::{Cycle, GlobalTime, MemberId, PeerAddress, PublicKeyBytes, StorageId};

pub enum Event {
    // Message lifecycle events.
    StoreMessage(StoreMessageEvent),
    ForwardMessage(ForwardMessageEvent),
    DropMessage(DropMessageEvent),
    DelayMessage(DelayMessageEvent),
    ResumeMessage(ResumeMessageEvent),
    DelayTimeout(DelayTimeoutEvent),
    // Reputation cycle events.
    StartCyclePhase(StartCyclePhaseEvent),
    AddToSlope(AddToSlopeEvent),
    RemoveFromSlope(RemoveFromSlopeEvent),
    RequestSignature(RequestSignatureEvent),
    ReceiveRecord(ReceiveRecordEvent),
    // Probe events.
    Ping(PingEvent),
    Pong(PongEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            event_publisher.send(event).unwrap()
        }
    }
}

pub struct StoreMessageEvent {
    pub timestamp: SystemTime,
    pub message: Message,
}

pub struct ForwardMessageEvent {
    pub timestamp: SystemTime,
    pub message: Message,
}

pub struct DropMessageEvent {
    pub timestamp: SystemTime,
    pub message: Message,
    pub reason: &'static str,
}

pub struct DelayMessageEvent {
    pub timestamp: SystemTime,
    pub message: Message,
    pub awaited_kind: &'static str,
}

pub struct ResumeMessageEvent {
    pub timestamp: SystemTime,
    pub message: Message,
}

pub struct DelayTimeoutEvent {
    pub timestamp: SystemTime,
    pub message: Message,
}

pub struct StartCyclePhaseEvent {
    pub timestamp: SystemTime,
    pub cycle: Cycle,
    pub phase: CyclePhase,
}

pub struct AddToSlopeEvent {
    pub timestamp: SystemTime,
    pub member: MemberId,
    pub candidate: PeerAddress,
    pub score: i64,
}

pub struct RemoveFromSlopeEvent {
    pub timestamp: SystemTime,
    pub member: MemberId,
}

pub struct RequestSignatureEvent {
    pub timestamp: SystemTime,
    pub second: MemberId,
    pub candidate: PeerAddress,
    pub identifier: u32,
    pub global_time: GlobalTime,
}

pub struct ReceiveRecordEvent {
    pub timestamp: SystemTime,
    pub first: MemberId,
    pub second: MemberId,
    pub storage_id: StorageId,
}

pub struct PingEvent {
    pub timestamp: SystemTime,
    pub member: PublicKeyBytes,
    pub candidate: PeerAddress,
    pub identifier: u32,
}

pub struct PongEvent {
    pub timestamp: SystemTime,
    pub member: PublicKeyBytes,
    pub candidate: PeerAddress,
    pub identifier: u32,
}
