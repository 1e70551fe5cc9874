/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Gossip) for pluggable gossip transports, as well as the poller thread that
//! turns raw packets into per-kind message batches for the community worker.
//!
//! The library does not open sockets. A gossip provider hands over opaque packets tagged with the
//! sender's address; candidate discovery and community membership tracking live on the provider's
//! side of this seam. The poller decodes, structurally validates, and batches — everything
//! semantic happens on the worker thread.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::engine::WorkItem;
use crate::message::Message;
use crate::types::{CommunityId, PeerAddress};

pub trait Gossip: Clone + Send + 'static {
    /// Send a packet to the specified peer without blocking.
    fn send(&mut self, peer: PeerAddress, packet: Vec<u8>);

    /// Send a packet to a random subset of the community of at most `node_count` peers, without
    /// blocking.
    fn broadcast(&mut self, node_count: usize, packet: Vec<u8>);

    /// Receive a packet from any peer. Returns immediately with a None if no packet is available
    /// now.
    fn recv(&mut self) -> Option<(PeerAddress, Vec<u8>)>;
}

/// Spawn the poller thread, which polls the Gossip provider for packets, discards everything that
/// is not a well-formed message of this community, and feeds batches of consecutive same-kind,
/// same-origin messages into the worker's inbox.
pub(crate) fn start_polling<G: Gossip>(
    mut gossip: G,
    community_id: CommunityId,
    inbox: Sender<WorkItem>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut batch: Vec<Message> = Vec::new();
        let mut batch_key: Option<(String, PeerAddress)> = None;

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Poller thread disconnected from main thread")
                }
            }

            if let Some((origin, packet)) = gossip.recv() {
                let message = match Message::decode(&packet) {
                    Ok(message) => message,
                    Err(_) => {
                        log::debug!("UndecodablePacket, {}, {}", origin, packet.len());
                        continue;
                    }
                };
                if message.community_id != community_id {
                    continue;
                }
                if message.kind != message.payload.kind() {
                    log::debug!("MismatchedPayload, {}, {}", origin, message.kind);
                    continue;
                }
                if let Err(invalid) = message.payload.validate() {
                    log::debug!("InvalidPayload, {}, {}, {}", origin, message.kind, invalid.0);
                    continue;
                }

                let key = (message.kind.clone(), origin);
                if batch_key.as_ref() != Some(&key) {
                    flush(&inbox, &mut batch, &mut batch_key);
                    batch_key = Some(key);
                }
                batch.push(message);
            } else {
                flush(&inbox, &mut batch, &mut batch_key);
                thread::yield_now()
            }
        }
    })
}

fn flush(
    inbox: &Sender<WorkItem>,
    batch: &mut Vec<Message>,
    batch_key: &mut Option<(String, PeerAddress)>,
) {
    if let Some((kind, origin)) = batch_key.take() {
        if !batch.is_empty() {
            let _ = inbox.send(WorkItem::Batch {
                kind,
                origin: Some(origin),
                messages: std::mem::take(batch),
            });
        }
    }
}
