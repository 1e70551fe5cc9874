use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use gossipy::{gossip::Gossip, types::PeerAddress};

/// A mock gossip transport which passes packets from and to threads using channels.
#[derive(Clone)]
pub(crate) struct GossipStub {
    my_address: PeerAddress,
    all_peers: HashMap<PeerAddress, Sender<(PeerAddress, Vec<u8>)>>,
    inbox: Arc<Mutex<Receiver<(PeerAddress, Vec<u8>)>>>,
}

impl GossipStub {
    pub(crate) fn address(&self) -> PeerAddress {
        self.my_address
    }

    // Inherent mirrors of the trait methods, so tests can drive a stub that stands in for a
    // remote peer without importing the trait.

    pub(crate) fn send_to(&mut self, peer: PeerAddress, packet: Vec<u8>) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_address, packet));
        }
    }

    pub(crate) fn try_recv(&mut self) -> Option<(PeerAddress, Vec<u8>)> {
        self.inbox.lock().unwrap().try_recv().ok()
    }
}

impl Gossip for GossipStub {
    fn send(&mut self, peer: PeerAddress, packet: Vec<u8>) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_address, packet));
        }
    }

    fn broadcast(&mut self, _node_count: usize, packet: Vec<u8>) {
        for (address, peer) in &self.all_peers {
            if *address != self.my_address {
                let _ = peer.send((self.my_address, packet.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(PeerAddress, Vec<u8>)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(origin_and_packet) => Some(origin_and_packet),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// A loopback address for the `n`-th peer of a mock mesh.
pub(crate) fn test_address(n: u16) -> PeerAddress {
    SocketAddr::from(([127, 0, 0, 1], 9000 + n))
}

pub(crate) fn mock_network(addresses: impl Iterator<Item = PeerAddress>) -> Vec<GossipStub> {
    let mut all_peers = HashMap::new();
    let address_and_inboxes: Vec<(PeerAddress, Receiver<(PeerAddress, Vec<u8>)>)> = addresses
        .map(|address| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(address, sender);

            (address, receiver)
        })
        .collect();

    address_and_inboxes
        .into_iter()
        .map(|(my_address, inbox)| GossipStub {
            my_address,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
