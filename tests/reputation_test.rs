use std::{
    thread,
    time::{Duration, Instant},
};

use log::LevelFilter;
use rand_core::OsRng;

use gossipy::{
    ledger::RecordRow,
    types::{PublicKeyBytes, SigningKey},
};

mod common;

use common::{
    logging::{log_with_context, setup_logger},
    mem_store::MemStore,
    network::{mock_network, test_address},
    node::Node,
};

/// The record's traffic amounts as (upload from the founder, upload toward the founder). The row
/// is ordered by locally-assigned member ids, which differ between stores, so the founder's side
/// of the pair has to be resolved through the store that holds the row.
fn directional_traffic(row: &RecordRow, store: &MemStore, founder_key: &PublicKeyBytes) -> (u64, u64) {
    let founder_id = store.member_id_of(founder_key).unwrap();
    if row.first_member == founder_id {
        (row.upload_first_to_second, row.upload_second_to_first)
    } else {
        assert_eq!(row.second_member, founder_id);
        (row.upload_second_to_first, row.upload_first_to_second)
    }
}

/// Tests a full signature exchange between two live nodes.
///
/// Node A reports that it downloaded more from node B than it uploaded, so B has a positive
/// score and climbs onto A's slope. During the creating phase of A's cycle, A proposes a
/// half-signed barter record to B, B counter-signs it, and the finished double-signed record is
/// gossiped. Both nodes must end up with the same canonical record row.
#[test]
fn signature_exchange_produces_a_shared_record() {
    setup_logger(LevelFilter::Info);

    let mut csprg = OsRng {};
    let keypair_a = SigningKey::generate(&mut csprg);
    let keypair_b = SigningKey::generate(&mut csprg);
    let founder_key = keypair_a.verifying_key().to_bytes();
    let key_b = keypair_b.verifying_key().to_bytes();

    let cycle_size = Duration::from_secs(4);
    let mut stubs = mock_network([test_address(0), test_address(1)].into_iter());
    let node_b = Node::new(keypair_b, founder_key, stubs.pop().unwrap(), cycle_size);
    let node_a = Node::new(keypair_a, founder_key, stubs.pop().unwrap(), cycle_size);

    // 1. A credits B with a traffic surplus in A's favor.
    node_a.report_transfer(key_b, 10, 100);
    let book = node_a.book(key_b);
    assert_eq!(book.upload, 10);
    assert_eq!(book.download, 100);
    assert_eq!(book.score(), 90);

    // 2. Keep offering B as a slope candidate (the slope is cleared at the end of every cycle)
    // and wait for the exchange to conclude on both sides.
    log_with_context(None, "Waiting for a double-signed record on both nodes.");
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        node_a.try_add_to_slope(node_b.address(), key_b);
        if !node_a.store().record_rows().is_empty() && !node_b.store().record_rows().is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "no record was ever exchanged");
        thread::sleep(Duration::from_millis(200));
    }

    // 3. Each store holds the row in its own canonical form (ascending local member id). The two
    // stores number the members in opposite orders, so the rows are compared after resolving the
    // directional amounts by public key.
    let row_a = node_a.store().record_rows().pop().unwrap();
    let row_b = node_b.store().record_rows().pop().unwrap();
    assert!(row_a.first_member < row_a.second_member);
    assert!(row_b.first_member < row_b.second_member);
    assert_eq!(row_a.cycle, row_b.cycle);
    assert_eq!(row_a.global_time, row_b.global_time);
    assert_eq!(row_a.effort_bits, row_b.effort_bits);
    assert_eq!(
        directional_traffic(&row_a, node_a.store(), &founder_key),
        directional_traffic(&row_b, node_b.store(), &founder_key)
    );

    // The double-signed message was persisted on both sides, not just applied.
    assert!(node_a.store().message_count("barter-record") >= 1);
    assert!(node_b.store().message_count("barter-record") >= 1);
}

/// Tests that a slope candidate which never answers probes is removed again.
#[test]
fn unreachable_candidate_leaves_the_slope() {
    setup_logger(LevelFilter::Info);

    let mut csprg = OsRng {};
    let keypair = SigningKey::generate(&mut csprg);
    let founder_key = keypair.verifying_key().to_bytes();
    let ghost_key = SigningKey::generate(&mut csprg).verifying_key().to_bytes();

    let mut stubs = mock_network([test_address(0)].into_iter());
    let node = Node::new(keypair, founder_key, stubs.pop().unwrap(), Duration::from_secs(4));

    // A positive score makes the ghost admissible; its candidate address is not part of the
    // mesh, so probes and exchange requests vanish.
    node.report_transfer(ghost_key, 0, 50);

    log_with_context(None, "Waiting for the ghost to appear on the slope.");
    let deadline = Instant::now() + Duration::from_secs(30);
    while node.slope_members().len() != 1 {
        node.try_add_to_slope(test_address(99), ghost_key);
        assert!(Instant::now() < deadline, "the ghost never reached the slope");
        thread::sleep(Duration::from_millis(100));
    }

    log_with_context(None, "Waiting for the ghost to be removed again.");
    let deadline = Instant::now() + Duration::from_secs(30);
    while !node.slope_members().is_empty() {
        assert!(Instant::now() < deadline, "the ghost was never removed");
        thread::sleep(Duration::from_millis(100));
    }

    // No record can have been created with an unreachable peer.
    assert!(node.store().record_rows().is_empty());
}
