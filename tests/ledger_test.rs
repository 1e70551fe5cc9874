//! Pure tests of the reputation bookkeeping: record merging, canonical rows, the slope, effort
//! histories, and the request cache. No threads involved.

use std::time::{Duration, Instant};

use borsh::BorshSerialize;

use gossipy::{
    ledger::{
        current_cycle, cycle_position, merge_proposed_record, AdmitOutcome, Book, BookCache,
        RecordRow, Slope,
    },
    payload::BarterRecordPayload,
    request_cache::{CacheEntry, CacheEntryKind, PingCache, RequestCache, RequestCacheError},
    types::{EffortHistory, Member, MemberId},
};

fn member(id: MemberId) -> Member {
    Member {
        id,
        public_key: [id as u8; 32],
    }
}

fn record(cycle: u64, effort_bits: u64) -> BarterRecordPayload {
    BarterRecordPayload {
        cycle,
        effort: EffortHistory::from_parts(effort_bits, cycle),
        upload_first_to_second: 500,
        upload_second_to_first: 0,
        first_timestamp: 1000,
        second_timestamp: 0,
        first_upload: 500,
        first_download: 0,
        second_upload: 0,
        second_download: 0,
    }
}

#[test]
fn merge_clamps_the_initiators_claim_to_our_book() {
    let mut book = Book::new(member(1), 7);
    book.effort = EffortHistory::from_parts(0b011, 7);
    book.upload = 10;
    book.download = 100;

    let merged = merge_proposed_record(&record(7, 0b101), &book).unwrap();

    // Only the cycles both sides observed survive.
    assert_eq!(merged.effort.bits(), 0b001);
    // The claim in the initiator's favor shrinks to what our book supports; the claim in our
    // favor grows to what our book knows.
    assert_eq!(merged.upload_first_to_second, 10);
    assert_eq!(merged.upload_second_to_first, 100);
    // Our own counters are stamped in from the responder's perspective.
    assert_eq!(merged.second_upload, 100);
    assert_eq!(merged.second_download, 10);
}

#[test]
fn merge_rejects_a_cycle_disagreement() {
    let book = Book::new(member(1), 8);
    assert!(merge_proposed_record(&record(7, 0b1), &book).is_none());
}

#[test]
fn merging_twice_changes_nothing() {
    let mut book = Book::new(member(1), 7);
    book.effort = EffortHistory::from_parts(0b111, 7);
    book.upload = 10;
    book.download = 100;

    let once = merge_proposed_record(&record(7, 0b101), &book).unwrap();
    let twice = merge_proposed_record(&once, &book).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn both_orderings_of_a_record_yield_the_same_row() {
    let forward = record(7, 0b1);
    let mut backward = forward.clone();
    std::mem::swap(
        &mut backward.upload_first_to_second,
        &mut backward.upload_second_to_first,
    );
    std::mem::swap(&mut backward.first_timestamp, &mut backward.second_timestamp);
    std::mem::swap(&mut backward.first_upload, &mut backward.second_upload);
    std::mem::swap(&mut backward.first_download, &mut backward.second_download);

    let row = RecordRow::canonical(1, 3, 5, 42, &forward);
    let mirrored = RecordRow::canonical(1, 5, 3, 42, &backward);

    assert_eq!(row, mirrored);
    assert_eq!(
        row.try_to_vec().unwrap(),
        mirrored.try_to_vec().unwrap()
    );
    assert!(row.first_member < row.second_member);
}

#[test]
fn the_slope_admits_on_positive_score_only() {
    let mut slope = Slope::new(2);
    let now = Instant::now();
    let candidate = "127.0.0.1:9000".parse().unwrap();

    assert_eq!(
        slope.try_admit(member(1), candidate, 0, &[], now),
        AdmitOutcome::Rejected
    );
    assert_eq!(
        slope.try_admit(member(1), candidate, -5, &[], now),
        AdmitOutcome::Rejected
    );
    assert_eq!(
        slope.try_admit(member(1), candidate, 5, &[], now),
        AdmitOutcome::Admitted { evicted: None }
    );
    // Already present.
    assert_eq!(
        slope.try_admit(member(1), candidate, 10, &[(1, 5)], now),
        AdmitOutcome::Rejected
    );
}

#[test]
fn a_full_slope_evicts_its_weakest_occupant_for_a_better_candidate() {
    let mut slope = Slope::new(2);
    let now = Instant::now();
    let candidate = "127.0.0.1:9000".parse().unwrap();

    slope.try_admit(member(1), candidate, 5, &[], now);
    slope.try_admit(member(2), candidate, 8, &[(1, 5)], now);

    // Weaker than everyone on the slope: rejected.
    assert_eq!(
        slope.try_admit(member(3), candidate, 4, &[(1, 5), (2, 8)], now),
        AdmitOutcome::Rejected
    );
    // Stronger than the weakest: takes its place.
    assert_eq!(
        slope.try_admit(member(4), candidate, 6, &[(1, 5), (2, 8)], now),
        AdmitOutcome::Admitted { evicted: Some(1) }
    );
    let mut members = slope.members();
    members.sort();
    assert_eq!(members, vec![2, 4]);
}

#[test]
fn effort_promotion_shifts_history_and_marks_the_current_cycle() {
    let mut effort = EffortHistory::from_parts(0b1, 5);
    effort.promote(7);
    assert_eq!(effort.bits(), 0b101);
    assert_eq!(effort.cycle(), 7);

    // After a gap longer than the history holds, only the current cycle remains.
    let mut stale = EffortHistory::from_parts(u64::MAX, 0);
    stale.promote(100);
    assert_eq!(stale.bits(), 0b1);
}

#[test]
fn effort_intersection_requires_matching_cycles() {
    let left = EffortHistory::from_parts(0b110, 7);
    let right = EffortHistory::from_parts(0b011, 7);
    assert_eq!(left.intersect(&right).unwrap().bits(), 0b010);

    let shifted = EffortHistory::from_parts(0b011, 8);
    assert!(left.intersect(&shifted).is_none());
}

#[test]
fn a_kind_mismatched_pop_leaves_the_cache_entry_in_place() {
    let mut cache = RequestCache::new();
    let now = Instant::now();
    let identifier = cache.claim(
        CacheEntry::Ping(PingCache {
            candidate: "127.0.0.1:9000".parse().unwrap(),
            member: member(1),
        }),
        Duration::from_secs(10),
        now,
    );
    assert_ne!(identifier, 0);

    assert!(matches!(
        cache.pop(identifier, CacheEntryKind::Signature),
        Err(RequestCacheError::UnknownIdentifier(id)) if id == identifier
    ));
    assert!(cache.has(identifier, CacheEntryKind::Ping));

    assert!(cache.pop(identifier, CacheEntryKind::Ping).is_ok());
    assert!(!cache.has(identifier, CacheEntryKind::Ping));
    assert_eq!(cache.len(), 0);
}

#[test]
fn cache_entries_expire_after_their_timeout() {
    let mut cache = RequestCache::new();
    let now = Instant::now();
    let identifier = cache.claim(
        CacheEntry::Ping(PingCache {
            candidate: "127.0.0.1:9000".parse().unwrap(),
            member: member(1),
        }),
        Duration::from_millis(10),
        now,
    );

    assert!(cache.expired(now).is_empty());
    let expired = cache.expired(now + Duration::from_millis(20));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].0, identifier);
    assert_eq!(cache.len(), 0);
}

#[test]
fn sub_second_cycle_lengths_still_advance_the_cycle_index() {
    let cycle_size = Duration::from_millis(250);

    let (before, position) = cycle_position(cycle_size);
    assert!(position < cycle_size);

    // `current_cycle` is the same expression; at most one boundary can pass between the calls.
    let shorthand = current_cycle(cycle_size);
    assert!(shorthand == before || shorthand == before + 1);

    // 600ms spans at least two 250ms boundaries, so the index must move.
    std::thread::sleep(Duration::from_millis(600));
    let (after, _) = cycle_position(cycle_size);
    assert!(after > before);
}

#[test]
fn the_book_cache_evicts_in_insertion_order() {
    let mut cache = BookCache::new(2);
    assert!(cache.insert(Book::new(member(1), 7)).is_none());
    assert!(cache.insert(Book::new(member(2), 7)).is_none());

    let evicted = cache.insert(Book::new(member(3), 7)).unwrap();
    assert_eq!(evicted.member.id, 1);
    assert_eq!(cache.len(), 2);
    assert!(cache.contains(2));
    assert!(cache.contains(3));

    // Re-inserting a cached member updates in place without eviction.
    assert!(cache.insert(Book::new(member(2), 8)).is_none());
    assert_eq!(cache.get(2).unwrap().cycle, 8);
}
