/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reputation bookkeeping: per-peer books, the bounded book cache, record merge rules, the
//! canonical persisted record row, and the slope of candidates lined up for signature exchanges.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::payload::BarterRecordPayload;
use crate::storage::BookRow;
use crate::types::{Cycle, EffortHistory, GlobalTime, Member, MemberId, PeerAddress, StorageId};

/// The wall-clock cycle index at this moment, for the given cycle length.
pub fn current_cycle(cycle_size: Duration) -> Cycle {
    cycle_position(cycle_size).0
}

/// The wall-clock cycle index and how far into that cycle the moment lies. The scheduler and the
/// book-keeping both derive the cycle index from this one expression.
pub fn cycle_position(cycle_size: Duration) -> (Cycle, Duration) {
    let wall = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock before the Unix Epoch")
        .as_secs_f64();
    let cycle_secs = cycle_size.as_secs_f64();
    let cycle = (wall / cycle_secs) as u64;
    let position = (wall - cycle as f64 * cycle_secs).max(0.0);
    (cycle, Duration::from_secs_f64(position))
}

/// Phase of the reputation cycle loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CyclePhase {
    /// First half of the cycle: candidates climb onto the slope, probes run.
    Climbing,
    /// 50%–90% of the cycle: winners are picked and signature exchanges initiated.
    Creating,
    /// Tail of the cycle: slope and winners are reset, nothing is initiated.
    Idle,
}

/// Everything the local peer knows about its traffic relationship with one other member.
#[derive(Clone, Debug, PartialEq)]
pub struct Book {
    pub member: Member,
    pub cycle: Cycle,
    pub effort: EffortHistory,
    pub upload: u64,
    pub download: u64,
}

impl Book {
    pub fn new(member: Member, cycle: Cycle) -> Book {
        Book {
            member,
            cycle,
            effort: EffortHistory::new(cycle),
            upload: 0,
            download: 0,
        }
    }

    pub fn from_row(member: Member, row: BookRow) -> Book {
        Book {
            member,
            cycle: row.cycle,
            effort: EffortHistory::from_parts(row.effort_bits, row.cycle),
            upload: row.upload,
            download: row.download,
        }
    }

    pub fn to_row(&self) -> BookRow {
        BookRow {
            member: self.member.id,
            cycle: self.cycle,
            effort_bits: self.effort.bits(),
            upload: self.upload,
            download: self.download,
        }
    }

    /// Net benefit this peer has been to us. Positive means we downloaded more from them than we
    /// uploaded to them.
    pub fn score(&self) -> i64 {
        self.download as i64 - self.upload as i64
    }
}

/// Bounded cache of books, evicting in insertion order. The worker flushes evicted books to the
/// Store, and flushes everything at teardown.
pub struct BookCache {
    capacity: usize,
    order: VecDeque<MemberId>,
    books: HashMap<MemberId, Book>,
}

impl BookCache {
    pub fn new(capacity: usize) -> BookCache {
        BookCache {
            capacity,
            order: VecDeque::new(),
            books: HashMap::new(),
        }
    }

    pub fn contains(&self, member: MemberId) -> bool {
        self.books.contains_key(&member)
    }

    pub fn get(&self, member: MemberId) -> Option<&Book> {
        self.books.get(&member)
    }

    pub fn get_mut(&mut self, member: MemberId) -> Option<&mut Book> {
        self.books.get_mut(&member)
    }

    /// Inserts a book, returning the evicted oldest book if the cache was full.
    pub fn insert(&mut self, book: Book) -> Option<Book> {
        if self.books.contains_key(&book.member.id) {
            self.books.insert(book.member.id, book);
            return None;
        }
        let evicted = if self.books.len() >= self.capacity {
            let oldest = self
                .order
                .pop_front()
                .expect("cache full implies non-empty insertion order");
            self.books.remove(&oldest)
        } else {
            None
        };
        self.order.push_back(book.member.id);
        self.books.insert(book.member.id, book);
        evicted
    }

    pub fn drain(&mut self) -> Vec<Book> {
        self.order.clear();
        self.books.drain().map(|(_, book)| book).collect()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }
}

/// Merges a record proposed by the exchange initiator against the responder's local book for that
/// initiator. Returns `None` when the two sides disagree on the cycle, which rejects the whole
/// exchange.
///
/// Effort is intersected so the record only claims cycles both sides observed. The bandwidth claim
/// in the initiator's favor is clamped down to what our book supports; the claim in our favor is
/// raised to what our book knows.
pub fn merge_proposed_record(
    proposed: &BarterRecordPayload,
    book: &Book,
) -> Option<BarterRecordPayload> {
    if proposed.cycle != book.cycle {
        return None;
    }
    let effort = proposed.effort.intersect(&book.effort)?;
    let mut merged = proposed.clone();
    merged.effort = effort;
    merged.upload_first_to_second = proposed.upload_first_to_second.min(book.upload);
    merged.upload_second_to_first = proposed.upload_second_to_first.max(book.download);
    merged.second_upload = book.download;
    merged.second_download = book.upload;
    Some(merged)
}

/// A completed, double-signed barter record as persisted. The two members are ordered by ascending
/// local member id, with the direction-paired fields swapped to match, so both orderings of the
/// same record produce one row.
#[derive(Clone, PartialEq, Debug, BorshSerialize, BorshDeserialize)]
pub struct RecordRow {
    pub storage_id: StorageId,
    pub first_member: MemberId,
    pub second_member: MemberId,
    pub global_time: GlobalTime,
    pub cycle: Cycle,
    pub effort_bits: u64,
    pub upload_first_to_second: u64,
    pub upload_second_to_first: u64,
    pub first_timestamp: u64,
    pub second_timestamp: u64,
    pub first_upload: u64,
    pub first_download: u64,
    pub second_upload: u64,
    pub second_download: u64,
}

impl RecordRow {
    pub fn canonical(
        storage_id: StorageId,
        first: MemberId,
        second: MemberId,
        global_time: GlobalTime,
        record: &BarterRecordPayload,
    ) -> RecordRow {
        let mut row = RecordRow {
            storage_id,
            first_member: first,
            second_member: second,
            global_time,
            cycle: record.cycle,
            effort_bits: record.effort.bits(),
            upload_first_to_second: record.upload_first_to_second,
            upload_second_to_first: record.upload_second_to_first,
            first_timestamp: record.first_timestamp,
            second_timestamp: record.second_timestamp,
            first_upload: record.first_upload,
            first_download: record.first_download,
            second_upload: record.second_upload,
            second_download: record.second_download,
        };
        if row.first_member > row.second_member {
            std::mem::swap(&mut row.first_member, &mut row.second_member);
            std::mem::swap(
                &mut row.upload_first_to_second,
                &mut row.upload_second_to_first,
            );
            std::mem::swap(&mut row.first_timestamp, &mut row.second_timestamp);
            std::mem::swap(&mut row.first_upload, &mut row.second_upload);
            std::mem::swap(&mut row.first_download, &mut row.second_download);
        }
        row
    }
}

pub struct SlopeEntry {
    pub member: Member,
    pub candidate: PeerAddress,
    pub next_probe: Instant,
}

/// The bounded set of members lined up for a signature exchange this cycle. Admission requires a
/// positive score; when full, the lowest-scored occupant makes way for a better candidate.
pub struct Slope {
    capacity: usize,
    entries: HashMap<MemberId, SlopeEntry>,
}

impl Slope {
    pub fn new(capacity: usize) -> Slope {
        Slope {
            capacity,
            entries: HashMap::new(),
        }
    }

    pub fn contains(&self, member: MemberId) -> bool {
        self.entries.contains_key(&member)
    }

    /// Tries to admit `member`. `occupant_scores` must cover every current occupant. Returns the
    /// evicted member id, if admission displaced one.
    pub fn try_admit(
        &mut self,
        member: Member,
        candidate: PeerAddress,
        score: i64,
        occupant_scores: &[(MemberId, i64)],
        next_probe: Instant,
    ) -> AdmitOutcome {
        if score <= 0 || self.entries.contains_key(&member.id) {
            return AdmitOutcome::Rejected;
        }
        let evicted = if self.entries.len() >= self.capacity {
            let weakest = occupant_scores
                .iter()
                .filter(|(id, _)| self.entries.contains_key(id))
                .min_by_key(|(_, occupant_score)| *occupant_score)
                .copied();
            match weakest {
                Some((weakest_id, weakest_score)) if weakest_score < score => {
                    self.entries.remove(&weakest_id);
                    Some(weakest_id)
                }
                _ => return AdmitOutcome::Rejected,
            }
        } else {
            None
        };
        self.entries.insert(
            member.id,
            SlopeEntry {
                member,
                candidate,
                next_probe,
            },
        );
        AdmitOutcome::Admitted { evicted }
    }

    pub fn remove(&mut self, member: MemberId) -> Option<SlopeEntry> {
        self.entries.remove(&member)
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn get_mut(&mut self, member: MemberId) -> Option<&mut SlopeEntry> {
        self.entries.get_mut(&member)
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.entries.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SlopeEntry> {
        self.entries.values()
    }

    /// Members whose probe is due at `now`.
    pub fn due_probes(&self, now: Instant) -> Vec<MemberId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.next_probe <= now)
            .map(|(member, _)| *member)
            .collect()
    }

    pub fn next_probe_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.next_probe).min()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AdmitOutcome {
    Admitted { evicted: Option<MemberId> },
    Rejected,
}
