/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Correlation of outstanding requests with their responses.
//!
//! Claiming an entry allocates a random non-zero identifier that travels with the request and must
//! come back in the response. An entry whose deadline passes is surrendered to the timeout path
//! exactly once; a popped entry cannot time out.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::payload::ProposedRecord;
use crate::types::{Member, PeerAddress};

/// State parked while a ping is in flight.
pub struct PingCache {
    pub candidate: PeerAddress,
    pub member: Member,
}

/// State parked while a signature request is in flight.
pub struct SignatureCache {
    pub candidate: PeerAddress,
    pub second: Member,
    pub record: ProposedRecord,
}

pub enum CacheEntry {
    Ping(PingCache),
    Signature(SignatureCache),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheEntryKind {
    Ping,
    Signature,
}

impl CacheEntry {
    pub fn kind(&self) -> CacheEntryKind {
        match self {
            CacheEntry::Ping(_) => CacheEntryKind::Ping,
            CacheEntry::Signature(_) => CacheEntryKind::Signature,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestCacheError {
    /// No claimed entry carries this identifier, or the entry is of a different kind. A
    /// kind-mismatched pop leaves the entry in place.
    UnknownIdentifier(u32),
}

struct TimedEntry {
    entry: CacheEntry,
    deadline: Instant,
}

pub struct RequestCache {
    entries: HashMap<u32, TimedEntry>,
}

impl RequestCache {
    pub fn new() -> RequestCache {
        RequestCache {
            entries: HashMap::new(),
        }
    }

    /// Parks `entry` under a freshly allocated identifier, armed to time out at `now + timeout`.
    pub fn claim(&mut self, entry: CacheEntry, timeout: Duration, now: Instant) -> u32 {
        let mut rng = rand::thread_rng();
        let identifier = loop {
            let candidate: u32 = rng.gen();
            if candidate != 0 && !self.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        self.entries.insert(
            identifier,
            TimedEntry {
                entry,
                deadline: now + timeout,
            },
        );
        identifier
    }

    pub fn has(&self, identifier: u32, kind: CacheEntryKind) -> bool {
        self.entries
            .get(&identifier)
            .map_or(false, |timed| timed.entry.kind() == kind)
    }

    /// Removes and returns the entry under `identifier`, but only if it is of the expected kind.
    pub fn pop(
        &mut self,
        identifier: u32,
        kind: CacheEntryKind,
    ) -> Result<CacheEntry, RequestCacheError> {
        if !self.has(identifier, kind) {
            return Err(RequestCacheError::UnknownIdentifier(identifier));
        }
        let timed = self
            .entries
            .remove(&identifier)
            .expect("entry present: checked by has");
        Ok(timed.entry)
    }

    /// Removes and returns every entry whose deadline has passed.
    pub fn expired(&mut self, now: Instant) -> Vec<(u32, CacheEntry)> {
        let due: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, timed)| timed.deadline <= now)
            .map(|(identifier, _)| *identifier)
            .collect();
        due.into_iter()
            .map(|identifier| {
                let timed = self
                    .entries
                    .remove(&identifier)
                    .expect("entry present: key collected above");
                (identifier, timed.entry)
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|timed| timed.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
