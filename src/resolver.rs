/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Parking lot for messages whose dependencies have not arrived yet.
//!
//! A delayed message is parked together with the [`Footprint`] of the message it is waiting for.
//! When a message matching a footprint is accepted, the matching parked messages are released in
//! the order they were parked. A parked message whose deadline passes is dropped outright; there
//! is no retry.

use std::time::{Duration, Instant};

use crate::message::{Footprint, Message};
use crate::types::PeerAddress;

pub struct PendingDelay {
    pub message: Message,
    pub origin: Option<PeerAddress>,
    pub footprint: Footprint,
    pub deadline: Instant,
}

pub struct DependencyResolver {
    pending: Vec<PendingDelay>,
    timeout: Duration,
}

impl DependencyResolver {
    pub fn new(timeout: Duration) -> DependencyResolver {
        DependencyResolver {
            pending: Vec::new(),
            timeout,
        }
    }

    pub fn park(
        &mut self,
        message: Message,
        origin: Option<PeerAddress>,
        footprint: Footprint,
        now: Instant,
    ) {
        self.pending.push(PendingDelay {
            message,
            origin,
            footprint,
            deadline: now + self.timeout,
        });
    }

    /// Releases every parked message whose footprint matches `arrived`, preserving parking order.
    pub fn release_matching(&mut self, arrived: &Message) -> Vec<PendingDelay> {
        let pending = std::mem::take(&mut self.pending);
        let (released, kept) = pending
            .into_iter()
            .partition(|delay| delay.footprint.matches(arrived));
        self.pending = kept;
        released
    }

    /// Removes and returns every parked message whose deadline has passed.
    pub fn expired(&mut self, now: Instant) -> Vec<PendingDelay> {
        let pending = std::mem::take(&mut self.pending);
        let (expired, kept) = pending.into_iter().partition(|delay| delay.deadline <= now);
        self.pending = kept;
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|delay| delay.deadline).min()
    }
}
