/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A library for building self-organizing overlay communities that gossip typed, authenticated
//! messages, with a built-in tit-for-tat reputation mechanism.
//!
//! Users start here by implementing the [Store](storage::Store) and [Gossip](gossip::Gossip)
//! traits for their persistence and transport layers, then build and start a community using the
//! types in [community].

pub(crate) mod catalog;

pub mod community;

pub(crate) mod engine;

pub(crate) mod event_bus;

pub mod events;

pub mod gossip;

pub(crate) mod handlers;

pub mod ledger;

pub mod logging;

pub mod message;

pub mod payload;

pub mod request_cache;

pub mod resolver;

pub mod storage;

pub mod types;
