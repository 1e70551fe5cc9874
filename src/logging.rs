/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the community's
//! [config](crate::community::Configuration).
//!
//! Gossipy logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following
//! snippet is how a [DropMessage](crate::events::DropMessageEvent) is printed:
//!
//! ```text
//! DropMessage, 1701329264, torrent, 41, authentication
//! ```
//!
//! In the snippet:
//! - The third value is the name of the message's kind.
//! - The fourth value is the message's global time.
//! - The fifth value is the drop reason.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const STORE_MESSAGE: &str = "StoreMessage";
pub const FORWARD_MESSAGE: &str = "ForwardMessage";
pub const DROP_MESSAGE: &str = "DropMessage";
pub const DELAY_MESSAGE: &str = "DelayMessage";
pub const RESUME_MESSAGE: &str = "ResumeMessage";
pub const DELAY_TIMEOUT: &str = "DelayTimeout";

pub const START_CYCLE_PHASE: &str = "StartCyclePhase";
pub const ADD_TO_SLOPE: &str = "AddToSlope";
pub const REMOVE_FROM_SLOPE: &str = "RemoveFromSlope";
pub const REQUEST_SIGNATURE: &str = "RequestSignature";
pub const RECEIVE_RECORD: &str = "ReceiveRecord";

pub const PING: &str = "Ping";
pub const PONG: &str = "Pong";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StoreMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |store_message_event: &StoreMessageEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                STORE_MESSAGE,
                secs_since_unix_epoch(store_message_event.timestamp),
                store_message_event.message.kind,
                store_message_event.message.global_time,
                store_message_event.message.storage_id.unwrap_or(0)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ForwardMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |forward_message_event: &ForwardMessageEvent| {
            log::info!(
                "{}, {}, {}, {}",
                FORWARD_MESSAGE,
                secs_since_unix_epoch(forward_message_event.timestamp),
                forward_message_event.message.kind,
                forward_message_event.message.global_time
            )
        };
        Box::new(logger)
    }
}

impl Logger for DropMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |drop_message_event: &DropMessageEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                DROP_MESSAGE,
                secs_since_unix_epoch(drop_message_event.timestamp),
                drop_message_event.message.kind,
                drop_message_event.message.global_time,
                drop_message_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for DelayMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |delay_message_event: &DelayMessageEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                DELAY_MESSAGE,
                secs_since_unix_epoch(delay_message_event.timestamp),
                delay_message_event.message.kind,
                delay_message_event.message.global_time,
                delay_message_event.awaited_kind
            )
        };
        Box::new(logger)
    }
}

impl Logger for ResumeMessageEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |resume_message_event: &ResumeMessageEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RESUME_MESSAGE,
                secs_since_unix_epoch(resume_message_event.timestamp),
                resume_message_event.message.kind,
                resume_message_event.message.global_time
            )
        };
        Box::new(logger)
    }
}

impl Logger for DelayTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |delay_timeout_event: &DelayTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DELAY_TIMEOUT,
                secs_since_unix_epoch(delay_timeout_event.timestamp),
                delay_timeout_event.message.kind,
                delay_timeout_event.message.global_time
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartCyclePhaseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_cycle_phase_event: &StartCyclePhaseEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                START_CYCLE_PHASE,
                secs_since_unix_epoch(start_cycle_phase_event.timestamp),
                start_cycle_phase_event.cycle,
                start_cycle_phase_event.phase
            )
        };
        Box::new(logger)
    }
}

impl Logger for AddToSlopeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |add_to_slope_event: &AddToSlopeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ADD_TO_SLOPE,
                secs_since_unix_epoch(add_to_slope_event.timestamp),
                add_to_slope_event.member,
                add_to_slope_event.candidate,
                add_to_slope_event.score
            )
        };
        Box::new(logger)
    }
}

impl Logger for RemoveFromSlopeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |remove_from_slope_event: &RemoveFromSlopeEvent| {
            log::info!(
                "{}, {}, {}",
                REMOVE_FROM_SLOPE,
                secs_since_unix_epoch(remove_from_slope_event.timestamp),
                remove_from_slope_event.member
            )
        };
        Box::new(logger)
    }
}

impl Logger for RequestSignatureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |request_signature_event: &RequestSignatureEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                REQUEST_SIGNATURE,
                secs_since_unix_epoch(request_signature_event.timestamp),
                request_signature_event.second,
                request_signature_event.candidate,
                request_signature_event.identifier,
                request_signature_event.global_time
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveRecordEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_record_event: &ReceiveRecordEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_RECORD,
                secs_since_unix_epoch(receive_record_event.timestamp),
                receive_record_event.first,
                receive_record_event.second,
                receive_record_event.storage_id
            )
        };
        Box::new(logger)
    }
}

impl Logger for PingEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |ping_event: &PingEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PING,
                secs_since_unix_epoch(ping_event.timestamp),
                first_seven_base64_chars(&ping_event.member),
                ping_event.candidate,
                ping_event.identifier
            )
        };
        Box::new(logger)
    }
}

impl Logger for PongEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |pong_event: &PongEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PONG,
                secs_since_unix_epoch(pong_event.timestamp),
                first_seven_base64_chars(&pong_event.member),
                pong_event.candidate,
                pong_event.identifier
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
