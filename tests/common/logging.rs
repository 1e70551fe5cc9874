use std::{io, sync::Once, thread};

use gossipy::types::PeerAddress;
use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

// Set up a logger that logs all log messages with the given level and above.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

pub(crate) fn log_with_context(address: Option<PeerAddress>, message: &str) {
    match address {
        Some(address) => log::info!("[{}] {}", address, message),
        None => log::info!("{}", message),
    }
}
