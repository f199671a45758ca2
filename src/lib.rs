pub use dmcore::{directory, protocol, reconciler, socketio, timeline};

// Core types and the event bus live in dmcore.
pub mod types {
    pub use dmcore::types::*;
}

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod messenger;
pub mod presence;
pub mod rest;
pub mod timer;
pub mod transport;
pub mod typing;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::{Client, SelectOutcome};
pub use config::ClientConfig;
pub use error::ClientError;
pub use messenger::{Messenger, MessengerBuilder};
