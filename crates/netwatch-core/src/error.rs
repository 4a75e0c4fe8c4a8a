//! Error types for the agent pipeline.
//!
//! Each concern gets its own enum so callers can decide what is fatal:
//! storage initialisation and configuration errors end the process, delivery
//! errors are retried, and source errors only cost a single sample.

use thiserror::Error;

use crate::Timestamp;

/// Failures raised by the durable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage engine: {0}")]
    Engine(#[from] sled::Error),

    #[error("corrupt checkpoint value {0:?}")]
    CorruptCheckpoint(String),

    #[error("checkpoint may not move backward: current {current}, requested {requested}")]
    NonMonotonic {
        current: Timestamp,
        requested: Timestamp,
    },

    #[error("malformed key {0:?}")]
    MalformedKey(Vec<u8>),

    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failures of a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector answered with status {0}")]
    Status(u16),

    #[error("payload serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("writing spill file: {0}")]
    Spill(#[from] std::io::Error),

    #[error("delivery interrupted by shutdown")]
    Interrupted,
}

/// Failures of an observation source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0} is not available on this host")]
    Unavailable(&'static str),

    #[error("command `{command}` failed or timed out")]
    Command { command: String },

    #[error("could not parse {what} from probe output")]
    Parse { what: &'static str },

    #[error("probe request: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures detected while building configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} variable not set!")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },

    #[error("this program must be run as root")]
    NotRoot,

    #[error("no wireless interfaces detected")]
    NoWirelessInterface,
}

/// Umbrella error for a full delivery cycle.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
