use std::error::Error;
use std::io;

/// Error returned by a [`LogSink`](crate::sink::LogSink).
///
/// Sinks talk to arbitrary destinations, so the error is left boxed.
pub type SinkError = Box<dyn Error + Send + Sync>;

/// Caller errors detected while validating a key/value log call.
///
/// None of these are transient: they describe a malformed call site and
/// retrying the same call yields the same error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    #[error("keyvals must hold an even number of items, at least two")]
    PairMismatch,

    #[error("the key of each pair of keyvals should be a string")]
    KeyNotString,

    #[error("the first key should be one of the log levels (info, err, error, debug, warn, fatal, panic, dpanic)")]
    LevelNotFound,
}

/// Error returned when a logger cannot be built from its configuration.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("cannot open log output {target:?}: {source}")]
    Output {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot start log worker: {0}")]
    Worker(#[source] io::Error),

    #[error("invalid logger config: {0}")]
    InvalidConfig(String),
}

/// Error returned by [`Logger::sync`](crate::logger::Logger::sync).
#[derive(thiserror::Error, Debug)]
pub enum FlushError {
    #[error("log sink flush failed: {0}")]
    Sink(#[source] SinkError),

    #[error("{0} log records were lost before reaching the sink")]
    Lost(u64),

    #[error("log worker is no longer running")]
    Closed,
}
