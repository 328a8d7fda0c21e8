//! Key/value logging adapter over a `tracing`-based Cloud Logging backend.
//!
//! Code written against a flat "log key-value pairs" interface calls
//! [`Logger::log`] with `level, message, key, value, ...`; the adapter
//! validates the shape and emits one structured entry with severity, labels
//! and, depending on the level, caller location or a backtrace.
//!
//! ```ignore
//! use kv_log_driver::{kvlog, Logger};
//!
//! let logger = Logger::new_production(Some("checkout"), Some("1.4.0"), vec![])?;
//! kvlog!(logger, "info", "order placed", "order_id", 1234, "total", 99.5)?;
//! logger.sync()?;
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod field;
pub mod layer;
pub mod level;
pub mod logger;
pub mod memory_sink;
pub mod noop_sink;
pub mod record;
pub mod sink;
pub mod value;

pub use backend::{Backend, FatalAction, TracingBackend};
pub use config::{LoggerConfig, LoggerOption};
pub use error::{BuildError, FlushError, LogError, SinkError};
pub use field::{Field, ServiceContext, SourceLocation};
pub use level::Severity;
pub use logger::{KeyValLogger, Logger};
pub use value::KeyVal;
