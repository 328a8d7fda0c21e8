use crate::error::SinkError;
use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of the adapter and its layer without
/// any I/O, and for tests that only care about returned errors.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kvlog, Logger, LoggerOption};
    use std::sync::Arc;

    #[test]
    fn test_noop_sink_accepts_everything() {
        let logger = Logger::new_production(
            None,
            None,
            vec![LoggerOption::Sink(Arc::new(NoopSink))],
        )
        .unwrap();
        kvlog!(logger, "info", "dropped", "k", 1).unwrap();
        kvlog!(logger, "err", "also dropped").unwrap();
        logger.sync().unwrap();
    }
}
