use std::sync::Arc;

use async_trait::async_trait;
use kv_log_driver::record::LogRecord;
use kv_log_driver::sink::LogSink;
use kv_log_driver::{kvlog, Logger, LoggerOption, SinkError};

/// Example of integrating a custom destination by implementing `LogSink`
/// directly. Imagine this talks to some proprietary collector for which
/// this crate does not provide a built-in sink.
struct MyCollectorSink;

#[async_trait]
impl LogSink for MyCollectorSink {
    async fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
        // Here you would call your own client library.
        println!("[my-collector] {}", record.to_cloud_json("timestamp"));
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sink: Arc<dyn LogSink> = Arc::new(MyCollectorSink);
    let logger = Logger::new_development(
        Some("collector-demo"),
        None,
        vec![LoggerOption::Sink(sink)],
    )?;

    kvlog!(logger, "debug", "custom sink example started")?;
    kvlog!(logger, "info", "sent via custom sink", "collector", "my-collector")?;

    logger.sync()?;
    Ok(())
}
