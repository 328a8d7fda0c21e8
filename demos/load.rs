use std::sync::Arc;
use std::time::Instant;

use kv_log_driver::noop_sink::NoopSink;
use kv_log_driver::{kvlog, Logger, LoggerOption};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = Logger::new_production(
        Some("load"),
        None,
        vec![
            LoggerOption::Sink(Arc::new(NoopSink)),
            LoggerOption::ChannelBuffer(16_384),
        ],
    )?;

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        kvlog!(logger, "info", "load test entry", "iteration", i)?;
    }
    logger.sync()?;

    let elapsed = start.elapsed();
    println!(
        "sent {} entries in {:?} (~{:.0} entries/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
