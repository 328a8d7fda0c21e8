use kv_log_driver::{kvlog, LogError, Logger, LoggerOption};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = Logger::new_production(
        Some("checkout"),
        Some(env!("CARGO_PKG_VERSION")),
        vec![LoggerOption::ConsoleMirror(true)],
    )?;

    kvlog!(logger, "info", "starting service", "port", 8080)?;
    kvlog!(logger, "warn", "cache cold", "entries", 0)?;
    kvlog!(logger, "err", "payment declined", "order_id", 1234, "amount", 99.5)?;

    // Malformed calls are logged at CRITICAL and reported back.
    if let Err(LogError::PairMismatch) = kvlog!(logger, "info", "dangling", "key") {
        println!("caught malformed call");
    }

    logger.sync()?;
    Ok(())
}
