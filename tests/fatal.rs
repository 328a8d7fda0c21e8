use kv_log_driver::sink::OutputTarget;
use kv_log_driver::{kvlog, Logger, LoggerOption};
use std::path::PathBuf;
use std::process::Command;

const CHILD_ENV: &str = "KV_LOG_DRIVER_FATAL_OUTPUT";

// The fatal path ends the process, so the test re-runs itself as a child.
#[test]
fn fatal_flushes_then_exits() {
    if let Ok(output) = std::env::var(CHILD_ENV) {
        let logger = Logger::new_production(
            None,
            None,
            vec![LoggerOption::Output(OutputTarget::File(PathBuf::from(output)))],
        )
        .unwrap();
        let _ = kvlog!(logger, "fatal", "dying", "reason", "disk gone");
        // Only reached if fatal returned.
        std::process::exit(0);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fatal.log");
    let status = Command::new(std::env::current_exe().unwrap())
        .args(["fatal_flushes_then_exits", "--exact", "--test-threads=1"])
        .env(CHILD_ENV, &path)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));

    let contents = std::fs::read_to_string(&path).unwrap();
    let entry: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["severity"], "EMERGENCY");
    assert!(entry["message"].as_str().unwrap().starts_with("dying\n"));
    assert_eq!(entry["logging.googleapis.com/labels"]["reason"], "disk gone");
}
