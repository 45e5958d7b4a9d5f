use anyhow::Result;
use biztools::utils::logger::{parse_log_level, setup_logger_in};
use tempfile::TempDir;
use tracing::Level;

// One global subscriber per test binary, so everything runs in a single test.
#[test]
fn test_setup_logger_creates_files_and_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;

    let first = setup_logger_in("nightly_load", Level::INFO, dir.path())?;
    assert_eq!(first.log_file, dir.path().join("nightly_load.log"));
    assert!(first.log_file.exists());

    let again = setup_logger_in("nightly_load", Level::DEBUG, dir.path())?;
    assert_eq!(again, first);
    assert_eq!(again.level, Level::INFO);

    let second = setup_logger_in("biztools.slack", parse_log_level("WARNING"), dir.path())?;
    assert_eq!(second.level, Level::WARN);
    assert!(dir.path().join("biztools.slack.log").exists());

    tracing::info!(target: "nightly_load", "load started");
    tracing::warn!(target: "biztools::slack", "slack is slow");
    Ok(())
}
