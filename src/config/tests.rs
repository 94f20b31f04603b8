use clap::Parser;
use serial_test::serial;

use super::*;

fn load_from_args(args: &[&str]) -> Result<Settings, LoadError> {
    let cli = CliArgs::parse_from(args);
    load(&cli)
}

#[test]
#[serial]
fn defaults_resolve() {
    let settings = load_from_args(&["spola"]).expect("default settings");
    assert_eq!(settings.server.addr.port(), 3100);
    assert_eq!(settings.sync.batch_size.get(), 100);
    assert_eq!(settings.cache.flush_interval_minutes, 60);
    assert!(settings.cache.enabled);
    assert!(settings.database.url.is_none());
}

#[test]
#[serial]
fn serve_overrides_win_over_defaults() {
    let settings = load_from_args(&[
        "spola",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--server-port",
        "8080",
        "--database-url",
        "postgres://override",
        "--sync-batch-size",
        "25",
        "--remote-base-url",
        "https://search.example.com/api/",
    ])
    .expect("settings with overrides");

    assert_eq!(settings.server.addr.to_string(), "0.0.0.0:8080");
    assert_eq!(settings.database.url.as_deref(), Some("postgres://override"));
    assert_eq!(settings.sync.batch_size.get(), 25);
    assert_eq!(settings.remote.base_url, "https://search.example.com/api/");
}

#[test]
#[serial]
fn environment_variables_are_applied() {
    // SAFETY: tests in this module are serialized; no other thread reads the
    // environment concurrently.
    unsafe {
        std::env::set_var("SPOLA__SYNC__BATCH_SIZE", "7");
    }
    let settings = load_from_args(&["spola"]).expect("settings from env");
    unsafe {
        std::env::remove_var("SPOLA__SYNC__BATCH_SIZE");
    }
    assert_eq!(settings.sync.batch_size.get(), 7);
}

#[test]
#[serial]
fn zero_batch_size_is_rejected() {
    let result = load_from_args(&["spola", "serve", "--sync-batch-size", "0"]);
    assert!(matches!(result, Err(LoadError::Invalid { key, .. }) if key == "sync.batch_size"));
}

#[test]
#[serial]
fn invalid_log_level_is_rejected() {
    let result = load_from_args(&["spola", "serve", "--log-level", "shout"]);
    assert!(matches!(result, Err(LoadError::Invalid { key, .. }) if key == "logging.level"));
}

#[test]
fn parse_fingerprintall_arguments() {
    let args = CliArgs::parse_from([
        "spola",
        "fingerprintall",
        "--database-url",
        "postgres://example",
        "--batch-size",
        "10",
    ]);

    match args.command.expect("fingerprintall command") {
        Command::FingerprintAll(run) => {
            assert_eq!(
                run.database.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(run.batch_size, Some(10));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_reset_arguments() {
    let args = CliArgs::parse_from(["spola", "reset", "--database-url", "postgres://example"]);

    match args.command.expect("reset command") {
        Command::Reset(reset) => {
            assert_eq!(
                reset.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
