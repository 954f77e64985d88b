//! Integration tests for pipeline files, the run driver and the demo.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use fission::cli::{Cli, Commands, execute, load_config, run_pipeline};
use fission::demo::{DemoOptions, run_demo};
use fission_core::{FissionError, FusionRule, SignalMode, TerminationPolicy};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

const LOSSY_CHAIN: &str = r#"
[[stage]]
name = "source"
kind = "counter"
after = "trigger"

[[stage]]
name = "sink"
kind = "copy"
after = "source"
join = true
"#;

const CHAIN: &str = r#"
[pipeline]
signal = "counted"
termination = "propagate"
fusion = "all"

[[stage]]
name = "source"
kind = "counter"
after = "trigger"
params = { start = 1 }

[[stage]]
name = "gain"
kind = "scale"
after = "source"
params = { factor = 3 }

[[stage]]
name = "sink"
kind = "copy"
after = "gain"
join = true
"#;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// =============================================================================
// CONFIG LOADING TESTS
// =============================================================================

#[test]
fn test_load_config_parses_settings_and_stages() {
    let file = write_config(CHAIN);
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.pipeline.signal, SignalMode::Counted);
    assert_eq!(config.pipeline.termination, TerminationPolicy::Propagate);
    assert_eq!(config.pipeline.fusion, FusionRule::All);
    assert_eq!(config.stages.len(), 3);
    assert_eq!(config.stages[1].get("factor"), Some(3));
    assert_eq!(config.joined_count(), 1);
}

#[test]
fn test_load_config_quorum_rule() {
    let file = write_config(
        r#"
[pipeline]
fusion = { quorum = 2 }

[[stage]]
name = "only"
kind = "counter"
after = "trigger"
join = true
"#,
    );
    let config = load_config(file.path()).unwrap();
    assert_eq!(config.pipeline.fusion, FusionRule::Quorum(2));
    assert_eq!(config.pipeline.signal, SignalMode::Lossy);
}

#[test]
fn test_load_config_rejects_unknown_upstream() {
    let file = write_config(
        r#"
[[stage]]
name = "sink"
kind = "copy"
after = "missing"
"#,
    );
    assert!(matches!(
        load_config(file.path()),
        Err(FissionError::InvalidConfig(_))
    ));
}

#[test]
fn test_load_config_rejects_malformed_toml() {
    let file = write_config("[[stage]\nname = ");
    assert!(matches!(
        load_config(file.path()),
        Err(FissionError::InvalidConfig(_))
    ));
}

#[test]
fn test_load_config_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing: PathBuf = dir.path().join("absent.toml");
    assert!(matches!(
        load_config(&missing),
        Err(FissionError::IoError(_))
    ));
}

#[test]
fn test_load_config_rejects_directory() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_config(dir.path()),
        Err(FissionError::IoError(_))
    ));
}

// =============================================================================
// RUN TESTS
// =============================================================================

#[test]
fn test_run_chain_values_flow_downstream() {
    let file = write_config(CHAIN);
    let config = load_config(file.path()).unwrap();
    let outcome = run_pipeline(&config, 5, Duration::from_secs(5)).unwrap();

    assert_eq!(outcome.cycles_fused, Some(5));
    assert_eq!(outcome.metrics.trigger_fired, 5);
    // Counter publishes 1..=5; the last value reaches the sink scaled by 3.
    assert_eq!(outcome.values.get("source"), Some(&5));
    assert_eq!(outcome.values.get("gain"), Some(&15));
    assert_eq!(outcome.values.get("sink"), Some(&15));
    assert!(
        outcome
            .exits
            .values()
            .all(|exit| exit == "cancelled" || exit == "upstream closed")
    );
}

#[test]
fn test_run_default_settings_fuse_every_cycle() {
    let file = write_config(LOSSY_CHAIN);
    let config = load_config(file.path()).unwrap();
    assert_eq!(config.pipeline.signal, SignalMode::Lossy);

    for _ in 0..10 {
        let outcome = run_pipeline(&config, 5, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.cycles_fused, Some(5));
        // Counter publishes 0..=4.
        assert_eq!(outcome.values.get("sink"), Some(&4));
    }
}

#[test]
fn test_run_stops_at_failing_stage() {
    let file = write_config(
        r#"
[pipeline]
signal = "counted"
termination = "propagate"

[[stage]]
name = "source"
kind = "counter"
after = "trigger"

[[stage]]
name = "flaky"
kind = "fail"
after = "source"
params = { fail_after = 3 }

[[stage]]
name = "sink"
kind = "copy"
after = "flaky"
join = true
"#,
    );
    let config = load_config(file.path()).unwrap();
    let outcome = run_pipeline(&config, 10, Duration::from_millis(200)).unwrap();

    assert_eq!(outcome.cycles_fused, Some(2));
    let flaky = outcome
        .metrics
        .stages
        .iter()
        .find(|s| s.name == "flaky")
        .unwrap();
    assert_eq!(flaky.process_calls, 3);
    assert_eq!(flaky.completions, 2);
    assert!(outcome.exits["flaky"].contains("failed on call 3"));
    assert_eq!(outcome.exits["sink"], "upstream closed");
}

#[test]
fn test_run_without_joined_stages_only_fires() {
    let file = write_config(
        r#"
[[stage]]
name = "source"
kind = "counter"
after = "trigger"
"#,
    );
    let config = load_config(file.path()).unwrap();
    let outcome = run_pipeline(&config, 3, Duration::from_secs(5)).unwrap();

    assert_eq!(outcome.cycles_fused, None);
    assert_eq!(outcome.metrics.trigger_fired, 3);
    assert_eq!(outcome.metrics.stages[0].completions, 3);
    assert_eq!(outcome.values.get("source"), Some(&2));
}

#[test]
fn test_run_rejects_unknown_kind() {
    let file = write_config(
        r#"
[[stage]]
name = "odd"
kind = "reverb"
after = "trigger"
"#,
    );
    let config = load_config(file.path()).unwrap();
    assert!(run_pipeline(&config, 1, Duration::from_millis(10)).is_err());
}

// =============================================================================
// CLI TESTS
// =============================================================================

#[test]
fn test_cli_parses_run_arguments() {
    let cli = Cli::try_parse_from([
        "fission",
        "--json-mode",
        "run",
        "-c",
        "pipeline.toml",
        "--cycles",
        "7",
        "--timeout-ms",
        "250",
    ])
    .unwrap();

    assert!(cli.json_mode);
    match cli.command {
        Commands::Run {
            config,
            cycles,
            timeout_ms,
        } => {
            assert_eq!(config, PathBuf::from("pipeline.toml"));
            assert_eq!(cycles, 7);
            assert_eq!(timeout_ms, 250);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_cli_check_command_succeeds() {
    let file = write_config(CHAIN);
    let path = file.path().to_string_lossy().to_string();
    let cli = Cli::try_parse_from([
        "fission",
        "--quiet",
        "--json-mode",
        "check",
        "-c",
        path.as_str(),
    ])
    .unwrap();
    assert!(execute(cli).is_ok());
}

#[test]
fn test_cli_requires_a_command() {
    assert!(Cli::try_parse_from(["fission"]).is_err());
}

// =============================================================================
// DEMO TESTS
// =============================================================================

#[test]
fn test_demo_many_channels() {
    let report = run_demo(&DemoOptions {
        channels: 8,
        frames: 32,
        periods: 40,
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    assert!(report.passed());
    assert_eq!(report.fusion_rounds, Some(40));
    assert_eq!(report.stages.len(), 16);
}
