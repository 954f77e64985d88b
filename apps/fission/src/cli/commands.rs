//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::demo::{DemoOptions, run_demo};
use crate::stages::StageFactory;
use fission_core::{FissionError, Pipeline, PipelineConfig, PipelineMetrics};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// FILE LIMITS
// =============================================================================

/// Maximum pipeline file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), FissionError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| FissionError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(FissionError::InvalidConfig(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve a path and make sure it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, FissionError> {
    let canonical = path.canonicalize().map_err(|e| {
        FissionError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(FissionError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Read, parse and validate a pipeline file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, FissionError> {
    let validated_path = validate_file_path(path)?;
    validate_file_size(&validated_path, MAX_CONFIG_FILE_SIZE)?;

    let text = std::fs::read_to_string(&validated_path)
        .map_err(|e| FissionError::IoError(format!("Read file: {}", e)))?;
    let config: PipelineConfig = toml::from_str(&text).map_err(|e| {
        FissionError::InvalidConfig(format!("{}: {}", path.display(), e))
    })?;
    config.validate()?;

    tracing::debug!(
        path = %path.display(),
        stages = config.stages.len(),
        "loaded pipeline"
    );
    Ok(config)
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Result of driving a configured pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub cycles_requested: u64,
    /// Cycles whose fusion round completed; `None` without joined stages.
    pub cycles_fused: Option<u64>,
    /// Last value published by each stage.
    pub values: BTreeMap<String, i64>,
    /// How each stage thread ended.
    pub exits: BTreeMap<String, String>,
    pub metrics: PipelineMetrics,
}

/// Build, start and drive a pipeline, then shut it down.
///
/// With joined stages each cycle waits for its fusion round and the run
/// stops at the first timeout. Without them each fire waits for the stages
/// to park again instead, and the run waits once more before shutting down.
pub fn run_pipeline(
    config: &PipelineConfig,
    cycles: u64,
    timeout: Duration,
) -> Result<RunOutcome, FissionError> {
    let factory = StageFactory::new(config);
    let mut pipeline = Pipeline::from_config(config, |spec| factory.build(spec))?;
    pipeline.start()?;

    let mut cycles_fused = pipeline.fusion().map(|_| 0u64);
    for cycle in 0..cycles {
        match cycles_fused.as_mut() {
            Some(fused) => {
                if !pipeline.cycle(timeout)? {
                    tracing::warn!(cycle, "fusion timed out, stopping run");
                    break;
                }
                *fused += 1;
            }
            None => {
                if !pipeline.wait_ready(timeout) {
                    tracing::warn!(cycle, "stages still busy, firing anyway");
                }
                pipeline.fire();
            }
        }
    }
    if cycles_fused.is_none() && !pipeline.wait_ready(timeout) {
        tracing::warn!("stages still busy at shutdown");
    }

    let metrics = pipeline.metrics();
    let exits = pipeline
        .shutdown()
        .into_iter()
        .map(|report| {
            let exit = match report.result {
                Ok(exit) => exit.to_string(),
                Err(e) => format!("join failed: {}", e),
            };
            (report.name, exit)
        })
        .collect();

    Ok(RunOutcome {
        cycles_requested: cycles,
        cycles_fused,
        values: factory.values(),
        exits,
        metrics,
    })
}

/// Run a pipeline file.
pub fn cmd_run(
    path: &Path,
    cycles: u64,
    timeout: Duration,
    json_mode: bool,
    verbose: bool,
) -> Result<(), FissionError> {
    let config = load_config(path)?;
    tracing::info!("Running {:?} for {} cycles", path, cycles);
    let outcome = run_pipeline(&config, cycles, timeout)?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Fission Run");
    println!("===========");
    println!("Pipeline: {:?}", path);
    println!();
    println!("Cycles requested: {}", outcome.cycles_requested);
    match outcome.cycles_fused {
        Some(fused) => println!("Cycles fused:     {}", fused),
        None => println!("Cycles fused:     (no joined stages)"),
    }
    println!("Trigger fired:    {}", outcome.metrics.trigger_fired);
    println!();
    println!("Stages:");
    for stage in &outcome.metrics.stages {
        let value = outcome.values.get(&stage.name).copied().unwrap_or_default();
        let exit = outcome.exits.get(&stage.name).map(String::as_str).unwrap_or("-");
        println!("  {:<16} value={:<12} exit={}", stage.name, value, exit);
        if verbose {
            println!(
                "  {:<16} calls={} completions={} broadcasts={} fused={}",
                "",
                stage.process_calls,
                stage.completions,
                stage.broadcasts,
                stage.join_notifications
            );
        }
    }

    Ok(())
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Validate a pipeline file and build its stages without starting them.
pub fn cmd_check(path: &Path, json_mode: bool) -> Result<(), FissionError> {
    let config = load_config(path)?;
    let factory = StageFactory::new(&config);
    let pipeline = Pipeline::from_config(&config, |spec| factory.build(spec))?;

    if json_mode {
        let output = serde_json::json!({
            "valid": true,
            "stages": pipeline.len(),
            "joined": config.joined_count(),
            "settings": config.pipeline,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Pipeline OK: {:?}", path);
    println!("  Stages:      {}", pipeline.len());
    println!("  Joined:      {}", config.joined_count());
    println!("  Signal:      {:?}", config.pipeline.signal);
    println!("  Termination: {:?}", config.pipeline.termination);
    println!("  Fusion:      {:?}", config.pipeline.fusion);

    Ok(())
}

// =============================================================================
// DEMO COMMAND
// =============================================================================

/// Run the copy lattice demo.
pub fn cmd_demo(options: &DemoOptions, json_mode: bool, verbose: bool) -> Result<(), FissionError> {
    tracing::info!(
        "Demo: {} channels, {} frames, {} periods",
        options.channels,
        options.frames,
        options.periods
    );
    let report = run_demo(options)?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    } else {
        println!("Fission Lattice Demo");
        println!("====================");
        println!("Channels: {}", report.channels);
        println!("Frames:   {}", report.frames);
        println!(
            "Verified: {} / {} periods",
            report.verified_periods, report.periods
        );
        if verbose {
            println!();
            for stage in &report.stages {
                println!(
                    "  {:<16} calls={} completions={}",
                    stage.name, stage.process_calls, stage.completions
                );
            }
        }
    }

    if report.passed() {
        Ok(())
    } else {
        Err(FissionError::ProcessFailed(format!(
            "{} of {} periods did not copy cleanly",
            report.periods - report.verified_periods,
            report.periods
        )))
    }
}
