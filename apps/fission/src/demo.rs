//! # Lattice Demo
//!
//! Two-lattice copy pipeline modelled on a multichannel audio plugin:
//!
//! ```text
//!              ┌─────────────┐     ┌──────────────┐
//!          ┌──▶│  capture0   │────▶│  playback0   │──┐
//! trigger ─┤   └─────────────┘     └──────────────┘  ├──▶ fusion
//!          └──▶│  capture1   │────▶│  playback1   │──┘
//!              └─────────────┘     └──────────────┘
//! ```
//!
//! Each period the driver writes one block of frames per channel, fires the
//! trigger, waits for the fusion and checks that every playback block equals
//! its capture block.

use fission_core::{
    FissionError, FusionRule, Pipeline, PipelineSettings, SignalMode, Slot, StageMetrics,
    TerminationPolicy,
};
use serde::Serialize;
use std::time::Duration;

/// Shape of a demo run.
#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    pub channels: usize,
    pub frames: usize,
    pub periods: u64,
    /// Longest wait for one period's fusion.
    pub timeout: Duration,
}

/// Outcome of a demo run.
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub channels: usize,
    pub frames: usize,
    pub periods: u64,
    pub verified_periods: u64,
    pub fusion_rounds: Option<u64>,
    pub stages: Vec<StageMetrics>,
}

impl DemoReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verified_periods == self.periods
    }
}

struct Channel {
    capture: Slot<Vec<i32>>,
    playback: Slot<Vec<i32>>,
}

/// Run the copy lattice for `options.periods` periods.
pub fn run_demo(options: &DemoOptions) -> Result<DemoReport, FissionError> {
    if options.channels == 0 || options.frames == 0 {
        return Err(FissionError::InvalidConfig(
            "demo needs at least one channel and one frame".to_string(),
        ));
    }

    let mut pipeline = Pipeline::new(PipelineSettings {
        signal: SignalMode::Counted,
        termination: TerminationPolicy::Propagate,
        fusion: FusionRule::All,
        stack_size: None,
    });
    let channels = build_lattice(&mut pipeline, options)?;
    pipeline.start()?;

    let mut verified_periods = 0u64;
    for period in 0..options.periods {
        for (index, channel) in channels.iter().enumerate() {
            channel.capture.update(|block| {
                for (frame, sample) in block.iter_mut().enumerate() {
                    *sample = test_sample(options, period, index, frame);
                }
            });
        }

        if !pipeline.cycle(options.timeout)? {
            pipeline.shutdown();
            return Err(FissionError::ProcessFailed(format!(
                "fusion timed out in period {}",
                period
            )));
        }

        let matched = channels.iter().all(|channel| {
            channel
                .capture
                .with(|input| channel.playback.with(|output| input == output))
        });
        if matched {
            verified_periods += 1;
        } else {
            tracing::warn!(period, "playback differs from capture");
        }
    }

    let metrics = pipeline.metrics();
    pipeline.shutdown();

    tracing::info!(
        periods = options.periods,
        verified = verified_periods,
        "demo finished"
    );

    Ok(DemoReport {
        channels: options.channels,
        frames: options.frames,
        periods: options.periods,
        verified_periods,
        fusion_rounds: metrics.fusion_rounds,
        stages: metrics.stages,
    })
}

fn build_lattice(
    pipeline: &mut Pipeline,
    options: &DemoOptions,
) -> Result<Vec<Channel>, FissionError> {
    let mut channels = Vec::with_capacity(options.channels);

    for index in 0..options.channels {
        let capture = Slot::new(vec![0i32; options.frames]);
        let staged = Slot::new(vec![0i32; options.frames]);
        let playback = Slot::new(vec![0i32; options.frames]);

        let input = {
            let (capture, staged) = (capture.clone(), staged.clone());
            pipeline.add_stage(
                format!("capture{}", index),
                Box::new(move || -> Result<(), FissionError> {
                    capture.with(|src| staged.update(|dst| dst.copy_from_slice(src)));
                    Ok(())
                }),
            )?
        };
        let output = {
            let playback = playback.clone();
            pipeline.add_stage(
                format!("playback{}", index),
                Box::new(move || -> Result<(), FissionError> {
                    staged.with(|src| playback.update(|dst| dst.copy_from_slice(src)));
                    Ok(())
                }),
            )?
        };

        pipeline.chain_to_trigger(input)?;
        pipeline.chain(input, output)?;
        pipeline.join(output)?;
        channels.push(Channel { capture, playback });
    }

    Ok(channels)
}

/// Deterministic sample that differs per channel, period and frame.
fn test_sample(options: &DemoOptions, period: u64, channel: usize, frame: usize) -> i32 {
    let position = period
        .wrapping_mul(options.frames as u64)
        .wrapping_add(frame as u64);
    position
        .wrapping_mul(options.channels as u64)
        .wrapping_add(channel as u64) as i32
}

// =============================================================================
// TESTS
// =============================================================================
