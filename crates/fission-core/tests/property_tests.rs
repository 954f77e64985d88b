//! # Property-Based Tests
//!
//! Randomised checks of the stage protocol using proptest.
//!
//! Every case spawns real threads, so case counts are kept small.

#![allow(clippy::unwrap_used, clippy::panic)]

use fission_core::{
    FissionError, Fusion, FusionRule, JoinBarrier, Pipeline, PipelineSettings, SignalMode, Stage,
    StageExit, Trigger,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

fn mode_strategy() -> impl Strategy<Value = SignalMode> {
    prop_oneof![Just(SignalMode::Lossy), Just(SignalMode::Counted)]
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A stage failing on call k makes exactly k calls, k-1 broadcasts
    /// and k-1 join notifications, whatever the signal mode.
    #[test]
    fn failure_on_call_k_is_exact(k in 1u64..12, mode in mode_strategy()) {
        let trigger = Trigger::new(mode);
        let fusion = Arc::new(Fusion::new(FusionRule::Any));
        let mut calls = 0u64;
        let mut stage = Stage::new("k", move || -> Result<(), FissionError> {
            calls += 1;
            if calls == k {
                Err(FissionError::ProcessFailed("requested".to_string()))
            } else {
                Ok(())
            }
        })
        .with_signal_mode(mode);
        stage.attach_predecessor(&trigger);
        stage.attach_join(&fusion);
        stage.start().unwrap();

        while stage.is_running() {
            trigger.fire();
            thread::sleep(Duration::from_micros(100));
        }

        let exit = stage.join().unwrap();
        let failed_on_k = matches!(exit, StageExit::ProcessFailed { call, .. } if call == k);
        prop_assert!(failed_on_k);
        prop_assert_eq!(stage.process_calls(), k);
        prop_assert_eq!(stage.metrics().broadcasts, k - 1);
        prop_assert_eq!(fusion.fuse_count(), k - 1);
    }

    /// In a counted chain of any depth every stage sees every fire, and
    /// completions never increase along the chain.
    #[test]
    fn counted_chain_is_one_to_one(fires in 1u64..40, depth in 2usize..5) {
        let mut pipeline = Pipeline::new(PipelineSettings {
            signal: SignalMode::Counted,
            ..PipelineSettings::default()
        });
        let mut previous = None;
        for index in 0..depth {
            let id = pipeline
                .add_stage(
                    format!("s{}", index),
                    Box::new(|| -> Result<(), FissionError> { Ok(()) }),
                )
                .unwrap();
            match previous {
                None => pipeline.chain_to_trigger(id).unwrap(),
                Some(upstream) => pipeline.chain(upstream, id).unwrap(),
            }
            previous = Some(id);
        }
        pipeline.start().unwrap();

        for _ in 0..fires {
            pipeline.fire();
            let seen: Vec<u64> = pipeline
                .stages()
                .iter()
                .rev()
                .map(Stage::completions)
                .collect();
            // Sampled tail-first, so each value may only be <= the next one.
            prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        }

        let tail = pipeline.stages().last().unwrap();
        prop_assert!(eventually(|| tail.completions() == fires));
        for stage in pipeline.stages() {
            prop_assert_eq!(stage.completions(), fires);
        }
        pipeline.shutdown();
    }

    /// A fusion under the All rule completes exactly one round per cycle.
    #[test]
    fn fusion_round_per_cycle(width in 1usize..6, cycles in 1u64..15) {
        let mut pipeline = Pipeline::new(PipelineSettings {
            signal: SignalMode::Counted,
            fusion: FusionRule::All,
            ..PipelineSettings::default()
        });
        for index in 0..width {
            let id = pipeline
                .add_stage(
                    format!("w{}", index),
                    Box::new(|| -> Result<(), FissionError> { Ok(()) }),
                )
                .unwrap();
            pipeline.chain_to_trigger(id).unwrap();
            pipeline.join(id).unwrap();
        }
        pipeline.start().unwrap();

        for _ in 0..cycles {
            prop_assert!(pipeline.cycle(Duration::from_secs(5)).unwrap());
        }

        let fusion = Arc::clone(pipeline.fusion().unwrap());
        prop_assert_eq!(fusion.rounds(), cycles);
        prop_assert_eq!(fusion.fuse_count(), cycles * width as u64);
        prop_assert_eq!(fusion.pending(), 0);
        pipeline.shutdown();
    }
}

/// Custom join barriers plug into a stage like the built-in fusion.
#[test]
fn custom_join_barrier_is_accepted() {
    struct Recorder(std::sync::Mutex<Vec<u64>>);
    impl JoinBarrier for Recorder {
        fn fuse(&self) {
            let mut seen = self.0.lock().unwrap();
            let next = seen.len() as u64 + 1;
            seen.push(next);
        }
    }

    let trigger = Trigger::new(SignalMode::Counted);
    let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
    let mut stage = Stage::new("rec", || -> Result<(), FissionError> { Ok(()) });
    stage.attach_predecessor(&trigger);
    stage.attach_join(&recorder);
    stage.start().unwrap();

    for _ in 0..3 {
        trigger.fire();
    }
    assert!(eventually(|| stage.join_notifications() == 3));
    stage.cancel();
    stage.join().unwrap();

    assert_eq!(*recorder.0.lock().unwrap(), vec![1, 2, 3]);
}
