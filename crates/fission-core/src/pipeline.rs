//! # Pipeline Assembly
//!
//! Builds lattices of stages around one [`Trigger`] and at most one
//! [`Fusion`]:
//!
//! ```text
//!              ┌──────────┐     ┌───────────┐
//!          ┌──▶│  in[0]   │────▶│  out[0]   │──┐
//! trigger ─┤   └──────────┘     └───────────┘  ├──▶ fusion
//!          └──▶│  in[1]   │────▶│  out[1]   │──┘
//!              └──────────┘     └───────────┘
//! ```
//!
//! One cycle is `fire()` followed by `wait_fused()`: the trigger releases the
//! first layer, each layer releases the next, and the joined stages fuse.
//!
//! Under [`SignalMode::Lossy`] a broadcast only reaches stages already parked
//! in `wait()`. `start()` returns once every stage is parked, and `cycle()`
//! waits for the lattice to park again before firing.
//!
//! The pipeline owns its stages, so every `Weak` link between them stays
//! valid until the pipeline is shut down or dropped.

use crate::config::{PipelineConfig, PipelineSettings, StageSpec, validate_name};
use crate::join::Fusion;
use crate::primitives::{MAX_STAGES, READY_POLL_INTERVAL, START_READY_TIMEOUT};
use crate::signal::{Signal, Trigger};
use crate::stage::{Processable, Stage};
use crate::system::PipelineMetrics;
use crate::{FissionError, SignalMode, StageExit, StageId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exit of one stage collected by [`Pipeline::shutdown`].
#[derive(Debug)]
pub struct StageReport {
    pub name: String,
    pub result: Result<StageExit, FissionError>,
}

/// A set of linked stages with a common trigger and fusion.
#[derive(Debug)]
pub struct Pipeline {
    settings: PipelineSettings,
    trigger: Trigger,
    stages: Vec<Stage>,
    names: BTreeMap<String, StageId>,
    joined: BTreeSet<StageId>,
    fusion: Option<Arc<Fusion>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineSettings::default())
    }
}

impl Pipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            trigger: Trigger::new(settings.signal),
            stages: Vec::new(),
            names: BTreeMap::new(),
            joined: BTreeSet::new(),
            fusion: None,
        }
    }

    /// Build and link a pipeline from a validated configuration.
    ///
    /// `factory` turns each [`StageSpec`] into its processor.
    pub fn from_config<F>(config: &PipelineConfig, mut factory: F) -> Result<Self, FissionError>
    where
        F: FnMut(&StageSpec) -> Result<Box<dyn Processable>, FissionError>,
    {
        config.validate()?;

        let mut pipeline = Self::new(config.pipeline);
        for spec in &config.stages {
            pipeline.add_stage(spec.name.clone(), factory(spec)?)?;
        }

        for spec in &config.stages {
            let id = pipeline.stage_id(&spec.name)?;
            if spec.follows_trigger() {
                pipeline.chain_to_trigger(id)?;
            } else if let Some(after) = spec.after.as_deref() {
                let upstream = pipeline.stage_id(after)?;
                pipeline.chain(upstream, id)?;
            }
            if spec.join {
                pipeline.join(id)?;
            }
        }

        Ok(pipeline)
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    // =========================================================================
    // TOPOLOGY
    // =========================================================================

    /// Add an idle stage using the pipeline's settings.
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        processor: Box<dyn Processable>,
    ) -> Result<StageId, FissionError> {
        let name = name.into();
        validate_name(&name)?;
        if self.names.contains_key(&name) {
            return Err(FissionError::DuplicateStage(name));
        }
        if self.stages.len() >= MAX_STAGES {
            return Err(FissionError::InvalidConfig(format!(
                "pipeline is limited to {} stages",
                MAX_STAGES
            )));
        }

        let id = StageId(self.stages.len());
        let stage = Stage::boxed(name.clone(), processor)
            .with_signal_mode(self.settings.signal)
            .with_termination(self.settings.termination)
            .with_stack_size(self.settings.stack_size);
        self.stages.push(stage);
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn stage(&self, id: StageId) -> Result<&Stage, FissionError> {
        self.stages
            .get(id.0)
            .ok_or_else(|| FissionError::UnknownStage(id.to_string()))
    }

    pub fn stage_id(&self, name: &str) -> Result<StageId, FissionError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| FissionError::UnknownStage(name.to_string()))
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Make `id` wait on the pipeline trigger.
    pub fn chain_to_trigger(&self, id: StageId) -> Result<(), FissionError> {
        self.stage(id)?.attach_predecessor(&self.trigger);
        Ok(())
    }

    /// Make `downstream` wait on `upstream`.
    pub fn chain(&self, upstream: StageId, downstream: StageId) -> Result<(), FissionError> {
        let upstream = self.stage(upstream)?;
        self.stage(downstream)?.attach_predecessor(upstream);
        Ok(())
    }

    /// Make `id` contribute to the pipeline fusion, creating it on first use.
    ///
    /// Joining a stage that is already joined changes nothing.
    pub fn join(&mut self, id: StageId) -> Result<(), FissionError> {
        self.stage(id)?;
        if !self.joined.insert(id) {
            return Ok(());
        }

        let rule = self.settings.fusion;
        let fusion = Arc::clone(
            self.fusion
                .get_or_insert_with(|| Arc::new(Fusion::new(rule))),
        );
        self.stage(id)?.attach_join(&fusion);
        fusion.add_contributor();
        Ok(())
    }

    #[must_use]
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    #[must_use]
    pub fn fusion(&self) -> Option<&Arc<Fusion>> {
        self.fusion.as_ref()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start every stage in order and wait for them to park.
    ///
    /// If one fails to start, the stages already started are cancelled and
    /// joined before the error is returned.
    pub fn start(&mut self) -> Result<(), FissionError> {
        for index in 0..self.stages.len() {
            if let Err(e) = self.stages[index].start() {
                tracing::warn!(
                    stage = %self.stages[index].name(),
                    error = %e,
                    "stage failed to start, rolling back"
                );
                self.rollback(index);
                return Err(e);
            }
        }
        if !self.wait_ready(START_READY_TIMEOUT) {
            tracing::warn!("not every stage parked after start");
        }
        tracing::info!(stages = self.stages.len(), "pipeline started");
        Ok(())
    }

    /// Block until every running stage is parked on its predecessor.
    ///
    /// A parked stage cannot miss its predecessor's next broadcast, even
    /// under [`SignalMode::Lossy`]. Returns `false` on timeout.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let Some((signal, expected)) = self.first_unparked() else {
                return true;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(expected, parked = signal.parked(), "stages not parked");
                return false;
            }
            signal.wait_parked(expected, remaining.min(READY_POLL_INTERVAL));
        }
    }

    /// A predecessor signal with fewer parked waiters than running stages on it.
    fn first_unparked(&self) -> Option<(Arc<dyn Signal>, usize)> {
        let mut groups: Vec<(Arc<dyn Signal>, usize)> = Vec::new();
        for stage in self.stages.iter().filter(|stage| stage.is_running()) {
            let Some(signal) = stage.predecessor_signal() else {
                continue;
            };
            match groups.iter_mut().find(|(known, _)| Arc::ptr_eq(known, &signal)) {
                Some((_, count)) => *count += 1,
                None => groups.push((signal, 1)),
            }
        }
        groups
            .into_iter()
            .find(|(signal, expected)| signal.parked() < *expected)
    }

    fn rollback(&mut self, started: usize) {
        for stage in &self.stages[..started] {
            stage.cancel();
        }
        for stage in &mut self.stages[..started] {
            if let Err(e) = stage.join() {
                tracing::warn!(stage = %stage.name(), error = %e, "rollback join failed");
            }
        }
    }

    /// Wake every stage chained to the trigger.
    ///
    /// Under [`SignalMode::Lossy`] only parked stages see this; see
    /// [`Pipeline::wait_ready`].
    pub fn fire(&self) {
        self.trigger.fire();
    }

    /// Wait for the fusion to complete a round.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_fused(&self, timeout: Duration) -> Result<bool, FissionError> {
        let fusion = self.fusion.as_ref().ok_or_else(|| {
            FissionError::InvalidConfig("pipeline has no joined stages".to_string())
        })?;
        Ok(fusion.wait_fused_timeout(timeout))
    }

    /// Fire the trigger and wait for the resulting fusion round.
    ///
    /// Under [`SignalMode::Lossy`] the lattice is first given up to
    /// `timeout` to park again.
    pub fn cycle(&self, timeout: Duration) -> Result<bool, FissionError> {
        if self.settings.signal == SignalMode::Lossy && !self.wait_ready(timeout) {
            tracing::warn!("firing before every stage parked");
        }
        self.fire();
        self.wait_fused(timeout)
    }

    /// Stop and join every started stage.
    ///
    /// Cancels all stages, then closes the trigger and every stage signal so
    /// no thread stays blocked. Closed signals stay closed: a pipeline is not
    /// restarted after shutdown.
    pub fn shutdown(&mut self) -> Vec<StageReport> {
        // Every flag is raised before any waiter is released.
        for stage in &self.stages {
            stage.raise_cancel();
        }
        for stage in &self.stages {
            stage.interrupt_wait();
        }
        self.trigger.close();
        for stage in &self.stages {
            stage.signal().close();
        }

        let reports: Vec<StageReport> = self
            .stages
            .iter_mut()
            .filter(|stage| stage.is_started())
            .map(|stage| StageReport {
                name: stage.name().to_string(),
                result: stage.join(),
            })
            .collect();

        tracing::info!(joined = reports.len(), "pipeline shut down");
        reports
    }

    /// Snapshot every stage.
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            trigger_fired: self.trigger.signal().generation(),
            fusion_rounds: self.fusion.as_ref().map(|f| f.rounds()),
            stages: self.stages.iter().map(Stage::metrics).collect(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.stages.iter().any(Stage::is_started) {
            self.shutdown();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
