//! # Concrete Stage Kinds
//!
//! Integer processors selected by the `kind` of a [`StageSpec`]:
//!
//! | kind      | params                 | behaviour                                  |
//! |-----------|------------------------|--------------------------------------------|
//! | `counter` | `start`, `step`        | publishes `start`, `start + step`, ...     |
//! | `copy`    |                        | publishes its upstream value               |
//! | `scale`   | `factor` (required)    | publishes upstream value times `factor`    |
//! | `fail`    | `fail_after` (required)| copies upstream, fails on call `fail_after`|
//!
//! Every stage owns one [`Slot`] named after it. A stage reads the slot of
//! the stage it waits on, so values flow along the same edges as the
//! signals.

use fission_core::{FissionError, PipelineConfig, Processable, Slot, StageSpec};
use std::collections::BTreeMap;

/// Builds processors for a configured pipeline and keeps their output slots.
#[derive(Debug, Default)]
pub struct StageFactory {
    slots: BTreeMap<String, Slot<i64>>,
}

impl StageFactory {
    /// Create one output slot per configured stage.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let slots = config
            .stages
            .iter()
            .map(|spec| (spec.name.clone(), Slot::new(0)))
            .collect();
        Self { slots }
    }

    /// Output slot of a stage.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&Slot<i64>> {
        self.slots.get(name)
    }

    /// Last published value of every stage, by name.
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, i64> {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.read()))
            .collect()
    }

    /// Turn a spec into its processor.
    pub fn build(&self, spec: &StageSpec) -> Result<Box<dyn Processable>, FissionError> {
        let output = self.own_slot(spec)?;

        let processor: Box<dyn Processable> = match spec.kind.as_str() {
            "counter" => Box::new(Counter {
                next: spec.get("start").unwrap_or(0),
                step: spec.get("step").unwrap_or(1),
                output,
            }),
            "copy" => Box::new(Scale {
                input: self.upstream_slot(spec)?,
                factor: 1,
                output,
            }),
            "scale" => Box::new(Scale {
                input: self.upstream_slot(spec)?,
                factor: required(spec, "factor")?,
                output,
            }),
            "fail" => {
                let fail_after = required(spec, "fail_after")?;
                if fail_after < 1 {
                    return Err(FissionError::InvalidConfig(format!(
                        "stage '{}': fail_after must be at least 1",
                        spec.name
                    )));
                }
                let input = match spec.after.as_deref() {
                    Some(after) => self.slots.get(after).cloned(),
                    None => None,
                };
                Box::new(FailAfter {
                    calls: 0,
                    fail_after: fail_after as u64,
                    input,
                    output,
                })
            }
            other => {
                return Err(FissionError::InvalidConfig(format!(
                    "stage '{}' has unknown kind '{}'",
                    spec.name, other
                )));
            }
        };

        tracing::debug!(stage = %spec.name, kind = %spec.kind, "built stage");
        Ok(processor)
    }

    fn own_slot(&self, spec: &StageSpec) -> Result<Slot<i64>, FissionError> {
        self.slots
            .get(&spec.name)
            .cloned()
            .ok_or_else(|| FissionError::UnknownStage(spec.name.clone()))
    }

    fn upstream_slot(&self, spec: &StageSpec) -> Result<Slot<i64>, FissionError> {
        spec.after
            .as_deref()
            .and_then(|after| self.slots.get(after))
            .cloned()
            .ok_or_else(|| {
                FissionError::InvalidConfig(format!(
                    "stage '{}' of kind '{}' must wait on another stage",
                    spec.name, spec.kind
                ))
            })
    }
}

fn required(spec: &StageSpec, key: &str) -> Result<i64, FissionError> {
    spec.get(key).ok_or_else(|| {
        FissionError::InvalidConfig(format!(
            "stage '{}' of kind '{}' needs parameter '{}'",
            spec.name, spec.kind, key
        ))
    })
}

// =============================================================================
// PROCESSORS
// =============================================================================

struct Counter {
    next: i64,
    step: i64,
    output: Slot<i64>,
}

impl Processable for Counter {
    fn process(&mut self) -> Result<(), FissionError> {
        self.output.publish(self.next);
        self.next = self.next.saturating_add(self.step);
        Ok(())
    }
}

/// Also serves `copy` with a factor of 1.
struct Scale {
    input: Slot<i64>,
    factor: i64,
    output: Slot<i64>,
}

impl Processable for Scale {
    fn process(&mut self) -> Result<(), FissionError> {
        self.output
            .publish(self.input.read().saturating_mul(self.factor));
        Ok(())
    }
}

struct FailAfter {
    calls: u64,
    fail_after: u64,
    input: Option<Slot<i64>>,
    output: Slot<i64>,
}

impl Processable for FailAfter {
    fn process(&mut self) -> Result<(), FissionError> {
        self.calls += 1;
        if self.calls >= self.fail_after {
            return Err(FissionError::ProcessFailed(format!(
                "configured to fail on call {}",
                self.fail_after
            )));
        }
        if let Some(input) = &self.input {
            self.output.publish(input.read());
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
