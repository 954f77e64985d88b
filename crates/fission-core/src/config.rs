//! # Pipeline Configuration
//!
//! Serializable description of a pipeline. The core only validates the
//! topology; what a stage `kind` means is decided by whoever turns a
//! [`StageSpec`] into a processor.
//!
//! ```toml
//! [pipeline]
//! signal = "counted"
//! termination = "propagate"
//! fusion = "all"
//!
//! [[stage]]
//! name = "source"
//! kind = "counter"
//! after = "trigger"
//!
//! [[stage]]
//! name = "gain"
//! kind = "scale"
//! after = "source"
//! join = true
//! params = { factor = 3 }
//! ```

use crate::join::FusionRule;
use crate::primitives::{MAX_STAGE_NAME_LENGTH, MAX_STAGES, TRIGGER_NAME};
use crate::{FissionError, SignalMode, TerminationPolicy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Protocol settings shared by every stage of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub signal: SignalMode,
    pub termination: TerminationPolicy,
    pub fusion: FusionRule,
    /// Stack size of stage threads in bytes; platform default if absent.
    pub stack_size: Option<usize>,
}

/// One stage of a configured pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub kind: String,
    /// Upstream stage name, or `"trigger"`. Absent means no predecessor.
    #[serde(default)]
    pub after: Option<String>,
    /// Contribute to the pipeline's fusion.
    #[serde(default)]
    pub join: bool,
    /// Kind-specific integer parameters.
    #[serde(default)]
    pub params: BTreeMap<String, i64>,
}

impl StageSpec {
    /// Create a spec with no predecessor, no join and no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            after: None,
            join: false,
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn after(mut self, upstream: impl Into<String>) -> Self {
        self.after = Some(upstream.into());
        self
    }

    #[must_use]
    pub fn joined(mut self) -> Self {
        self.join = true;
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Look up an integer parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<i64> {
        self.params.get(key).copied()
    }

    /// Check whether this stage is chained to the lattice head.
    #[must_use]
    pub fn follows_trigger(&self) -> bool {
        self.after.as_deref() == Some(TRIGGER_NAME)
    }
}

/// Complete pipeline description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageSpec>,
}

impl PipelineConfig {
    /// Check the stage topology.
    ///
    /// Cycles longer than a self-reference are accepted: the protocol does
    /// not detect them and neither does this check.
    pub fn validate(&self) -> Result<(), FissionError> {
        if self.stages.is_empty() {
            return Err(invalid("pipeline has no stages"));
        }
        if self.stages.len() > MAX_STAGES {
            return Err(invalid(format!(
                "{} stages exceeds maximum of {}",
                self.stages.len(),
                MAX_STAGES
            )));
        }

        let mut names = BTreeSet::new();
        for spec in &self.stages {
            validate_name(&spec.name)?;
            if !names.insert(spec.name.as_str()) {
                return Err(FissionError::DuplicateStage(spec.name.clone()));
            }
        }

        for spec in &self.stages {
            let Some(after) = spec.after.as_deref() else {
                continue;
            };
            if after == spec.name {
                return Err(invalid(format!("stage '{}' waits on itself", spec.name)));
            }
            if after != TRIGGER_NAME && !names.contains(after) {
                return Err(invalid(format!(
                    "stage '{}' waits on unknown stage '{}'",
                    spec.name, after
                )));
            }
        }

        Ok(())
    }

    /// Number of stages contributing to the fusion.
    #[must_use]
    pub fn joined_count(&self) -> usize {
        self.stages.iter().filter(|s| s.join).count()
    }
}

/// Check a stage name against the naming rules.
pub fn validate_name(name: &str) -> Result<(), FissionError> {
    if name.is_empty() {
        return Err(invalid("stage name is empty"));
    }
    if name.len() > MAX_STAGE_NAME_LENGTH {
        return Err(invalid(format!(
            "stage name '{}' is longer than {} bytes",
            name, MAX_STAGE_NAME_LENGTH
        )));
    }
    if name == TRIGGER_NAME {
        return Err(invalid(format!("'{}' is reserved", TRIGGER_NAME)));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> FissionError {
    FissionError::InvalidConfig(message.into())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> PipelineConfig {
        PipelineConfig {
            pipeline: PipelineSettings::default(),
            stages: vec![
                StageSpec::new("source", "counter").after(TRIGGER_NAME),
                StageSpec::new("sink", "copy").after("source").joined(),
            ],
        }
    }

    #[test]
    fn valid_chain_passes() {
        let config = chain();
        assert!(config.validate().is_ok());
        assert_eq!(config.joined_count(), 1);
        assert!(config.stages[0].follows_trigger());
    }

    #[test]
    fn empty_pipeline_rejected() {
        let config = PipelineConfig::default();
        assert!(matches!(
            config.validate(),
            Err(FissionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut config = chain();
        config.stages.push(StageSpec::new("sink", "copy"));
        assert!(matches!(
            config.validate(),
            Err(FissionError::DuplicateStage(name)) if name == "sink"
        ));
    }

    #[test]
    fn unknown_and_self_references_rejected() {
        let mut config = chain();
        config.stages[1].after = Some("nowhere".to_string());
        assert!(config.validate().is_err());

        config.stages[1].after = Some("sink".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn reserved_name_rejected() {
        let mut config = chain();
        config.stages[0].name = TRIGGER_NAME.to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn two_stage_cycle_is_accepted() {
        let config = PipelineConfig {
            pipeline: PipelineSettings::default(),
            stages: vec![
                StageSpec::new("a", "copy").after("b"),
                StageSpec::new("b", "copy").after("a"),
            ],
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn settings_default_when_missing() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"stage":[{"name":"only","kind":"counter","params":{"start":5}}]}"#,
        )
        .expect("parse");
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert_eq!(config.stages[0].get("start"), Some(5));
        assert!(!config.stages[0].join);
    }
}
