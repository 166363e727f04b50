//! Run configuration blocks: training, validation, saving, and loading.
//!
//! All blocks deserialize with defaults so a specification states only
//! what it overrides.

use std::collections::BTreeMap;

use gantry_store::{FilterMode, Query, RestoreFilter};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunError};

/// Training budget.
///
/// `num_steps` is an absolute target for the global step counter, not a
/// count of steps to execute: a run restored at step 50 with a budget of
/// 100 trains 50 more steps, and a restored counter already at or past
/// the budget trains zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    /// Absolute step-counter target.
    pub num_steps: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self { num_steps: 100 }
    }
}

/// Validation shape: how many evaluation batches one validation pass
/// averages over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParams {
    /// Batches per validation pass.
    pub num_steps: u64,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self { num_steps: 1 }
    }
}

/// Save and validation cadence, both in training steps. A frequency of
/// zero disables that activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveParams {
    /// Checkpoint every this many steps.
    pub metric_freq: u64,
    /// Validate every this many steps; zero disables.
    pub val_freq: u64,
}

impl Default for SaveParams {
    fn default() -> Self {
        Self {
            metric_freq: 25,
            val_freq: 0,
        }
    }
}

/// A restore filter as written in a specification.
///
/// A bare pattern string means inclusion; the explicit form names the
/// mode alongside the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    /// A bare pattern, interpreted as an inclusion filter.
    Pattern(String),
    /// A pattern with an explicit mode.
    Explicit {
        /// Regex over saved parameter paths.
        pattern: String,
        /// Include or exclude matching keys.
        #[serde(default)]
        mode: FilterMode,
    },
}

impl FilterSpec {
    /// Compiles the written form into a live filter.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` on an invalid pattern.
    pub fn compile(&self) -> Result<RestoreFilter> {
        let (pattern, mode) = match self {
            Self::Pattern(pattern) => (pattern.as_str(), FilterMode::Include),
            Self::Explicit { pattern, mode } => (pattern.as_str(), *mode),
        };
        RestoreFilter::new(pattern, mode)
            .map_err(|e| RunError::invalid_config("load_params.restore_params", e.to_string()))
    }
}

/// How a run begins: fresh, or revived from a stored checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadParams {
    /// Restore from the store before training.
    pub restore: bool,

    /// Which records to consider; defaults to the run's own experiment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,

    /// Saved-path to live-path rename table.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub restore_mapping: BTreeMap<String, String>,

    /// Filter over saved paths, applied before renaming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_params: Option<FilterSpec>,
}
