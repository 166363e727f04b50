//! Checkpoint records and the queries that select them.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use gantry_net::TensorData;
use serde::{Deserialize, Serialize};

/// A persisted snapshot of a run at one step.
///
/// Records are immutable once inserted into a store. The parameter map is
/// flat: dotted parameter path to tensor payload, which is what the restore
/// remapper operates on.
///
/// # Example
///
/// ```
/// use gantry_store::CheckpointRecord;
///
/// let record = CheckpointRecord::new("exp1", 25).with_metric("loss", 0.12);
/// assert_eq!(record.exp_id, "exp1");
/// assert_eq!(record.step, 25);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Experiment identifier.
    pub exp_id: String,

    /// Step counter at save time.
    pub step: u64,

    /// Flat dotted-path to tensor payload mapping.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, TensorData>,

    /// Arbitrary metric metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,

    /// Save timestamp (Unix epoch seconds).
    #[serde(default)]
    pub saved_at: u64,
}

impl CheckpointRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(exp_id: impl Into<String>, step: u64) -> Self {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            exp_id: exp_id.into(),
            step,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            saved_at,
        }
    }

    /// Attaches the flattened parameter mapping.
    #[must_use]
    pub fn with_params(mut self, params: BTreeMap<String, TensorData>) -> Self {
        self.params = params;
        self
    }

    /// Adds one metric value.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Returns true if the record carries parameter tensors.
    #[must_use]
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

/// Selects checkpoint records in a store.
///
/// Records are keyed at minimum by experiment identifier; `step` narrows
/// the selection to one exact step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Experiment identifier to match.
    pub exp_id: String,

    /// Exact step to match, or `None` for all steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
}

impl Query {
    /// Creates a query matching every record of an experiment.
    #[must_use]
    pub fn new(exp_id: impl Into<String>) -> Self {
        Self {
            exp_id: exp_id.into(),
            step: None,
        }
    }

    /// Narrows the query to one exact step.
    #[must_use]
    pub const fn at_step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }

    /// Returns true if the record matches this query.
    #[must_use]
    pub fn matches(&self, record: &CheckpointRecord) -> bool {
        record.exp_id == self.exp_id && self.step.is_none_or(|s| record.step == s)
    }
}
