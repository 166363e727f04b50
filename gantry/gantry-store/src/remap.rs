//! Translating saved parameter mappings between parameter spaces.
//!
//! This is what lets a run continue under a changed architecture: renamed
//! layers are carried over through an explicit rename table, removed or
//! replaced layers are filtered out or dropped as shape mismatches, and
//! everything the live graph has that the snapshot lacks keeps its fresh
//! initialization. The whole module works on string keys and tensor
//! payloads only; no runtime is involved.

use std::collections::BTreeMap;

use gantry_net::{ParamSet, TensorData};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StoreError};

/// Whether a filter keeps matching keys or drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Only keys matching the pattern survive. This is the default when a
    /// raw pattern is supplied on its own.
    #[default]
    Include,
    /// Keys matching the pattern are dropped.
    Exclude,
}

/// A regex filter over saved parameter paths.
///
/// Applied to saved keys *before* the rename table is consulted, so a
/// filtered-out key can never reach the target space even if the table
/// names it.
///
/// # Example
///
/// ```
/// use gantry_store::RestoreFilter;
///
/// let filter = RestoreFilter::exclude("head").unwrap();
/// assert!(filter.retains("model.net.layer1.weight"));
/// assert!(!filter.retains("model.net.head.weight"));
/// ```
#[derive(Debug, Clone)]
pub struct RestoreFilter {
    pattern: Regex,
    mode: FilterMode,
}

impl RestoreFilter {
    /// Compiles a filter with an explicit mode.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidFilter` on an invalid pattern.
    pub fn new(pattern: &str, mode: FilterMode) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| StoreError::invalid_filter(e.to_string()))?;
        Ok(Self { pattern, mode })
    }

    /// Compiles an inclusion filter: only matching keys survive.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidFilter` on an invalid pattern.
    pub fn include(pattern: &str) -> Result<Self> {
        Self::new(pattern, FilterMode::Include)
    }

    /// Compiles an exclusion filter: matching keys are dropped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidFilter` on an invalid pattern.
    pub fn exclude(pattern: &str) -> Result<Self> {
        Self::new(pattern, FilterMode::Exclude)
    }

    /// Returns the filter mode.
    #[must_use]
    pub const fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Returns true if the key survives the filter.
    #[must_use]
    pub fn retains(&self, key: &str) -> bool {
        match self.mode {
            FilterMode::Include => self.pattern.is_match(key),
            FilterMode::Exclude => !self.pattern.is_match(key),
        }
    }
}

/// Translates a saved mapping into the target parameter space.
///
/// Order is filter-then-rename: keys dropped by `filter` never appear in
/// the result, regardless of the rename table. Surviving keys with an
/// entry in `table` are renamed to the entry's value; keys without an
/// entry pass through unchanged (identity mapping — it is the caller's
/// responsibility that the identity path exists in the target). The
/// remapper only renames and filters; it never invents structure.
#[must_use]
pub fn remap(
    saved: &BTreeMap<String, TensorData>,
    table: &BTreeMap<String, String>,
    filter: Option<&RestoreFilter>,
) -> BTreeMap<String, TensorData> {
    let mut mapped = BTreeMap::new();
    for (key, data) in saved {
        if !filter.is_none_or(|f| f.retains(key)) {
            continue;
        }
        let target = table.get(key).cloned().unwrap_or_else(|| key.clone());
        if mapped.insert(target.clone(), data.clone()).is_some() {
            warn!(
                source = %key,
                target = %target,
                "rename collision, later saved key wins"
            );
        }
    }
    mapped
}

/// One shape mismatch encountered while applying a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreMismatch {
    /// Destination parameter path.
    pub path: String,
    /// Shape carried by the snapshot.
    pub saved_shape: Vec<usize>,
    /// Shape of the live parameter.
    pub target_shape: Vec<usize>,
}

/// Outcome of applying a remapped snapshot to a live parameter set.
///
/// Mismatches and unused keys are non-fatal by design: a partial restore
/// (trunk restored, new head left at its fresh initialization) succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Paths whose values were overwritten from the snapshot.
    pub restored: Vec<String>,

    /// Paths skipped because shapes disagreed.
    pub mismatched: Vec<RestoreMismatch>,

    /// Snapshot paths with no destination in the live set.
    pub unused: Vec<String>,
}

impl RestoreReport {
    /// Returns true if every snapshot value landed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.unused.is_empty()
    }
}

/// Applies a remapped snapshot to a live parameter set.
///
/// `prefix` is the dotted namespace the set was flattened under at save
/// time (e.g. `"model.net."`); mapping keys outside that namespace, and
/// keys naming parameters the live set does not have, are reported as
/// unused. A value is written only when shapes match exactly; mismatches
/// are reported per parameter and skipped. Live parameters absent from
/// the mapping keep their current values.
pub fn apply(
    params: &mut ParamSet,
    prefix: &str,
    mapping: &BTreeMap<String, TensorData>,
) -> RestoreReport {
    let mut report = RestoreReport::default();

    for (path, data) in mapping {
        let Some(local) = path.strip_prefix(prefix) else {
            warn!(path = %path, "restore key outside target namespace");
            report.unused.push(path.clone());
            continue;
        };
        let Some(param) = params.get_mut(local) else {
            warn!(path = %path, "restore key has no destination parameter");
            report.unused.push(path.clone());
            continue;
        };
        if param.shape() != data.shape() {
            warn!(
                path = %path,
                saved = ?data.shape(),
                target = ?param.shape(),
                "restore shape mismatch, keeping current values"
            );
            report.mismatched.push(RestoreMismatch {
                path: path.clone(),
                saved_shape: data.shape().to_vec(),
                target_shape: param.shape().to_vec(),
            });
            continue;
        }
        match data.to_tensor() {
            Ok(tensor) => {
                if param.set_value(tensor).is_ok() {
                    report.restored.push(path.clone());
                }
            }
            Err(err) => {
                warn!(path = %path, error = %err, "restore payload unusable");
                report.mismatched.push(RestoreMismatch {
                    path: path.clone(),
                    saved_shape: data.shape().to_vec(),
                    target_shape: param.shape().to_vec(),
                });
            }
        }
    }

    report
}
