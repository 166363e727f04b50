//! The run lifecycle controller.
//!
//! A runner owns one trainable unit, one batch provider, one document
//! store, and the global step counter. Training drives the counter toward
//! an absolute budget, checkpointing and validating on their configured
//! cadences; reviving a run restores the counter along with the
//! parameters, so a finished experiment revived under the same budget
//! trains nothing further.

use gantry_store::{CheckpointRecord, DocumentStore, Query, RestoreReport, StoreError};
use gantry_net::Mode;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, warn};

use crate::builder::{Component, GraphBuilder};
use crate::config::{LoadParams, SaveParams, TrainParams, ValidationParams};
use crate::data::DataProvider;
use crate::error::{Result, RunError};
use crate::model::Model;
use crate::registry::CapabilityRegistry;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Assembled, never stepped or restored.
    Built,
    /// Parameters and step counter loaded from a checkpoint.
    Restored,
    /// Inside the training loop.
    Training,
    /// Inside a validation pass.
    Validating,
    /// Training budget reached.
    Terminated,
}

const fn due(freq: u64, step: u64) -> bool {
    freq > 0 && step % freq == 0
}

/// Drives one experiment end to end.
pub struct Runner {
    exp_id: String,
    model: Model,
    provider: Box<dyn DataProvider>,
    store: Box<dyn DocumentStore>,
    train_params: TrainParams,
    validation_params: ValidationParams,
    save_params: SaveParams,
    load_params: LoadParams,
    global_step: u64,
    state: RunState,
    last_restore: Option<RestoreReport>,
}

impl Runner {
    /// Assembles a runner from its parts. The step counter starts at zero
    /// and nothing is restored; see [`Runner::restore`].
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        exp_id: impl Into<String>,
        model: Model,
        provider: Box<dyn DataProvider>,
        store: Box<dyn DocumentStore>,
        train_params: TrainParams,
        validation_params: ValidationParams,
        save_params: SaveParams,
        load_params: LoadParams,
    ) -> Self {
        Self {
            exp_id: exp_id.into(),
            model,
            provider,
            store,
            train_params,
            validation_params,
            save_params,
            load_params,
            global_step: 0,
            state: RunState::Built,
            last_restore: None,
        }
    }

    /// Builds a runner from a specification node and performs the restore
    /// when `load_params.restore` asks for one.
    ///
    /// # Errors
    ///
    /// Returns builder errors for a malformed specification, an
    /// `InvalidConfiguration` when the root node does not build a runner,
    /// and restore errors when a requested restore finds no checkpoint.
    pub fn from_spec(registry: &CapabilityRegistry, spec: &Value) -> Result<Self> {
        let mut runner = match GraphBuilder::new(registry).build(spec)? {
            Component::Runner(runner) => runner,
            other => {
                return Err(RunError::invalid_config(
                    "<root>",
                    format!("top-level node built a {}, expected a runner", other.kind()),
                ))
            }
        };
        if runner.load_params.restore {
            runner.restore()?;
        }
        Ok(runner)
    }

    /// Returns the experiment identifier.
    #[must_use]
    pub fn exp_id(&self) -> &str {
        &self.exp_id
    }

    /// Returns the global step counter.
    #[must_use]
    pub const fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Returns the trainable unit.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the document store.
    #[must_use]
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Returns the report of the most recent restore, if one happened.
    #[must_use]
    pub fn last_restore(&self) -> Option<&RestoreReport> {
        self.last_restore.as_ref()
    }

    /// Restores parameters and the step counter from the store.
    ///
    /// The most recent record matching `load_params.query` (by default,
    /// this experiment) is remapped through the rename table and filter
    /// and applied to the live parameters. Per-parameter mismatches and
    /// unused keys are reported, never fatal; a missing record is.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Persistence` when no record matches the query or
    /// the store cannot be read, and `RunError::InvalidConfiguration` for
    /// an invalid restore filter.
    pub fn restore(&mut self) -> Result<RestoreReport> {
        let query = self
            .load_params
            .query
            .clone()
            .unwrap_or_else(|| Query::new(&self.exp_id));
        let record = self.store.latest(&query)?.ok_or_else(|| {
            StoreError::unavailable(format!(
                "no checkpoint record matches experiment '{}'",
                query.exp_id
            ))
        })?;

        let filter = match &self.load_params.restore_params {
            Some(spec) => Some(spec.compile()?),
            None => None,
        };
        let mapped = gantry_store::remap(
            &record.params,
            &self.load_params.restore_mapping,
            filter.as_ref(),
        );
        let report = self.model.apply_restore(&mapped);

        info!(
            exp_id = %self.exp_id,
            step = record.step,
            restored = report.restored.len(),
            mismatched = report.mismatched.len(),
            unused = report.unused.len(),
            "restored checkpoint"
        );
        self.global_step = record.step;
        self.state = RunState::Restored;
        self.last_restore = Some(report.clone());
        Ok(report)
    }

    /// Trains until the global step counter reaches the budget.
    ///
    /// Each step pulls a batch, runs the canonical update sequence, and
    /// advances the counter. Validation runs every `val_freq` steps and a
    /// checkpoint is saved every `metric_freq` steps; a failed save is
    /// logged and training continues.
    ///
    /// # Errors
    ///
    /// Returns provider and numeric errors; save failures do not abort.
    pub fn train(&mut self) -> Result<()> {
        let budget = self.train_params.num_steps;
        if self.global_step >= budget {
            info!(
                exp_id = %self.exp_id,
                step = self.global_step,
                budget,
                "step counter already at budget, nothing to train"
            );
            self.state = RunState::Terminated;
            return Ok(());
        }

        info!(exp_id = %self.exp_id, from = self.global_step, to = budget, "training");
        self.state = RunState::Training;
        self.model.set_mode(Mode::Train);

        while self.global_step < budget {
            let batch = self.provider.next_batch(Mode::Train)?;
            let loss = self.model.step(&batch)?;
            self.global_step += 1;
            debug!(step = self.global_step, loss, "training step");

            let mut val_loss = None;
            if due(self.save_params.val_freq, self.global_step) {
                val_loss = Some(self.validate()?);
            }
            if due(self.save_params.metric_freq, self.global_step) {
                if let Err(err) = self.save_snapshot(loss, val_loss) {
                    warn!(
                        step = self.global_step,
                        error = %err,
                        "checkpoint save failed, continuing"
                    );
                }
            }
        }

        info!(exp_id = %self.exp_id, step = self.global_step, "training complete");
        self.state = RunState::Terminated;
        Ok(())
    }

    /// Runs one validation pass: `validation_params.num_steps` evaluation
    /// batches, averaged. The global step counter does not move and the
    /// model returns to training mode afterwards, on failure included.
    ///
    /// # Errors
    ///
    /// Returns provider and numeric errors.
    #[allow(clippy::cast_precision_loss)]
    pub fn validate(&mut self) -> Result<f64> {
        let steps = self.validation_params.num_steps.max(1);
        let resume = self.state;
        self.state = RunState::Validating;
        self.model.set_mode(Mode::Eval);

        let result = self.eval_pass(steps);

        // Mode and state come back even when the pass failed partway.
        self.model.set_mode(Mode::Train);
        self.state = resume;
        let mean = result? / steps as f64;
        debug!(exp_id = %self.exp_id, step = self.global_step, val_loss = mean, "validated");
        Ok(mean)
    }

    fn eval_pass(&mut self, steps: u64) -> Result<f64> {
        let mut total = 0.0_f64;
        for _ in 0..steps {
            let batch = self.provider.next_batch(Mode::Eval)?;
            total += f64::from(self.model.eval_step(&batch)?);
        }
        Ok(total)
    }

    /// Runs one standalone evaluation pass and persists its result as a
    /// metrics-only record at the current step.
    ///
    /// # Errors
    ///
    /// Returns provider, numeric, and persistence errors.
    pub fn test(&mut self) -> Result<f64> {
        let val_loss = self.validate()?;
        let record =
            CheckpointRecord::new(&self.exp_id, self.global_step).with_metric("val_loss", val_loss);
        self.store.insert(record)?;
        info!(exp_id = %self.exp_id, step = self.global_step, val_loss, "test pass recorded");
        Ok(val_loss)
    }

    fn save_snapshot(&mut self, loss: f32, val_loss: Option<f64>) -> gantry_store::Result<()> {
        let mut record = CheckpointRecord::new(&self.exp_id, self.global_step)
            .with_params(self.model.flatten_params())
            .with_metric("loss", f64::from(loss));
        if let Some(val_loss) = val_loss {
            record = record.with_metric("val_loss", val_loss);
        }
        debug!(exp_id = %self.exp_id, step = self.global_step, "saving checkpoint");
        self.store.insert(record)
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("exp_id", &self.exp_id)
            .field("global_step", &self.global_step)
            .field("state", &self.state)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterSpec;
    use crate::data::ConstantProvider;
    use crate::model::Model;
    use crate::optimizer::{OptimizerAdapter, Sgd, SgdOptions};
    use gantry_net::{DevicePlan, Linear, MseLoss};
    use gantry_store::MemoryStore;

    fn unit(seed: u64) -> Model {
        Model::assemble(
            "model",
            Box::new(Linear::new(2, 1).unwrap()),
            Box::new(MseLoss),
            OptimizerAdapter::new(Box::new(Sgd::new(SgdOptions {
                lr: 0.05,
                ..SgdOptions::default()
            }))),
            DevicePlan::local(),
            seed,
        )
        .unwrap()
    }

    fn runner_with_store(
        store: Box<dyn DocumentStore>,
        num_steps: u64,
        metric_freq: u64,
        load_params: LoadParams,
    ) -> Runner {
        Runner::assemble(
            "exp1",
            unit(42),
            Box::new(ConstantProvider::new(4, 2, 1).unwrap()),
            store,
            TrainParams { num_steps },
            ValidationParams { num_steps: 2 },
            SaveParams {
                metric_freq,
                val_freq: 0,
            },
            load_params,
        )
    }

    #[test]
    fn train_reaches_budget_and_terminates() {
        let store = MemoryStore::new();
        let mut runner =
            runner_with_store(Box::new(store.clone()), 20, 10, LoadParams::default());

        assert_eq!(runner.state(), RunState::Built);
        runner.train().unwrap();

        assert_eq!(runner.state(), RunState::Terminated);
        assert_eq!(runner.global_step(), 20);
        let records = store.find(&Query::new("exp1")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].step, 10);
        assert_eq!(records[1].step, 20);
        assert!(records.iter().all(CheckpointRecord::has_params));
    }

    #[test]
    fn saved_metrics_trend_downward_on_constant_batch() {
        let store = MemoryStore::new();
        let mut runner =
            runner_with_store(Box::new(store.clone()), 50, 25, LoadParams::default());
        runner.train().unwrap();

        let records = store.find(&Query::new("exp1")).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].metrics["loss"] < records[0].metrics["loss"]);
    }

    #[test]
    fn restore_resumes_the_step_counter() {
        let store = MemoryStore::new();
        let mut first =
            runner_with_store(Box::new(store.clone()), 50, 25, LoadParams::default());
        first.train().unwrap();

        let mut revived = runner_with_store(
            Box::new(store.clone()),
            100,
            25,
            LoadParams {
                restore: true,
                ..LoadParams::default()
            },
        );
        let report = revived.restore().unwrap();
        assert!(report.is_clean());
        assert_eq!(revived.state(), RunState::Restored);
        assert_eq!(revived.global_step(), 50);

        revived.train().unwrap();
        assert_eq!(revived.global_step(), 100);
        let records = store.find(&Query::new("exp1")).unwrap();
        assert_eq!(records.last().unwrap().step, 100);
    }

    #[test]
    fn restore_at_budget_trains_nothing() {
        let store = MemoryStore::new();
        let mut first =
            runner_with_store(Box::new(store.clone()), 50, 25, LoadParams::default());
        first.train().unwrap();

        let mut revived = runner_with_store(Box::new(store), 50, 25, LoadParams::default());
        revived.restore().unwrap();
        revived.train().unwrap();

        assert_eq!(revived.global_step(), 50);
        assert_eq!(revived.state(), RunState::Terminated);
    }

    #[test]
    fn restore_without_record_is_fatal() {
        let mut runner = runner_with_store(
            Box::new(MemoryStore::new()),
            50,
            25,
            LoadParams::default(),
        );
        assert!(matches!(
            runner.restore(),
            Err(RunError::Persistence(_))
        ));
    }

    #[test]
    fn restore_honors_query_step() {
        let store = MemoryStore::new();
        let mut first =
            runner_with_store(Box::new(store.clone()), 50, 25, LoadParams::default());
        first.train().unwrap();

        let mut revived = runner_with_store(
            Box::new(store),
            100,
            25,
            LoadParams {
                restore: true,
                query: Some(Query::new("exp1").at_step(25)),
                ..LoadParams::default()
            },
        );
        revived.restore().unwrap();
        assert_eq!(revived.global_step(), 25);
    }

    #[test]
    fn restore_applies_filter() {
        let store = MemoryStore::new();
        let mut first =
            runner_with_store(Box::new(store.clone()), 25, 25, LoadParams::default());
        first.train().unwrap();

        let mut revived = runner_with_store(
            Box::new(store),
            50,
            25,
            LoadParams {
                restore: true,
                restore_params: Some(FilterSpec::Explicit {
                    pattern: "bias".to_string(),
                    mode: gantry_store::FilterMode::Exclude,
                }),
                ..LoadParams::default()
            },
        );
        let report = revived.restore().unwrap();
        assert_eq!(report.restored, vec!["model.net.weight".to_string()]);
    }

    #[test]
    fn failed_save_does_not_abort_training() {
        #[derive(Debug)]
        struct FailingStore;
        impl DocumentStore for FailingStore {
            fn insert(&mut self, _record: CheckpointRecord) -> gantry_store::Result<()> {
                Err(StoreError::unavailable("store is down"))
            }
            fn find(&self, _query: &Query) -> gantry_store::Result<Vec<CheckpointRecord>> {
                Ok(Vec::new())
            }
            fn delete(&mut self, _query: &Query) -> gantry_store::Result<usize> {
                Ok(0)
            }
        }

        let mut runner =
            runner_with_store(Box::new(FailingStore), 10, 5, LoadParams::default());
        runner.train().unwrap();
        assert_eq!(runner.global_step(), 10);
        assert_eq!(runner.state(), RunState::Terminated);
    }

    #[test]
    fn validate_does_not_advance_the_counter() {
        let mut runner = runner_with_store(
            Box::new(MemoryStore::new()),
            10,
            0,
            LoadParams::default(),
        );
        runner.train().unwrap();
        let step = runner.global_step();
        let _ = runner.validate().unwrap();
        assert_eq!(runner.global_step(), step);
        assert_eq!(runner.model().mode(), Mode::Train);
    }

    #[test]
    fn failed_validation_restores_mode_and_state() {
        struct EvalFailsProvider(ConstantProvider);
        impl DataProvider for EvalFailsProvider {
            fn next_batch(&mut self, mode: Mode) -> crate::Result<crate::data::Batch> {
                if mode == Mode::Eval {
                    return Err(RunError::provider("eval split unavailable"));
                }
                self.0.next_batch(mode)
            }
        }

        let mut runner = Runner::assemble(
            "exp1",
            unit(42),
            Box::new(EvalFailsProvider(ConstantProvider::new(4, 2, 1).unwrap())),
            Box::new(MemoryStore::new()),
            TrainParams { num_steps: 10 },
            ValidationParams { num_steps: 2 },
            SaveParams {
                metric_freq: 0,
                val_freq: 0,
            },
            LoadParams::default(),
        );

        assert!(runner.validate().is_err());
        assert_eq!(runner.model().mode(), Mode::Train);
        assert_eq!(runner.state(), RunState::Built);
    }

    #[test]
    fn val_freq_records_validation_metrics() {
        let store = MemoryStore::new();
        let mut runner = Runner::assemble(
            "exp1",
            unit(42),
            Box::new(ConstantProvider::new(4, 2, 1).unwrap()),
            Box::new(store.clone()),
            TrainParams { num_steps: 10 },
            ValidationParams { num_steps: 2 },
            SaveParams {
                metric_freq: 5,
                val_freq: 5,
            },
            LoadParams::default(),
        );
        runner.train().unwrap();

        let records = store.find(&Query::new("exp1")).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.metrics.contains_key("val_loss")));
    }

    #[test]
    fn test_pass_records_metrics_without_params() {
        let store = MemoryStore::new();
        let mut runner =
            runner_with_store(Box::new(store.clone()), 10, 0, LoadParams::default());
        runner.train().unwrap();

        let val_loss = runner.test().unwrap();
        let records = store.find(&Query::new("exp1")).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].has_params());
        assert_eq!(records[0].metrics["val_loss"], val_loss);
    }
}
