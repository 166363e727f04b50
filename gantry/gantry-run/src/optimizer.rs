//! Parameter-update algorithms and the adapter that binds them.
//!
//! An [`Algorithm`] is pure update arithmetic over a parameter set. The
//! [`OptimizerAdapter`] owns one algorithm and the binding discipline: it
//! never owns the parameters, it acquires the set's one-shot binding and
//! afterwards updates values in place. Per-parameter algorithm state
//! (velocity, moments) is keyed by parameter name so it survives value
//! overwrites from a checkpoint restore.

use std::collections::BTreeMap;
use std::fmt;

use gantry_net::{ParamSet, Tensor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builder::{Args, Component};
use crate::error::{Result, RunError};
use crate::registry::{CapabilityRegistry, Selector};

/// A parameter-update rule applied against populated gradient buffers.
pub trait Algorithm: Send {
    /// Returns the algorithm's display name.
    fn name(&self) -> &'static str;

    /// Applies one update step in place. Zero gradients produce no change.
    fn step(&mut self, params: &mut ParamSet);
}

/// Hyperparameters for [`Sgd`]. Unknown keys in a specification's
/// `defaults` mapping are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdOptions {
    /// Learning rate.
    pub lr: f32,
    /// Momentum coefficient; zero disables the velocity buffer.
    pub momentum: f32,
    /// L2 weight decay coefficient.
    pub weight_decay: f32,
}

impl Default for SgdOptions {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }
}

/// Stochastic gradient descent with optional momentum and weight decay.
#[derive(Debug)]
pub struct Sgd {
    opts: SgdOptions,
    velocity: BTreeMap<String, Tensor>,
}

impl Sgd {
    /// Creates the algorithm from hyperparameters.
    #[must_use]
    pub fn new(opts: SgdOptions) -> Self {
        Self {
            opts,
            velocity: BTreeMap::new(),
        }
    }

    /// Returns the hyperparameters.
    #[must_use]
    pub const fn options(&self) -> SgdOptions {
        self.opts
    }
}

impl Algorithm for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn step(&mut self, params: &mut ParamSet) {
        for (name, param) in params.iter_mut() {
            let mut update = param.grad().clone();
            if self.opts.weight_decay != 0.0 {
                update.scaled_add(self.opts.weight_decay, param.value());
            }
            if self.opts.momentum != 0.0 {
                let velocity = self
                    .velocity
                    .entry(name.to_string())
                    .or_insert_with(|| Tensor::zeros(update.raw_dim()));
                *velocity *= self.opts.momentum;
                *velocity += &update;
                update.clone_from(velocity);
            }
            param.value_mut().scaled_add(-self.opts.lr, &update);
        }
    }
}

/// Hyperparameters for [`Adam`]. Unknown keys in a specification's
/// `defaults` mapping are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamOptions {
    /// Learning rate.
    pub lr: f32,
    /// Exponential decay for the first moment estimate.
    pub beta1: f32,
    /// Exponential decay for the second moment estimate.
    pub beta2: f32,
    /// Denominator fuzz term.
    pub eps: f32,
    /// L2 weight decay coefficient.
    pub weight_decay: f32,
}

impl Default for AdamOptions {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// Adam with bias-corrected moment estimates.
#[derive(Debug)]
pub struct Adam {
    opts: AdamOptions,
    step_count: i32,
    first: BTreeMap<String, Tensor>,
    second: BTreeMap<String, Tensor>,
}

impl Adam {
    /// Creates the algorithm from hyperparameters.
    #[must_use]
    pub fn new(opts: AdamOptions) -> Self {
        Self {
            opts,
            step_count: 0,
            first: BTreeMap::new(),
            second: BTreeMap::new(),
        }
    }

    /// Returns the hyperparameters.
    #[must_use]
    pub const fn options(&self) -> AdamOptions {
        self.opts
    }
}

impl Algorithm for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn step(&mut self, params: &mut ParamSet) {
        self.step_count += 1;
        let bias1 = 1.0 - self.opts.beta1.powi(self.step_count);
        let bias2 = 1.0 - self.opts.beta2.powi(self.step_count);

        for (name, param) in params.iter_mut() {
            let mut grad = param.grad().clone();
            if self.opts.weight_decay != 0.0 {
                grad.scaled_add(self.opts.weight_decay, param.value());
            }

            let first = self
                .first
                .entry(name.to_string())
                .or_insert_with(|| Tensor::zeros(grad.raw_dim()));
            *first *= self.opts.beta1;
            first.scaled_add(1.0 - self.opts.beta1, &grad);

            let second = self
                .second
                .entry(name.to_string())
                .or_insert_with(|| Tensor::zeros(grad.raw_dim()));
            *second *= self.opts.beta2;
            second.zip_mut_with(&grad, |s, &g| *s += (1.0 - self.opts.beta2) * g * g);

            let mut update = first.clone() / bias1;
            let denom = second.mapv(|s| (s / bias2).sqrt() + self.opts.eps);
            update.zip_mut_with(&denom, |u, &d| *u /= d);
            param.value_mut().scaled_add(-self.opts.lr, &update);
        }
    }
}

/// Wraps an update algorithm and binds it to one parameter set.
///
/// Binding is explicit and one-shot in both directions: the adapter
/// refuses a second `bind`, and the parameter set refuses a binding from a
/// second adapter. Binding an empty set fails fast as a configuration
/// error rather than silently training nothing.
pub struct OptimizerAdapter {
    algorithm: Box<dyn Algorithm>,
    bound: bool,
}

impl OptimizerAdapter {
    /// Wraps an algorithm; the adapter starts unbound.
    #[must_use]
    pub fn new(algorithm: Box<dyn Algorithm>) -> Self {
        Self {
            algorithm,
            bound: false,
        }
    }

    /// Resolves a selector through the registry and wraps the resulting
    /// algorithm. `defaults` is handed to the factory unvalidated.
    ///
    /// # Errors
    ///
    /// Returns `RunError::UnknownCapability` for an unregistered selector
    /// and `RunError::InvalidConfiguration` when the selector builds
    /// something that is not an update algorithm.
    pub fn resolve(
        registry: &CapabilityRegistry,
        selector: &Selector,
        defaults: serde_json::Value,
    ) -> Result<Self> {
        let factory = registry.resolve(selector)?;
        let mut args = Args::new("optimizer");
        if !defaults.is_null() {
            args.insert_value("defaults", defaults);
        }
        match factory(registry, args)? {
            Component::Algorithm(algorithm) => Ok(Self::new(algorithm)),
            Component::Optimizer(adapter) => Ok(adapter),
            other => Err(RunError::invalid_config(
                "optimizer",
                format!("selector built a {}, expected an update algorithm", other.kind()),
            )),
        }
    }

    /// Returns the wrapped algorithm's name.
    #[must_use]
    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Returns true once the adapter holds a parameter binding.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.bound
    }

    /// Acquires the one-shot binding on a parameter set.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when the adapter is already
    /// bound, the set is empty, or the set is already bound elsewhere.
    pub fn bind(&mut self, params: &mut ParamSet) -> Result<()> {
        if self.bound {
            return Err(RunError::invalid_config(
                "optimizer",
                "adapter is already bound to a parameter set",
            ));
        }
        if params.is_empty() {
            return Err(RunError::invalid_config(
                "optimizer",
                "cannot bind to an empty parameter set",
            ));
        }
        params.bind().map_err(|_| {
            RunError::invalid_config(
                "optimizer",
                "parameter set is already bound to another optimizer",
            )
        })?;
        self.bound = true;
        debug!(
            algorithm = self.algorithm.name(),
            params = params.len(),
            "optimizer bound"
        );
        Ok(())
    }

    /// Applies one update step against the bound parameters.
    ///
    /// # Errors
    ///
    /// Returns `RunError::InvalidConfiguration` when called before `bind`.
    pub fn step(&mut self, params: &mut ParamSet) -> Result<()> {
        if !self.bound {
            return Err(RunError::invalid_config(
                "optimizer",
                "step called before bind",
            ));
        }
        self.algorithm.step(params);
        Ok(())
    }

    /// Clears every gradient buffer. Idempotent; safe to chain after
    /// `step` unconditionally.
    pub fn zero_grad(&self, params: &mut ParamSet) {
        params.zero_grad();
    }
}

impl fmt::Debug for OptimizerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizerAdapter")
            .field("algorithm", &self.algorithm.name())
            .field("bound", &self.bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{ArrayD, IxDyn};

    fn one_param(value: f32, grad: f32) -> ParamSet {
        let mut params = ParamSet::new();
        params.insert("w", ArrayD::from_elem(IxDyn(&[1]), value));
        params.get_mut("w").unwrap().grad_mut().fill(grad);
        params
    }

    #[test]
    fn sgd_vanilla_step() {
        let mut params = one_param(1.0, 0.5);
        let mut sgd = Sgd::new(SgdOptions {
            lr: 0.1,
            ..SgdOptions::default()
        });
        sgd.step(&mut params);
        assert_relative_eq!(params.get("w").unwrap().value()[[0]], 0.95);
    }

    #[test]
    fn sgd_momentum_accumulates_velocity() {
        let mut sgd = Sgd::new(SgdOptions {
            lr: 1.0,
            momentum: 0.5,
            weight_decay: 0.0,
        });
        let mut params = one_param(0.0, 1.0);

        sgd.step(&mut params);
        // v1 = 1, w = -1
        assert_relative_eq!(params.get("w").unwrap().value()[[0]], -1.0);

        params.get_mut("w").unwrap().grad_mut().fill(1.0);
        sgd.step(&mut params);
        // v2 = 0.5 + 1 = 1.5, w = -2.5
        assert_relative_eq!(params.get("w").unwrap().value()[[0]], -2.5);
    }

    #[test]
    fn sgd_weight_decay_pulls_toward_zero() {
        let mut sgd = Sgd::new(SgdOptions {
            lr: 0.1,
            momentum: 0.0,
            weight_decay: 1.0,
        });
        let mut params = one_param(2.0, 0.0);
        sgd.step(&mut params);
        // update = grad + wd * w = 2, w = 2 - 0.2
        assert_relative_eq!(params.get("w").unwrap().value()[[0]], 1.8);
    }

    #[test]
    fn sgd_zero_grad_is_a_no_op() {
        let mut sgd = Sgd::new(SgdOptions::default());
        let mut params = one_param(3.0, 0.0);
        sgd.step(&mut params);
        assert_relative_eq!(params.get("w").unwrap().value()[[0]], 3.0);
    }

    #[test]
    fn adam_first_step_moves_by_lr() {
        // With bias correction the very first step is lr * g / (|g| + eps).
        let mut adam = Adam::new(AdamOptions {
            lr: 0.1,
            ..AdamOptions::default()
        });
        let mut params = one_param(1.0, 0.5);
        adam.step(&mut params);
        assert_relative_eq!(
            params.get("w").unwrap().value()[[0]],
            0.9,
            epsilon = 1e-5
        );
    }

    #[test]
    fn adam_opposes_gradient_sign() {
        let mut adam = Adam::new(AdamOptions::default());
        let mut params = one_param(0.0, -2.0);
        adam.step(&mut params);
        assert!(params.get("w").unwrap().value()[[0]] > 0.0);
    }

    #[test]
    fn options_parse_from_defaults_mapping() {
        let opts: SgdOptions =
            serde_json::from_value(serde_json::json!({"lr": 0.5, "ignored": true})).unwrap();
        assert_relative_eq!(opts.lr, 0.5);
        assert_relative_eq!(opts.momentum, 0.0);
    }

    #[test]
    fn bind_is_one_shot_per_adapter() {
        let mut adapter = OptimizerAdapter::new(Box::new(Sgd::new(SgdOptions::default())));
        let mut params = one_param(1.0, 0.0);

        assert!(!adapter.is_bound());
        adapter.bind(&mut params).unwrap();
        assert!(adapter.is_bound());
        assert!(adapter.bind(&mut params).is_err());
    }

    #[test]
    fn bind_rejects_empty_parameter_set() {
        let mut adapter = OptimizerAdapter::new(Box::new(Sgd::new(SgdOptions::default())));
        let mut params = ParamSet::new();
        assert!(matches!(
            adapter.bind(&mut params),
            Err(RunError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn two_adapters_cannot_bind_one_set() {
        let mut first = OptimizerAdapter::new(Box::new(Sgd::new(SgdOptions::default())));
        let mut second = OptimizerAdapter::new(Box::new(Sgd::new(SgdOptions::default())));
        let mut params = one_param(1.0, 0.0);

        first.bind(&mut params).unwrap();
        assert!(second.bind(&mut params).is_err());
    }

    #[test]
    fn step_before_bind_is_an_error() {
        let mut adapter = OptimizerAdapter::new(Box::new(Sgd::new(SgdOptions::default())));
        let mut params = one_param(1.0, 1.0);
        assert!(adapter.step(&mut params).is_err());
    }

    #[test]
    fn resolve_through_registry() {
        let registry = CapabilityRegistry::with_defaults();
        let adapter = OptimizerAdapter::resolve(
            &registry,
            &Selector::name("SGD"),
            serde_json::json!({"lr": 0.2}),
        )
        .unwrap();
        assert_eq!(adapter.algorithm_name(), "sgd");
        assert!(!adapter.is_bound());
    }

    #[test]
    fn resolve_rejects_non_algorithm_selector() {
        let registry = CapabilityRegistry::with_defaults();
        let err = OptimizerAdapter::resolve(
            &registry,
            &Selector::name("MSE"),
            serde_json::Value::Null,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected an update algorithm"));
    }

    #[test]
    fn resolve_unknown_selector() {
        let registry = CapabilityRegistry::empty();
        assert!(matches!(
            OptimizerAdapter::resolve(&registry, &Selector::name("SGD"), serde_json::Value::Null),
            Err(RunError::UnknownCapability(_))
        ));
    }
}
