//! Named trainable parameters and the parameter set that owns them.

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::error::{NetError, Result};
use crate::tensor::{Tensor, TensorData};

/// One named trainable tensor with its gradient buffer.
///
/// The gradient buffer always has the same shape as the value and starts
/// zeroed.
#[derive(Debug, Clone)]
pub struct Param {
    value: Tensor,
    grad: Tensor,
}

impl Param {
    /// Creates a parameter from an initial value, with a zeroed gradient.
    #[must_use]
    pub fn new(value: Tensor) -> Self {
        let grad = ArrayD::zeros(value.raw_dim());
        Self { value, grad }
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Returns the current value mutably.
    pub fn value_mut(&mut self) -> &mut Tensor {
        &mut self.value
    }

    /// Returns the gradient buffer.
    #[must_use]
    pub fn grad(&self) -> &Tensor {
        &self.grad
    }

    /// Returns the gradient buffer mutably.
    pub fn grad_mut(&mut self) -> &mut Tensor {
        &mut self.grad
    }

    /// Overwrites the value in place.
    ///
    /// # Errors
    ///
    /// Returns `NetError::ShapeMismatch` if the new value's shape differs.
    pub fn set_value(&mut self, value: Tensor) -> Result<()> {
        if value.shape() != self.value.shape() {
            return Err(NetError::shape_mismatch(format!(
                "expected {:?}, got {:?}",
                self.value.shape(),
                value.shape()
            )));
        }
        self.value = value;
        Ok(())
    }

    /// Clears the gradient buffer.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Returns the parameter shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }
}

/// An ordered collection of named, mutable parameters.
///
/// The set is exclusively owned by one trainable unit. An optimizer adapter
/// never owns it; it acquires a one-shot binding via [`ParamSet::bind`] and
/// afterwards reads and updates values in place through `&mut` access. A
/// second `bind` on a live set is rejected, which is how double-binding two
/// adapters to the same parameters surfaces as a configuration error.
///
/// # Example
///
/// ```
/// use gantry_net::ParamSet;
/// use ndarray::ArrayD;
///
/// let mut params = ParamSet::new();
/// params.insert("fc.weight", ArrayD::zeros(ndarray::IxDyn(&[2, 4])));
/// assert_eq!(params.len(), 1);
/// assert!(params.bind().is_ok());
/// assert!(params.bind().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    entries: BTreeMap<String, Param>,
    bound: bool,
}

impl ParamSet {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parameter with a zeroed gradient, replacing any previous
    /// entry under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Tensor) {
        self.entries.insert(name.into(), Param::new(value));
    }

    /// Returns the parameter with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.entries.get(name)
    }

    /// Returns the parameter with the given name mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Param> {
        self.entries.get_mut(name)
    }

    /// Iterates over `(name, param)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates mutably over `(name, param)` pairs in name order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Param)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the parameter names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set holds no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total number of scalar values across all parameters.
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.entries.values().map(|p| p.value().len()).sum()
    }

    /// Clears every gradient buffer. Idempotent.
    pub fn zero_grad(&mut self) {
        for param in self.entries.values_mut() {
            param.zero_grad();
        }
    }

    /// Flattens the set into a dotted-path to payload mapping.
    ///
    /// `prefix` is prepended verbatim to every name, e.g. a prefix of
    /// `"model.net."` turns `"fc.weight"` into `"model.net.fc.weight"`.
    #[must_use]
    pub fn flatten(&self, prefix: &str) -> BTreeMap<String, TensorData> {
        self.entries
            .iter()
            .map(|(name, param)| (format!("{prefix}{name}"), TensorData::from_tensor(param.value())))
            .collect()
    }

    /// Acquires the one-shot optimizer binding for this set.
    ///
    /// # Errors
    ///
    /// Returns `NetError::AlreadyBound` if a binding was already taken.
    pub fn bind(&mut self) -> Result<()> {
        if self.bound {
            return Err(NetError::already_bound(
                "parameter set is already bound to an optimizer",
            ));
        }
        self.bound = true;
        Ok(())
    }

    /// Returns true if an optimizer binding has been taken.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound
    }
}
