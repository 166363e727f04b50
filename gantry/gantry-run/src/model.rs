//! The trainable unit: a network, its parameters, a criterion, and a
//! bound optimizer behind one stepping surface.
//!
//! The unit owns the canonical [`ParamSet`]. Under a multi-device plan the
//! forward pass splits the batch into contiguous chunks, runs each chunk
//! against its own activation tape, and gathers the outputs in order;
//! backward replays every tape and accumulates into the same canonical
//! gradient buffers, so the multi-chunk gradient equals the single-pass
//! gradient.

use std::collections::BTreeMap;
use std::fmt;

use gantry_net::{Criterion, DevicePlan, Mode, NetError, Network, ParamSet, Tape, Tensor, TensorData};
use gantry_store::RestoreReport;
use ndarray::{Axis, Slice};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::data::Batch;
use crate::error::Result;
use crate::optimizer::OptimizerAdapter;

/// A computed loss: the scalar and the gradient that seeds backward.
#[derive(Debug, Clone)]
pub struct Loss {
    value: f32,
    grad_output: Tensor,
}

impl Loss {
    /// Returns the scalar loss value.
    #[must_use]
    pub const fn value(&self) -> f32 {
        self.value
    }

    /// Returns the gradient of the loss with respect to the output.
    #[must_use]
    pub fn grad_output(&self) -> &Tensor {
        &self.grad_output
    }
}

/// One network with its parameters, criterion, and bound optimizer.
pub struct Model {
    name: String,
    net: Box<dyn Network>,
    criterion: Box<dyn Criterion>,
    optimizer: OptimizerAdapter,
    params: ParamSet,
    devices: DevicePlan,
    mode: Mode,
    tapes: Vec<Tape>,
    chunks: Vec<(usize, usize)>,
}

impl Model {
    /// Assembles the unit: validates the device plan, initializes the
    /// parameters from the seed, and binds the optimizer.
    ///
    /// # Errors
    ///
    /// Returns `RunError::DeviceUnavailable` when the plan names a device
    /// that cannot execute, and `RunError::InvalidConfiguration` when the
    /// network initializes no parameters or the optimizer is already
    /// bound.
    pub fn assemble(
        name: impl Into<String>,
        net: Box<dyn Network>,
        criterion: Box<dyn Criterion>,
        mut optimizer: OptimizerAdapter,
        devices: DevicePlan,
        seed: u64,
    ) -> Result<Self> {
        devices.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut params = net.init(&mut rng);
        optimizer.bind(&mut params)?;

        let name = name.into();
        info!(
            name = %name,
            params = params.len(),
            values = params.num_values(),
            replicas = devices.replicas(),
            algorithm = optimizer.algorithm_name(),
            "assembled trainable unit"
        );
        Ok(Self {
            name,
            net,
            criterion,
            optimizer,
            params,
            devices,
            mode: Mode::Train,
            tapes: Vec::new(),
            chunks: Vec::new(),
        })
    }

    /// Returns the unit's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Flips train/eval semantics for subsequent forward passes.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Returns the canonical parameter set.
    #[must_use]
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Returns the device plan.
    #[must_use]
    pub fn devices(&self) -> &DevicePlan {
        &self.devices
    }

    /// Returns the dotted namespace parameters are saved under.
    #[must_use]
    pub fn param_prefix(&self) -> String {
        format!("{}.net.", self.name)
    }

    /// Flattens the parameters into checkpoint form under the unit's
    /// namespace.
    #[must_use]
    pub fn flatten_params(&self) -> BTreeMap<String, TensorData> {
        self.params.flatten(&self.param_prefix())
    }

    /// Applies a remapped checkpoint mapping to the live parameters.
    ///
    /// Mismatches and unused keys are reported, never fatal; parameters
    /// the mapping does not name keep their current values.
    pub fn apply_restore(&mut self, mapping: &BTreeMap<String, TensorData>) -> RestoreReport {
        let prefix = self.param_prefix();
        gantry_store::apply(&mut self.params, &prefix, mapping)
    }

    /// Runs the forward pass, chunked per the device plan, and gathers the
    /// outputs in batch order.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty batch or when the input does not fit
    /// the network.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let batch = input.shape().first().copied().unwrap_or(0);
        if batch == 0 {
            return Err(NetError::shape_mismatch("batch must be non-empty").into());
        }
        self.chunks = self.devices.chunk_ranges(batch);
        self.tapes.clear();

        if self.chunks.len() <= 1 {
            let mut tape = Tape::new();
            let output = self.net.forward(&self.params, input, self.mode, &mut tape)?;
            self.tapes.push(tape);
            return Ok(output);
        }

        let mut outputs = Vec::with_capacity(self.chunks.len());
        for &(start, end) in &self.chunks {
            let chunk = input
                .slice_axis(Axis(0), Slice::from(start..end))
                .to_owned();
            let mut tape = Tape::new();
            outputs.push(self.net.forward(&self.params, &chunk, self.mode, &mut tape)?);
            self.tapes.push(tape);
        }
        let views: Vec<_> = outputs.iter().map(Tensor::view).collect();
        ndarray::concatenate(Axis(0), &views)
            .map_err(|_| NetError::shape_mismatch("chunk outputs do not gather").into())
    }

    /// Computes the loss and its seed gradient for an output/target pair.
    ///
    /// # Errors
    ///
    /// Returns an error when the shapes disagree.
    pub fn loss(&self, output: &Tensor, target: &Tensor) -> Result<Loss> {
        let value = self.criterion.forward(output, target)?;
        let grad_output = self.criterion.backward(output, target)?;
        Ok(Loss { value, grad_output })
    }

    /// Populates the gradient buffers for the most recent forward pass.
    ///
    /// Buffers are overwritten, not summed across calls: each invocation
    /// zeroes them before replaying the pending tapes.
    ///
    /// # Errors
    ///
    /// Returns an error when no forward pass is pending or the seed
    /// gradient does not match the forward traversal.
    pub fn compute_gradients(&mut self, loss: &Loss) -> Result<()> {
        if self.tapes.is_empty() {
            return Err(NetError::tape_underflow("no pending forward pass").into());
        }
        let mut tapes = std::mem::take(&mut self.tapes);
        let chunks = std::mem::take(&mut self.chunks);

        self.params.zero_grad();
        if tapes.len() <= 1 {
            for tape in &mut tapes {
                self.net.backward(&mut self.params, loss.grad_output(), tape)?;
            }
        } else {
            for ((start, end), tape) in chunks.into_iter().zip(tapes.iter_mut()) {
                let grad_chunk = loss
                    .grad_output()
                    .slice_axis(Axis(0), Slice::from(start..end))
                    .to_owned();
                self.net.backward(&mut self.params, &grad_chunk, tape)?;
            }
        }
        Ok(())
    }

    /// Applies the bound optimizer against the populated gradients.
    ///
    /// # Errors
    ///
    /// Returns an error when the optimizer is unbound.
    pub fn apply_gradients(&mut self) -> Result<()> {
        self.optimizer.step(&mut self.params)
    }

    /// The canonical update sequence: compute gradients, apply them, clear
    /// the buffers.
    ///
    /// # Errors
    ///
    /// Propagates errors from either phase.
    pub fn optimize(&mut self, loss: &Loss) -> Result<()> {
        self.compute_gradients(loss)?;
        self.apply_gradients()?;
        self.optimizer.zero_grad(&mut self.params);
        Ok(())
    }

    /// One full training step over a batch, returning the loss value.
    ///
    /// # Errors
    ///
    /// Propagates forward, loss, and update errors.
    pub fn step(&mut self, batch: &Batch) -> Result<f32> {
        let output = self.forward(&batch.input)?;
        let loss = self.loss(&output, &batch.target)?;
        self.optimize(&loss)?;
        Ok(loss.value())
    }

    /// One evaluation step: forward and loss only, no parameter change.
    ///
    /// # Errors
    ///
    /// Propagates forward and loss errors.
    pub fn eval_step(&mut self, batch: &Batch) -> Result<f32> {
        let output = self.forward(&batch.input)?;
        self.tapes.clear();
        self.chunks.clear();
        Ok(self.criterion.forward(&output, &batch.target)?)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .field("replicas", &self.devices.replicas())
            .field("mode", &self.mode)
            .finish()
    }
}
