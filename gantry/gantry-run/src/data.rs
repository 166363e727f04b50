//! Batch providers feeding the run controller.

use gantry_net::{Mode, Tensor};
use ndarray::{Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Result, RunError};

/// One batch of paired input and target tensors.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Network input, batch along the first axis.
    pub input: Tensor,
    /// Criterion target, batch along the first axis.
    pub target: Tensor,
}

impl Batch {
    /// Creates a batch from input and target tensors.
    #[must_use]
    pub fn new(input: Tensor, target: Tensor) -> Self {
        Self { input, target }
    }

    /// Returns the number of rows along the batch axis.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.input.len_of(Axis(0))
    }
}

/// A source of training and validation batches.
///
/// The run controller pulls one batch per step and passes the current mode
/// so a provider can serve distinct splits.
pub trait DataProvider: Send {
    /// Produces the next batch for the given mode.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Provider` when a batch cannot be produced.
    fn next_batch(&mut self, mode: Mode) -> Result<Batch>;
}

/// Serves the same constant batch forever.
///
/// Useful as a convergence probe: a trainable unit that cannot drive its
/// loss down on a constant batch is broken.
#[derive(Debug, Clone)]
pub struct ConstantProvider {
    batch_size: usize,
    in_dim: usize,
    out_dim: usize,
    input_fill: f32,
    target_fill: f32,
}

impl ConstantProvider {
    /// Creates a provider of all-ones inputs and all-zeros targets.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Provider` when any dimension is zero.
    pub fn new(batch_size: usize, in_dim: usize, out_dim: usize) -> Result<Self> {
        if batch_size == 0 || in_dim == 0 || out_dim == 0 {
            return Err(RunError::provider(format!(
                "constant provider dimensions must be positive, got {batch_size}x{in_dim}x{out_dim}"
            )));
        }
        Ok(Self {
            batch_size,
            in_dim,
            out_dim,
            input_fill: 1.0,
            target_fill: 0.0,
        })
    }

    /// Overrides the input and target fill values.
    #[must_use]
    pub const fn with_fills(mut self, input_fill: f32, target_fill: f32) -> Self {
        self.input_fill = input_fill;
        self.target_fill = target_fill;
        self
    }
}

impl DataProvider for ConstantProvider {
    fn next_batch(&mut self, _mode: Mode) -> Result<Batch> {
        let input = Array2::from_elem((self.batch_size, self.in_dim), self.input_fill);
        let target = Array2::from_elem((self.batch_size, self.out_dim), self.target_fill);
        Ok(Batch::new(input.into_dyn(), target.into_dyn()))
    }
}

/// Serves batches from a fixed random linear map.
///
/// A hidden ground-truth matrix is drawn once from the seed; every batch is
/// fresh uniform input paired with its image under that matrix. Two
/// providers built from the same seed serve identical streams, which keeps
/// runs reproducible. Validation batches draw from the same stream.
#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    batch_size: usize,
    truth: Array2<f32>,
    rng: ChaCha8Rng,
}

impl SyntheticProvider {
    /// Creates a provider with the given shape and seed.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Provider` when any dimension is zero.
    pub fn new(batch_size: usize, in_dim: usize, out_dim: usize, seed: u64) -> Result<Self> {
        if batch_size == 0 || in_dim == 0 || out_dim == 0 {
            return Err(RunError::provider(format!(
                "synthetic provider dimensions must be positive, got {batch_size}x{in_dim}x{out_dim}"
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let truth = Array2::from_shape_fn((out_dim, in_dim), |_| rng.gen_range(-1.0..1.0));
        Ok(Self {
            batch_size,
            truth,
            rng,
        })
    }

    /// Returns the hidden ground-truth matrix, `[out, in]`.
    #[must_use]
    pub fn truth(&self) -> &Array2<f32> {
        &self.truth
    }
}

impl DataProvider for SyntheticProvider {
    fn next_batch(&mut self, _mode: Mode) -> Result<Batch> {
        let in_dim = self.truth.ncols();
        let input =
            Array2::from_shape_fn((self.batch_size, in_dim), |_| self.rng.gen_range(-1.0..1.0));
        let target = input.dot(&self.truth.t());
        Ok(Batch::new(input.into_dyn(), target.into_dyn()))
    }
}
