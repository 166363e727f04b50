//! The computation-runtime seam: networks with explicit forward/backward.
//!
//! The harness never reimplements automatic differentiation. A [`Network`]
//! is the narrow contract to whatever runtime computes outputs and
//! gradients; the implementations here carry closed-form gradients for the
//! architectures the harness ships with. Activations needed by the backward
//! pass are pushed onto an explicit [`Tape`], which lets the trainable unit
//! keep one tape per data-parallel chunk.

use ndarray::{Array, ArrayView1, ArrayView2, Axis, Ix1, Ix2, IxDyn, Zip};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::error::{NetError, Result};
use crate::param::ParamSet;
use crate::tensor::Tensor;

/// Training/inference mode for behavior-sensitive layers.
///
/// Flipping the mode has no numeric side effect by itself; layers consult
/// it during `forward`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Training semantics.
    Train,
    /// Inference semantics.
    Eval,
}

/// LIFO store for activations cached between forward and backward.
#[derive(Debug, Default)]
pub struct Tape {
    slots: Vec<Tensor>,
}

impl Tape {
    /// Creates an empty tape.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a cached activation.
    pub fn push(&mut self, tensor: Tensor) {
        self.slots.push(tensor);
    }

    /// Pops the most recently cached activation.
    ///
    /// # Errors
    ///
    /// Returns `NetError::TapeUnderflow` if the tape is empty, which means
    /// backward was called without a matching forward.
    pub fn pop(&mut self) -> Result<Tensor> {
        self.slots
            .pop()
            .ok_or_else(|| NetError::tape_underflow("backward without matching forward"))
    }

    /// Discards all cached activations.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Returns the number of cached activations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A computation graph with parameters owned externally.
///
/// Implementations are stateless with respect to parameters: values and
/// gradient buffers live in the [`ParamSet`] owned by the trainable unit,
/// and per-step activations live on the caller's [`Tape`].
pub trait Network: Send {
    /// Builds the freshly initialized parameter set for this architecture.
    fn init(&self, rng: &mut ChaCha8Rng) -> ParamSet;

    /// Runs the forward pass, caching what backward will need on `tape`.
    ///
    /// # Errors
    ///
    /// Returns an error when the input shape does not fit the architecture
    /// or a parameter is missing.
    fn forward(&self, params: &ParamSet, input: &Tensor, mode: Mode, tape: &mut Tape)
        -> Result<Tensor>;

    /// Accumulates parameter gradients for `grad_output` and returns the
    /// gradient with respect to the input.
    ///
    /// Gradients are *added* into the buffers; the caller decides when to
    /// clear them.
    ///
    /// # Errors
    ///
    /// Returns an error when the tape does not match the forward traversal.
    fn backward(
        &self,
        params: &mut ParamSet,
        grad_output: &Tensor,
        tape: &mut Tape,
    ) -> Result<Tensor>;
}

fn view2<'a>(tensor: &'a Tensor, what: &str) -> Result<ArrayView2<'a, f32>> {
    tensor
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| NetError::shape_mismatch(format!("{what} must be 2-d, got {:?}", tensor.shape())))
}

fn param_view2<'a>(params: &'a ParamSet, name: &str) -> Result<ArrayView2<'a, f32>> {
    let param = params
        .get(name)
        .ok_or_else(|| NetError::missing_param(name))?;
    view2(param.value(), name)
}

fn param_view1<'a>(params: &'a ParamSet, name: &str) -> Result<ArrayView1<'a, f32>> {
    let param = params
        .get(name)
        .ok_or_else(|| NetError::missing_param(name))?;
    param
        .value()
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| NetError::shape_mismatch(format!("{name} must be 1-d")))
}

/// A fully connected layer: `y = x · Wᵀ + b`.
///
/// Parameters are `{prefix}weight` of shape `[out, in]` and `{prefix}bias`
/// of shape `[out]`.
///
/// # Example
///
/// ```
/// use gantry_net::{Linear, Mode, Network, Tape};
/// use rand::SeedableRng;
///
/// let net = Linear::new(4, 2).unwrap();
/// let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
/// let params = net.init(&mut rng);
/// assert_eq!(params.names(), vec!["bias", "weight"]);
/// ```
#[derive(Debug, Clone)]
pub struct Linear {
    in_dim: usize,
    out_dim: usize,
    weight_key: String,
    bias_key: String,
}

impl Linear {
    /// Creates a layer with bare `weight`/`bias` parameter names.
    ///
    /// # Errors
    ///
    /// Returns `NetError::InvalidDimension` if either dimension is zero.
    pub fn new(in_dim: usize, out_dim: usize) -> Result<Self> {
        Self::with_prefix("", in_dim, out_dim)
    }

    /// Creates a layer whose parameter names carry `prefix`, e.g.
    /// `layer1.weight` for prefix `"layer1."`.
    ///
    /// # Errors
    ///
    /// Returns `NetError::InvalidDimension` if either dimension is zero.
    pub fn with_prefix(prefix: &str, in_dim: usize, out_dim: usize) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(NetError::invalid_dimension(format!(
                "linear dimensions must be positive, got {in_dim}x{out_dim}"
            )));
        }
        Ok(Self {
            in_dim,
            out_dim,
            weight_key: format!("{prefix}weight"),
            bias_key: format!("{prefix}bias"),
        })
    }

    /// Returns the input dimension.
    #[must_use]
    pub const fn in_dim(&self) -> usize {
        self.in_dim
    }

    /// Returns the output dimension.
    #[must_use]
    pub const fn out_dim(&self) -> usize {
        self.out_dim
    }

    fn init_into(&self, params: &mut ParamSet, rng: &mut ChaCha8Rng) {
        // Uniform in [-k, k] with k = 1/sqrt(in), the usual fan-in scaling.
        #[allow(clippy::cast_precision_loss)]
        let k = 1.0 / (self.in_dim as f32).sqrt();
        let weight: Vec<f32> = (0..self.in_dim * self.out_dim)
            .map(|_| rng.gen_range(-k..k))
            .collect();
        let bias: Vec<f32> = (0..self.out_dim).map(|_| rng.gen_range(-k..k)).collect();

        let weight = Array::from_shape_vec(IxDyn(&[self.out_dim, self.in_dim]), weight)
            .unwrap_or_else(|_| unreachable!("shape matches generated length"));
        let bias = Array::from_shape_vec(IxDyn(&[self.out_dim]), bias)
            .unwrap_or_else(|_| unreachable!("shape matches generated length"));

        params.insert(self.weight_key.clone(), weight);
        params.insert(self.bias_key.clone(), bias);
    }
}

impl Network for Linear {
    fn init(&self, rng: &mut ChaCha8Rng) -> ParamSet {
        let mut params = ParamSet::new();
        self.init_into(&mut params, rng);
        params
    }

    fn forward(
        &self,
        params: &ParamSet,
        input: &Tensor,
        _mode: Mode,
        tape: &mut Tape,
    ) -> Result<Tensor> {
        let x = view2(input, "input")?;
        if x.ncols() != self.in_dim {
            return Err(NetError::shape_mismatch(format!(
                "input has {} features, layer expects {}",
                x.ncols(),
                self.in_dim
            )));
        }
        let w = param_view2(params, &self.weight_key)?;
        let b = param_view1(params, &self.bias_key)?;

        let mut y = x.dot(&w.t());
        y += &b;
        tape.push(input.clone());
        Ok(y.into_dyn())
    }

    fn backward(
        &self,
        params: &mut ParamSet,
        grad_output: &Tensor,
        tape: &mut Tape,
    ) -> Result<Tensor> {
        let cached = tape.pop()?;
        let x = view2(&cached, "cached input")?;
        let g = view2(grad_output, "grad_output")?;

        let grad_weight = g.t().dot(&x);
        let grad_bias = g.sum_axis(Axis(0));
        let grad_input = {
            let w = param_view2(params, &self.weight_key)?;
            g.dot(&w)
        };

        let weight = params
            .get_mut(&self.weight_key)
            .ok_or_else(|| NetError::missing_param(&self.weight_key))?;
        *weight.grad_mut() += &grad_weight;

        let bias = params
            .get_mut(&self.bias_key)
            .ok_or_else(|| NetError::missing_param(&self.bias_key))?;
        *bias.grad_mut() += &grad_bias;

        Ok(grad_input.into_dyn())
    }
}

/// A multi-layer perceptron with ReLU between layers.
///
/// Hidden layers are named `layer1..layerN`; the final projection is named
/// `head`. Those names are what checkpoint rename tables address when the
/// architecture changes.
#[derive(Debug, Clone)]
pub struct Mlp {
    dims: Vec<usize>,
    layers: Vec<Linear>,
}

impl Mlp {
    /// Creates an MLP from a dimension chain, e.g. `[4, 8, 2]` for one
    /// hidden layer of width 8.
    ///
    /// # Errors
    ///
    /// Returns `NetError::InvalidDimension` for fewer than two dimensions
    /// or any zero dimension.
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        if dims.len() < 2 {
            return Err(NetError::invalid_dimension(
                "mlp needs at least input and output dimensions",
            ));
        }
        let last = dims.len() - 2;
        let mut layers = Vec::with_capacity(dims.len() - 1);
        for (i, pair) in dims.windows(2).enumerate() {
            let prefix = if i == last {
                "head.".to_string()
            } else {
                format!("layer{}.", i + 1)
            };
            layers.push(Linear::with_prefix(&prefix, pair[0], pair[1])?);
        }
        Ok(Self { dims, layers })
    }

    /// Returns the dimension chain.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }
}

impl Network for Mlp {
    fn init(&self, rng: &mut ChaCha8Rng) -> ParamSet {
        let mut params = ParamSet::new();
        for layer in &self.layers {
            layer.init_into(&mut params, rng);
        }
        params
    }

    fn forward(
        &self,
        params: &ParamSet,
        input: &Tensor,
        mode: Mode,
        tape: &mut Tape,
    ) -> Result<Tensor> {
        let mut h = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(params, &h, mode, tape)?;
            if i + 1 < self.layers.len() {
                tape.push(h.clone());
                h.mapv_inplace(|v| v.max(0.0));
            }
        }
        Ok(h)
    }

    fn backward(
        &self,
        params: &mut ParamSet,
        grad_output: &Tensor,
        tape: &mut Tape,
    ) -> Result<Tensor> {
        let mut g = grad_output.clone();
        for (i, layer) in self.layers.iter().enumerate().rev() {
            if i + 1 < self.layers.len() {
                let pre_activation = tape.pop()?;
                if pre_activation.shape() != g.shape() {
                    return Err(NetError::shape_mismatch(
                        "tape does not match backward traversal",
                    ));
                }
                Zip::from(&mut g).and(&pre_activation).for_each(|gv, &zv| {
                    if zv <= 0.0 {
                        *gv = 0.0;
                    }
                });
            }
            g = layer.backward(params, &g, tape)?;
        }
        Ok(g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;
    use rand::SeedableRng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn linear_rejects_zero_dims() {
        assert!(Linear::new(0, 2).is_err());
        assert!(Linear::new(2, 0).is_err());
    }

    #[test]
    fn linear_init_shapes() {
        let net = Linear::new(4, 2).unwrap();
        let params = net.init(&mut rng());
        assert_eq!(params.get("weight").unwrap().shape(), &[2, 4]);
        assert_eq!(params.get("bias").unwrap().shape(), &[2]);
    }

    #[test]
    fn linear_forward_known_values() {
        let net = Linear::new(2, 1).unwrap();
        let mut params = ParamSet::new();
        params.insert("weight", arr2(&[[2.0_f32, -1.0]]).into_dyn());
        params.insert("bias", ndarray::arr1(&[0.5_f32]).into_dyn());

        let input = arr2(&[[1.0_f32, 3.0], [0.0, 1.0]]).into_dyn();
        let mut tape = Tape::new();
        let out = net.forward(&params, &input, Mode::Train, &mut tape).unwrap();

        // [1*2 - 3 + 0.5, 0 - 1 + 0.5]
        assert_eq!(out.shape(), &[2, 1]);
        assert_relative_eq!(out[[0, 0]], -0.5);
        assert_relative_eq!(out[[1, 0]], -0.5);
        assert_eq!(tape.len(), 1);
    }

    #[test]
    fn linear_backward_accumulates_gradients() {
        let net = Linear::new(2, 1).unwrap();
        let mut params = ParamSet::new();
        params.insert("weight", arr2(&[[2.0_f32, -1.0]]).into_dyn());
        params.insert("bias", ndarray::arr1(&[0.0_f32]).into_dyn());

        let input = arr2(&[[1.0_f32, 3.0], [2.0, 1.0]]).into_dyn();
        let mut tape = Tape::new();
        let _ = net.forward(&params, &input, Mode::Train, &mut tape).unwrap();

        let grad_out = arr2(&[[1.0_f32], [1.0]]).into_dyn();
        let grad_in = net.backward(&mut params, &grad_out, &mut tape).unwrap();

        // dW = gᵀ·x = [[3, 4]], db = [2], dx rows = w.
        let gw = params.get("weight").unwrap().grad();
        assert_relative_eq!(gw[[0, 0]], 3.0);
        assert_relative_eq!(gw[[0, 1]], 4.0);
        assert_relative_eq!(params.get("bias").unwrap().grad()[[0]], 2.0);
        assert_relative_eq!(grad_in[[0, 0]], 2.0);
        assert_relative_eq!(grad_in[[0, 1]], -1.0);
    }

    #[test]
    fn linear_backward_adds_to_existing_gradient() {
        let net = Linear::new(1, 1).unwrap();
        let mut params = ParamSet::new();
        params.insert("weight", arr2(&[[1.0_f32]]).into_dyn());
        params.insert("bias", ndarray::arr1(&[0.0_f32]).into_dyn());

        let input = arr2(&[[1.0_f32]]).into_dyn();
        let grad_out = arr2(&[[1.0_f32]]).into_dyn();

        let mut tape = Tape::new();
        for _ in 0..2 {
            let _ = net.forward(&params, &input, Mode::Train, &mut tape).unwrap();
            let _ = net.backward(&mut params, &grad_out, &mut tape).unwrap();
        }
        // Two backward passes without zero_grad sum their contributions.
        assert_relative_eq!(params.get("weight").unwrap().grad()[[0, 0]], 2.0);
    }

    #[test]
    fn linear_rejects_bad_input_width() {
        let net = Linear::new(4, 2).unwrap();
        let params = net.init(&mut rng());
        let input = arr2(&[[1.0_f32, 2.0]]).into_dyn();
        let mut tape = Tape::new();
        assert!(net.forward(&params, &input, Mode::Train, &mut tape).is_err());
    }

    #[test]
    fn mlp_layer_naming() {
        let net = Mlp::new(vec![4, 8, 8, 2]).unwrap();
        let params = net.init(&mut rng());
        assert_eq!(
            params.names(),
            vec![
                "head.bias",
                "head.weight",
                "layer1.bias",
                "layer1.weight",
                "layer2.bias",
                "layer2.weight",
            ]
        );
        assert_eq!(params.get("layer1.weight").unwrap().shape(), &[8, 4]);
        assert_eq!(params.get("head.weight").unwrap().shape(), &[2, 8]);
    }

    #[test]
    fn mlp_forward_backward_shapes() {
        let net = Mlp::new(vec![3, 5, 2]).unwrap();
        let mut params = net.init(&mut rng());

        let input = Tensor::zeros(IxDyn(&[4, 3]));
        let mut tape = Tape::new();
        let out = net.forward(&params, &input, Mode::Train, &mut tape).unwrap();
        assert_eq!(out.shape(), &[4, 2]);

        let grad_out = Tensor::ones(IxDyn(&[4, 2]));
        let grad_in = net.backward(&mut params, &grad_out, &mut tape).unwrap();
        assert_eq!(grad_in.shape(), &[4, 3]);
        assert!(tape.is_empty());
    }

    #[test]
    fn mlp_relu_blocks_gradient_for_negative_preactivation() {
        // One hidden unit forced negative: its incoming weights get no grad.
        let net = Mlp::new(vec![1, 1, 1]).unwrap();
        let mut params = ParamSet::new();
        params.insert("layer1.weight", arr2(&[[-1.0_f32]]).into_dyn());
        params.insert("layer1.bias", ndarray::arr1(&[0.0_f32]).into_dyn());
        params.insert("head.weight", arr2(&[[1.0_f32]]).into_dyn());
        params.insert("head.bias", ndarray::arr1(&[0.0_f32]).into_dyn());

        let input = arr2(&[[2.0_f32]]).into_dyn();
        let mut tape = Tape::new();
        let _ = net.forward(&params, &input, Mode::Train, &mut tape).unwrap();
        let grad_out = arr2(&[[1.0_f32]]).into_dyn();
        let _ = net.backward(&mut params, &grad_out, &mut tape).unwrap();

        assert_relative_eq!(params.get("layer1.weight").unwrap().grad()[[0, 0]], 0.0);
    }

    #[test]
    fn mlp_rejects_short_dim_chain() {
        assert!(Mlp::new(vec![4]).is_err());
    }

    #[test]
    fn tape_underflow_is_an_error() {
        let mut tape = Tape::new();
        assert!(tape.pop().is_err());
    }
}
