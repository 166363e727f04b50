//! Loss functions with closed-form gradients.

use crate::error::{NetError, Result};
use crate::tensor::Tensor;

fn check_shapes(output: &Tensor, target: &Tensor) -> Result<()> {
    if output.shape() != target.shape() {
        return Err(NetError::shape_mismatch(format!(
            "output {:?} vs target {:?}",
            output.shape(),
            target.shape()
        )));
    }
    if output.is_empty() {
        return Err(NetError::shape_mismatch("empty output"));
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn count(output: &Tensor) -> f32 {
    output.len() as f32
}

/// A differentiable loss over matching output/target tensors.
pub trait Criterion: Send {
    /// Computes the scalar loss.
    ///
    /// # Errors
    ///
    /// Returns `NetError::ShapeMismatch` when output and target disagree.
    fn forward(&self, output: &Tensor, target: &Tensor) -> Result<f32>;

    /// Computes the gradient of the loss with respect to the output.
    ///
    /// # Errors
    ///
    /// Returns `NetError::ShapeMismatch` when output and target disagree.
    fn backward(&self, output: &Tensor, target: &Tensor) -> Result<Tensor>;
}

/// Mean squared error: `mean((output - target)²)`.
///
/// # Example
///
/// ```
/// use gantry_net::{Criterion, MseLoss};
/// use ndarray::arr1;
///
/// let loss = MseLoss;
/// let out = arr1(&[1.0_f32, 2.0]).into_dyn();
/// let tgt = arr1(&[0.0_f32, 2.0]).into_dyn();
/// assert!((loss.forward(&out, &tgt).unwrap() - 0.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl Criterion for MseLoss {
    fn forward(&self, output: &Tensor, target: &Tensor) -> Result<f32> {
        check_shapes(output, target)?;
        let n = count(output);
        let sum: f32 = output
            .iter()
            .zip(target.iter())
            .map(|(&o, &t)| (o - t) * (o - t))
            .sum();
        Ok(sum / n)
    }

    fn backward(&self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        check_shapes(output, target)?;
        let n = count(output);
        Ok((output - target) * (2.0 / n))
    }
}

/// Binary cross-entropy over logits, numerically stabilized.
///
/// `mean(max(o, 0) - o·t + ln(1 + e^(-|o|)))` with targets in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BceWithLogitsLoss;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Criterion for BceWithLogitsLoss {
    fn forward(&self, output: &Tensor, target: &Tensor) -> Result<f32> {
        check_shapes(output, target)?;
        let n = count(output);
        let sum: f32 = output
            .iter()
            .zip(target.iter())
            .map(|(&o, &t)| o.max(0.0) - o * t + (1.0 + (-o.abs()).exp()).ln())
            .sum();
        Ok(sum / n)
    }

    fn backward(&self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        check_shapes(output, target)?;
        let n = count(output);
        let mut grad = output.clone();
        grad.zip_mut_with(target, |o, &t| *o = (sigmoid(*o) - t) / n);
        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn mse_forward_and_backward() {
        let loss = MseLoss;
        let out = arr2(&[[1.0_f32, 2.0], [3.0, 4.0]]).into_dyn();
        let tgt = arr2(&[[1.0_f32, 0.0], [3.0, 2.0]]).into_dyn();

        assert_relative_eq!(loss.forward(&out, &tgt).unwrap(), 2.0);

        let grad = loss.backward(&out, &tgt).unwrap();
        assert_relative_eq!(grad[[0, 0]], 0.0);
        assert_relative_eq!(grad[[0, 1]], 1.0);
        assert_relative_eq!(grad[[1, 1]], 1.0);
    }

    #[test]
    fn mse_zero_at_perfect_prediction() {
        let loss = MseLoss;
        let out = arr1(&[0.5_f32, -0.5]).into_dyn();
        assert_relative_eq!(loss.forward(&out, &out.clone()).unwrap(), 0.0);
    }

    #[test]
    fn mse_rejects_shape_mismatch() {
        let loss = MseLoss;
        let out = arr1(&[1.0_f32, 2.0]).into_dyn();
        let tgt = arr1(&[1.0_f32]).into_dyn();
        assert!(loss.forward(&out, &tgt).is_err());
        assert!(loss.backward(&out, &tgt).is_err());
    }

    #[test]
    fn bce_matches_reference_values() {
        let loss = BceWithLogitsLoss;
        let out = arr1(&[0.0_f32]).into_dyn();
        let tgt = arr1(&[1.0_f32]).into_dyn();
        // -ln(sigmoid(0)) = ln 2
        assert_relative_eq!(
            loss.forward(&out, &tgt).unwrap(),
            std::f32::consts::LN_2,
            epsilon = 1e-6
        );
    }

    #[test]
    fn bce_gradient_sign() {
        let loss = BceWithLogitsLoss;
        let out = arr1(&[2.0_f32, -2.0]).into_dyn();
        let tgt = arr1(&[0.0_f32, 1.0]).into_dyn();
        let grad = loss.backward(&out, &tgt).unwrap();

        // Overconfident positive logit with target 0 pushes down, and
        // vice versa.
        assert!(grad[[0]] > 0.0);
        assert!(grad[[1]] < 0.0);
    }

    #[test]
    fn bce_stable_for_large_logits() {
        let loss = BceWithLogitsLoss;
        let out = arr1(&[80.0_f32, -80.0]).into_dyn();
        let tgt = arr1(&[1.0_f32, 0.0]).into_dyn();
        let value = loss.forward(&out, &tgt).unwrap();
        assert!(value.is_finite());
        assert!(value < 1e-6);
    }
}
