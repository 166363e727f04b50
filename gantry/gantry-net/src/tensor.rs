//! Tensor payloads shared between the live graph and persisted checkpoints.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// Dense float tensor used throughout the harness.
pub type Tensor = ArrayD<f32>;

/// Serializable tensor payload: shape plus row-major data.
///
/// This is the on-the-wire form of a parameter tensor inside a checkpoint
/// record. It is deliberately dumb — shape and values, nothing else — so a
/// saved mapping can be filtered and renamed without touching any runtime.
///
/// # Example
///
/// ```
/// use gantry_net::TensorData;
///
/// let data = TensorData::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
/// assert_eq!(data.shape(), &[2, 2]);
/// assert_eq!(data.len(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Tensor shape.
    shape: Vec<usize>,

    /// Row-major values.
    data: Vec<f32>,
}

impl TensorData {
    /// Creates a tensor payload, validating that the data length matches
    /// the shape.
    ///
    /// # Errors
    ///
    /// Returns `NetError::ShapeMismatch` if `data.len()` is not the product
    /// of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(NetError::shape_mismatch(format!(
                "shape {shape:?} requires {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Snapshots a live tensor into a payload.
    #[must_use]
    pub fn from_tensor(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            data: tensor.iter().copied().collect(),
        }
    }

    /// Reconstructs a live tensor from the payload.
    ///
    /// # Errors
    ///
    /// Returns `NetError::ShapeMismatch` if the payload is internally
    /// inconsistent (possible after deserializing untrusted input).
    pub fn to_tensor(&self) -> Result<Tensor> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone())
            .map_err(|e| NetError::shape_mismatch(e.to_string()))
    }

    /// Returns the tensor shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of scalar values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the raw values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn new_validates_length() {
        assert!(TensorData::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(TensorData::new(vec![2, 3], vec![0.0; 5]).is_err());
    }

    #[test]
    fn roundtrip_preserves_values() {
        let tensor = arr2(&[[1.0_f32, 2.0], [3.0, 4.0]]).into_dyn();
        let data = TensorData::from_tensor(&tensor);
        assert_eq!(data.shape(), &[2, 2]);

        let back = data.to_tensor().unwrap();
        assert_eq!(back, tensor);
    }

    #[test]
    fn to_tensor_rejects_inconsistent_payload() {
        // Bypass `new` the way a hand-edited JSON document would.
        let json = r#"{"shape": [3, 3], "data": [1.0, 2.0]}"#;
        let data: TensorData = serde_json::from_str(json).unwrap();
        assert!(data.to_tensor().is_err());
    }

    #[test]
    fn serialization_roundtrip() {
        let data = TensorData::new(vec![2], vec![0.5, -0.5]).unwrap();
        let json = serde_json::to_string(&data).unwrap();
        let parsed: TensorData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, data);
    }
}
