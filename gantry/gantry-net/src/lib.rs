//! Numeric substrate for the Gantry training harness.
//!
//! This crate holds everything the harness needs from a computation
//! runtime, behind narrow seams:
//!
//! - [`Tensor`] / [`TensorData`] - live tensors and their serializable form
//! - [`Param`] / [`ParamSet`] - named trainable parameters with gradient
//!   buffers, exclusively owned by one trainable unit
//! - [`Device`] / [`DevicePlan`] - execution placement, including the
//!   data-parallel chunking plan
//! - [`Network`] / [`Tape`] - the forward/backward contract, with
//!   [`Linear`] and [`Mlp`] reference implementations
//! - [`Criterion`] - loss functions ([`MseLoss`], [`BceWithLogitsLoss`])
//!
//! The crate performs no I/O and knows nothing about checkpoints,
//! optimizers, or run lifecycles.

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod device;
mod error;
mod loss;
mod network;
mod param;
mod tensor;

pub use device::{Device, DevicePlan};
pub use error::{NetError, Result};
pub use loss::{BceWithLogitsLoss, Criterion, MseLoss};
pub use network::{Linear, Mlp, Mode, Network, Tape};
pub use param::{Param, ParamSet};
pub use tensor::{Tensor, TensorData};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        BceWithLogitsLoss, Criterion, Device, DevicePlan, Linear, Mlp, Mode, MseLoss, NetError,
        Network, Param, ParamSet, Tape, Tensor, TensorData,
    };
}
