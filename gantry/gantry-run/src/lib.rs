//! Configuration-driven assembly and lifecycle control for training runs.
//!
//! A run is described declaratively as a tree of specification nodes, each
//! naming a capability by its registered `func`. The pieces:
//!
//! - [`CapabilityRegistry`] / [`Selector`] - symbolic names to factories,
//!   framework namespace first, extensions second
//! - [`GraphBuilder`] / [`Args`] / [`Component`] - depth-first assembly of
//!   the object graph, with dotted-path errors
//! - [`OptimizerAdapter`] / [`Algorithm`] ([`Sgd`], [`Adam`]) - update
//!   rules behind an explicit one-shot parameter binding
//! - [`Model`] - the trainable unit: network, parameters, criterion, and
//!   bound optimizer, with data-parallel chunking
//! - [`DataProvider`] ([`ConstantProvider`], [`SyntheticProvider`]) -
//!   batch sources
//! - [`Runner`] / [`RunState`] - the lifecycle controller: train toward an
//!   absolute step budget, checkpoint and validate on cadence, revive from
//!   a stored record
//!
//! # Example
//!
//! ```
//! use gantry_run::{CapabilityRegistry, Runner};
//! use serde_json::json;
//!
//! let registry = CapabilityRegistry::with_defaults();
//! let spec = json!({
//!     "func": "Runner",
//!     "exp_id": "demo",
//!     "model": {
//!         "func": "Model",
//!         "net": {"func": "Linear", "in_dim": 2, "out_dim": 1},
//!         "criterion": {"func": "MSE"},
//!         "optimizer": {"func": "SGD", "defaults": {"lr": 0.1}},
//!     },
//!     "provider": {"func": "ConstantProvider", "in_dim": 2, "out_dim": 1},
//!     "store": {"func": "MemoryStore"},
//!     "train_params": {"num_steps": 10},
//! });
//!
//! let mut runner = Runner::from_spec(&registry, &spec).unwrap();
//! runner.train().unwrap();
//! assert_eq!(runner.global_step(), 10);
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod builder;
mod builtins;
mod config;
mod data;
mod error;
mod model;
mod optimizer;
mod registry;
mod runner;

pub use builder::{Args, Component, GraphBuilder};
pub use config::{FilterSpec, LoadParams, SaveParams, TrainParams, ValidationParams};
pub use data::{Batch, ConstantProvider, DataProvider, SyntheticProvider};
pub use error::{Result, RunError};
pub use model::{Loss, Model};
pub use optimizer::{Adam, AdamOptions, Algorithm, OptimizerAdapter, Sgd, SgdOptions};
pub use registry::{CapabilityRegistry, Factory, Selector};
pub use runner::{RunState, Runner};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        Algorithm, Args, Batch, CapabilityRegistry, Component, ConstantProvider, DataProvider,
        FilterSpec, GraphBuilder, LoadParams, Loss, Model, OptimizerAdapter, RunError, RunState,
        Runner, SaveParams, Selector, SyntheticProvider, TrainParams, ValidationParams,
    };
}
