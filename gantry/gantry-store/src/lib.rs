//! Checkpoint persistence and restore remapping for the Gantry harness.
//!
//! # Components
//!
//! - [`CheckpointRecord`] / [`Query`] - the persisted snapshot shape and
//!   how snapshots are selected
//! - [`DocumentStore`] - the narrow persistence contract, with
//!   [`MemoryStore`] and [`JsonFileStore`] implementations
//! - [`remap`] / [`apply`] / [`RestoreFilter`] - translation of a saved
//!   parameter mapping into a differently named/shaped parameter space,
//!   with partial-success reporting via [`RestoreReport`]
//!
//! The remapping half operates purely on named tensor payloads and string
//! rules; it is testable with no numeric runtime at all.

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod record;
mod remap;
mod store;

pub use error::{Result, StoreError};
pub use record::{CheckpointRecord, Query};
pub use remap::{apply, remap, FilterMode, RestoreFilter, RestoreMismatch, RestoreReport};
pub use store::{DocumentStore, JsonFileStore, MemoryStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        apply, remap, CheckpointRecord, DocumentStore, FilterMode, JsonFileStore, MemoryStore,
        Query, RestoreFilter, RestoreMismatch, RestoreReport, StoreError,
    };
}
