//! Contract crate shared by the addon host and dynamically loaded addons.
//!
//! Holds the versioned C ABI crossed by `cdylib` addon modules, the
//! Rust-side [`Addon`] trait with its Start/Stop lifecycle bookkeeping, and
//! the export helpers addon crates use to emit a loadable module.

mod abi;
mod addon;
pub mod export;

pub use abi::*;
pub use addon::{Addon, AddonCell, RunStats};
pub use export::{instance_ref_from_addon, panic_message, AddonTypeExport};
