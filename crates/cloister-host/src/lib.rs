//! Isolated, reclaimable execution of dynamically loaded addons.
//!
//! The pieces, leaves first: a module resolver probing the host registry
//! and configured directories; isolation domains (worker threads owning
//! loaded modules and instances, reclaimed as a unit); remote proxies whose
//! calls cross the domain boundary synchronously; a lease/sponsor renewal
//! protocol keeping proxied instances alive exactly as long as someone
//! vouches for them; proxy factories tying it together; and a transient
//! helper for run-once-and-tear-down execution.

pub mod config;
pub mod domain;
pub mod error;
pub mod factory;
pub mod host;
pub mod lease;
pub mod module;
pub mod proxy;
pub mod registry;
pub mod resolve;
mod transient;

pub use config::{strip_type_qualifier, FactoryConfig, HostConfig, PROBE_PATH_SEPARATOR};
pub use domain::{DomainConfig, InstanceId, IsolationDomain};
pub use error::{Error, Result};
pub use factory::{AddonFactory, InProcessAddonFactory, IsolatedAddonFactory};
pub use host::AddonHost;
pub use lease::{LeaseHandle, LeaseId, LeaseStatus, LeaseTable, LeaseTicker, Sponsor};
pub use proxy::AddonProxy;
pub use registry::{HostModuleHit, HostModuleRegistry, NativeModule};
pub use resolve::{
    discover_library_files, dynamic_library_ext, is_dynamic_library_file, resolve,
    split_probe_paths, ModuleLocation, ResolvedModule,
};

#[cfg(test)]
mod tests;
