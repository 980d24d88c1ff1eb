//! Isolation domains: reclaimable code-loading contexts.
//!
//! A domain is a dedicated worker thread that exclusively owns every module
//! loaded into it and every addon instance created inside it. Host-side
//! handles talk to it through blocking message round-trips; destroying the
//! domain stops the worker and reclaims instances and libraries as a unit.

mod actor;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cloister_addon_api::RunStats;
use cloister_runtime::thread_actor::{spawn_actor_named, ActorRef};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::registry::HostModuleRegistry;
use crate::resolve::ModuleLocation;

pub(crate) use actor::{
    CallInstanceMessage, DomainActor, DomainTask, InstanceStatsMessage, InstantiateMessage,
    LoadModuleMessage, ReleaseInstanceMessage, RunTaskMessage, ShutdownMessage,
    StartInstanceMessage, StopInstanceMessage,
};

/// An addon instance living inside one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u64);

/// Domain module-resolution setup.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub base_dir: PathBuf,
    pub probe_paths: String,
}

struct DomainInner {
    name: String,
    actor: ActorRef<DomainActor>,
    join: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

/// Handle onto one isolation domain. Cheap to clone; all clones become
/// unusable together once the domain is destroyed.
#[derive(Clone)]
pub struct IsolationDomain {
    inner: Arc<DomainInner>,
}

impl IsolationDomain {
    pub(crate) fn create(
        name: String,
        config: DomainConfig,
        registry: Arc<HostModuleRegistry>,
    ) -> Result<Self> {
        let actor_state = DomainActor::new(name.clone(), config, registry);
        let (actor, join) = spawn_actor_named(actor_state, format!("cloister-domain-{name}"))?;
        tracing::info!(target: "cloister_host::domain", domain = %name, "domain created");
        Ok(Self {
            inner: Arc::new(DomainInner {
                name,
                actor,
                join: Mutex::new(Some(join)),
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    fn gone(&self, reason: impl Into<String>) -> Error {
        Error::domain_unavailable(&self.inner.name, reason)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(self.gone("domain has been destroyed"))
        } else {
            Ok(())
        }
    }

    /// Load a module into the domain, resolving bare names through the host
    /// registry and probe paths. Idempotent per module name; returns the
    /// loaded module's name.
    pub fn load_module(&self, location: ModuleLocation) -> Result<String> {
        self.ensure_usable()?;
        self.inner
            .actor
            .call(LoadModuleMessage { location })
            .map_err(|e| self.gone(e.to_string()))?
    }

    /// Create an instance of `type_name` from `location` inside the domain.
    /// On failure the domain — including any modules loaded along the way —
    /// stays intact for inspection or retry.
    pub fn instantiate(&self, location: ModuleLocation, type_name: &str) -> Result<InstanceId> {
        self.ensure_usable()?;
        self.inner
            .actor
            .call(InstantiateMessage {
                location,
                type_name: type_name.to_string(),
            })
            .map_err(|e| self.gone(e.to_string()))?
    }

    pub fn start_instance(&self, id: InstanceId) -> Result<()> {
        self.ensure_usable()?;
        self.inner
            .actor
            .call(StartInstanceMessage { id })
            .map_err(|e| self.gone(e.to_string()))?
    }

    pub fn stop_instance(&self, id: InstanceId) -> Result<()> {
        self.ensure_usable()?;
        self.inner
            .actor
            .call(StopInstanceMessage { id })
            .map_err(|e| self.gone(e.to_string()))?
    }

    pub fn call_instance(&self, id: InstanceId, method: &str, args_json: &str) -> Result<String> {
        self.ensure_usable()?;
        self.inner
            .actor
            .call(CallInstanceMessage {
                id,
                method: method.to_string(),
                args_json: args_json.to_string(),
            })
            .map_err(|e| self.gone(e.to_string()))?
    }

    pub fn instance_stats(&self, id: InstanceId) -> Result<RunStats> {
        self.ensure_usable()?;
        self.inner
            .actor
            .call(InstanceStatsMessage { id })
            .map_err(|e| self.gone(e.to_string()))?
    }

    /// Drop an instance without touching the rest of the domain. Used when
    /// a lease expires; fire-and-forget so the ticker never blocks on the
    /// domain.
    pub fn release_instance(&self, id: InstanceId) {
        let _ = self.inner.actor.cast(ReleaseInstanceMessage { id });
    }

    /// Run a closure on the domain worker thread. Panics inside the closure
    /// are captured as `Invocation` errors; the domain survives.
    pub(crate) fn run_task(
        &self,
        label: &'static str,
        task: DomainTask,
    ) -> Result<Box<dyn std::any::Any + Send>> {
        self.ensure_usable()?;
        self.inner
            .actor
            .call(RunTaskMessage { label, task })
            .map_err(|e| self.gone(e.to_string()))?
    }

    /// Tear the domain down: stop the worker and reclaim every instance and
    /// module loaded into it. Idempotent; safe to call after proxies were
    /// already released.
    pub fn destroy(&self) -> Result<()> {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // A closed mailbox just means the worker is already gone.
        let _ = self.inner.actor.call(ShutdownMessage);
        if let Some(join) = self.inner.join.lock().take() {
            let _ = join.join();
        }
        tracing::info!(target: "cloister_host::domain", domain = %self.inner.name, "domain destroyed");
        Ok(())
    }
}

impl Drop for DomainInner {
    fn drop(&mut self) {
        // Last handle gone without an explicit destroy: detach-stop the
        // worker so its modules still get reclaimed.
        if !self.destroyed.load(Ordering::Acquire) {
            let _ = self.actor.cast(ShutdownMessage);
        }
    }
}
