use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{FactoryConfig, HostConfig};
use crate::error::Result;
use crate::factory::{InProcessAddonFactory, IsolatedAddonFactory};
use crate::lease::{LeaseTable, LeaseTicker};
use crate::registry::{HostModuleRegistry, NativeModule};
use crate::transient;

pub(crate) struct HostShared {
    pub(crate) config: HostConfig,
    pub(crate) registry: Arc<HostModuleRegistry>,
    pub(crate) leases: Arc<LeaseTable>,
    ticker: Mutex<Option<LeaseTicker>>,
    next_domain: AtomicU64,
}

impl HostShared {
    pub(crate) fn next_domain_name(&self, label: &str) -> String {
        let seq = self.next_domain.fetch_add(1, Ordering::Relaxed) + 1;
        let label = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect::<String>();
        let label = if label.is_empty() {
            "domain".to_string()
        } else {
            label
        };
        format!("{label}-{seq}")
    }
}

impl Drop for HostShared {
    fn drop(&mut self) {
        // Factories hold their own Arc to this state, so the ticker only
        // stops once the last of them is gone too.
        if let Some(mut ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
    }
}

/// Root object of the isolation core.
///
/// Owns the host module registry, the lease table, and the background
/// renewal ticker; everything else (factories, transient runs) is handed
/// out from here. Built explicitly — no process-global state.
pub struct AddonHost {
    shared: Arc<HostShared>,
}

impl AddonHost {
    pub fn new() -> Result<Self> {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Result<Self> {
        let leases = Arc::new(LeaseTable::new());
        let ticker = LeaseTicker::spawn(Arc::clone(&leases), config.tick_interval)?;
        Ok(Self {
            shared: Arc::new(HostShared {
                config,
                registry: Arc::new(HostModuleRegistry::new()),
                leases,
                ticker: Mutex::new(Some(ticker)),
                next_domain: AtomicU64::new(0),
            }),
        })
    }

    pub fn registry(&self) -> &HostModuleRegistry {
        &self.shared.registry
    }

    /// Register a module compiled into the host, making it visible to
    /// resolution in every domain.
    pub fn register_native_module(&self, module: Arc<dyn NativeModule>) {
        self.shared.registry.register_native(module);
    }

    /// Factory hosting `config.type_name` inside its own isolation domain.
    pub fn isolated_factory(&self, config: FactoryConfig) -> Result<IsolatedAddonFactory> {
        IsolatedAddonFactory::new(Arc::clone(&self.shared), config)
    }

    /// Factory instantiating a host-registered type with no isolation.
    pub fn in_process_factory(
        &self,
        module: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Result<InProcessAddonFactory> {
        InProcessAddonFactory::new(Arc::clone(&self.shared), module, type_name)
    }

    /// Run one closure inside a throwaway isolation domain. See
    /// [`transient::execute`].
    pub fn execute<S, R>(
        &self,
        probe_paths: &str,
        state: S,
        f: impl FnOnce(S) -> anyhow::Result<R> + Send + 'static,
    ) -> Result<R>
    where
        S: Send + 'static,
        R: Send + 'static,
    {
        transient::execute(&self.shared, probe_paths, state, f)
    }

    /// Instantiate a type inside a throwaway domain and hand it to a
    /// closure. See [`transient::query_type`].
    pub fn query_type<S, R>(
        &self,
        module: &str,
        type_name: &str,
        probe_paths: &str,
        state: S,
        f: impl FnOnce(&mut cloister_addon_api::AddonCell, S) -> anyhow::Result<R> + Send + 'static,
    ) -> Result<R>
    where
        S: Send + 'static,
        R: Send + 'static,
    {
        transient::query_type(&self.shared, module, type_name, probe_paths, state, f)
    }

    pub fn lease_count(&self) -> usize {
        self.shared.leases.active_count()
    }
}
