use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use cloister_addon_api::AddonCell;
use parking_lot::Mutex;

use crate::config::{strip_type_qualifier, FactoryConfig};
use crate::domain::{DomainConfig, IsolationDomain};
use crate::error::{Error, Result};
use crate::host::HostShared;
use crate::lease::{LeaseHandle, LeaseStatus, Sponsor};
use crate::proxy::AddonProxy;
use crate::registry::HostModuleHit;
use crate::resolve::ModuleLocation;

/// The uniform factory surface: one loadable addon per factory.
///
/// `load` is idempotent — repeated calls without an intervening `unload`
/// hand back the same proxy. `addon` is the lazy accessor spelling of the
/// same operation.
pub trait AddonFactory: Send + Sync {
    fn is_loaded(&self) -> bool;

    fn load(&self) -> Result<AddonProxy>;

    fn addon(&self) -> Result<AddonProxy> {
        self.load()
    }

    fn unload(&self) -> Result<()>;
}

/// Keeps a factory's lease alive exactly as long as the factory itself
/// reports loaded. The check is one atomic read; the ticker may race
/// `unload` freely.
struct FactorySponsor {
    loaded: Weak<AtomicBool>,
}

impl Sponsor for FactorySponsor {
    fn renewal(&self, status: &LeaseStatus) -> Option<Duration> {
        let loaded = self.loaded.upgrade()?;
        if loaded.load(Ordering::Acquire) {
            Some(status.renewal_window)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct FactoryState {
    domain: Option<IsolationDomain>,
    proxy: Option<AddonProxy>,
    lease: Option<LeaseHandle>,
}

/// Factory hosting its addon inside a dedicated isolation domain.
///
/// Load and unload are serialized per factory; two threads can never race
/// one factory into two domains. Unloading reclaims the domain and every
/// module loaded into it.
pub struct IsolatedAddonFactory {
    host: Arc<HostShared>,
    config: FactoryConfig,
    loaded: Arc<AtomicBool>,
    state: Mutex<FactoryState>,
}

impl IsolatedAddonFactory {
    pub(crate) fn new(host: Arc<HostShared>, config: FactoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            host,
            config,
            loaded: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(FactoryState::default()),
        })
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Name of the domain currently backing this factory, if any.
    pub fn domain_name(&self) -> Option<String> {
        self.state
            .lock()
            .domain
            .as_ref()
            .map(|d| d.name().to_string())
    }
}

impl AddonFactory for IsolatedAddonFactory {
    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn load(&self) -> Result<AddonProxy> {
        let mut state = self.state.lock();
        if let Some(proxy) = &state.proxy {
            return Ok(proxy.clone());
        }

        let type_name = strip_type_qualifier(&self.config.type_name).to_string();

        // A domain left behind by an earlier failed attempt is reused;
        // repeated failures must not pay repeated domain creation.
        let domain = match &state.domain {
            Some(domain) => domain.clone(),
            None => {
                let domain = IsolationDomain::create(
                    self.host.next_domain_name(&type_name),
                    DomainConfig {
                        base_dir: self.config.effective_base_dir(),
                        probe_paths: self.config.probe_paths.clone(),
                    },
                    Arc::clone(&self.host.registry),
                )?;
                state.domain = Some(domain.clone());
                domain
            }
        };

        // Preloads run in list order; the first failure aborts the load and
        // propagates, leaving the domain in place.
        for module in &self.config.preload {
            domain.load_module(ModuleLocation::parse(module))?;
        }

        let location = ModuleLocation::parse(&self.config.module);
        let instance = domain.instantiate(location, &type_name)?;

        let sponsor = Arc::new(FactorySponsor {
            loaded: Arc::downgrade(&self.loaded),
        });
        let expire_domain = domain.clone();
        let lease = self.host.leases.register(
            self.host.config.lease_window,
            Some(sponsor),
            Some(Box::new(move || expire_domain.release_instance(instance))),
        );

        let proxy = AddonProxy::isolated(&type_name, domain, instance, lease.clone());
        state.proxy = Some(proxy.clone());
        state.lease = Some(lease);
        self.loaded.store(true, Ordering::Release);
        tracing::info!(
            target: "cloister_host::factory",
            type_name = %type_name,
            module = %self.config.module,
            "addon loaded"
        );
        Ok(proxy)
    }

    /// Teardown order matters: the sponsor is detached before anything else
    /// so a renewal query racing this unload reads "do not renew" instead
    /// of touching a half-dismantled factory.
    fn unload(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.proxy.is_none() {
            return Ok(());
        }
        self.loaded.store(false, Ordering::Release);
        if let Some(lease) = state.lease.take() {
            lease.unregister_sponsor();
            lease.release();
        }
        state.proxy = None;
        if let Some(domain) = state.domain.take() {
            domain.destroy()?;
        }
        tracing::info!(
            target: "cloister_host::factory",
            type_name = %self.config.type_name,
            "addon unloaded"
        );
        Ok(())
    }
}

impl Drop for IsolatedAddonFactory {
    fn drop(&mut self) {
        self.loaded.store(false, Ordering::Release);
        let mut state = self.state.lock();
        if let Some(lease) = state.lease.take() {
            lease.unregister_sponsor();
            lease.release();
        }
        state.proxy = None;
        // Also reclaims a domain left by a failed load that never completed.
        if let Some(domain) = state.domain.take() {
            if let Err(err) = domain.destroy() {
                tracing::warn!(
                    target: "cloister_host::factory",
                    error = %err,
                    "domain teardown on factory drop failed"
                );
            }
        }
    }
}

/// Factory instantiating its addon directly in the host: same shape as the
/// isolated path, for trusted components that need no reclaim boundary.
pub struct InProcessAddonFactory {
    host: Arc<HostShared>,
    module: String,
    type_name: String,
    proxy: Mutex<Option<AddonProxy>>,
}

impl InProcessAddonFactory {
    pub(crate) fn new(
        host: Arc<HostShared>,
        module: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Result<Self> {
        let module = module.into();
        let type_name = type_name.into();
        if type_name.trim().is_empty() {
            return Err(Error::configuration("type_name", "must not be blank"));
        }
        if module.trim().is_empty() {
            return Err(Error::configuration("module", "must not be blank"));
        }
        Ok(Self {
            host,
            module,
            type_name,
            proxy: Mutex::new(None),
        })
    }
}

impl AddonFactory for InProcessAddonFactory {
    fn is_loaded(&self) -> bool {
        self.proxy.lock().is_some()
    }

    fn load(&self) -> Result<AddonProxy> {
        let mut slot = self.proxy.lock();
        if let Some(proxy) = &*slot {
            return Ok(proxy.clone());
        }
        let type_name = strip_type_qualifier(&self.type_name).to_string();
        let hit = self
            .host
            .registry
            .resolve_loaded(&self.module)
            .ok_or_else(|| {
                Error::module_not_found(&self.module, &["host-loaded modules".to_string()])
            })?;
        let module = match hit {
            HostModuleHit::Native(module) => module,
            HostModuleHit::Library { name, .. } => {
                return Err(Error::instantiation(
                    "host",
                    &type_name,
                    format!(
                        "module `{name}` is a library on disk; in-process factories require a \
                         host-registered native module"
                    ),
                ))
            }
        };
        let addon = module
            .create(&type_name)
            .map_err(|e| Error::instantiation("host", &type_name, format!("{e:#}")))?;
        let proxy = AddonProxy::local(&type_name, AddonCell::new(addon));
        *slot = Some(proxy.clone());
        tracing::info!(
            target: "cloister_host::factory",
            type_name = %type_name,
            module = %self.module,
            "in-process addon loaded"
        );
        Ok(proxy)
    }

    fn unload(&self) -> Result<()> {
        self.proxy.lock().take();
        Ok(())
    }
}
