use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use cloister_addon_api::{panic_message, AddonCell, RunStats};
use parking_lot::Mutex;

use crate::domain::{InstanceId, IsolationDomain};
use crate::error::{Error, Result};
use crate::lease::LeaseHandle;

enum ProxyTarget {
    /// Instance inside an isolation domain, guarded by a lease.
    Domain {
        domain: IsolationDomain,
        instance: InstanceId,
        lease: LeaseHandle,
    },
    /// Trusted in-host instance; same surface, no isolation, no lease.
    Local { cell: Mutex<AddonCell> },
}

struct ProxyInner {
    type_name: String,
    target: ProxyTarget,
}

/// Host-side handle for an addon instance.
///
/// Clones share the same underlying instance; calls are synchronous and
/// block the calling thread until the hosting side returns or raises. Once
/// the owning domain is destroyed (or the lease has expired) every clone
/// fails the same way.
#[derive(Clone)]
pub struct AddonProxy {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for AddonProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("AddonProxy");
        out.field("type_name", &self.inner.type_name);
        match &self.inner.target {
            ProxyTarget::Domain {
                domain, instance, ..
            } => {
                out.field("domain", &domain.name());
                out.field("instance", &instance.0);
            }
            ProxyTarget::Local { .. } => {
                out.field("target", &"in-process");
            }
        }
        out.finish()
    }
}

impl AddonProxy {
    pub(crate) fn isolated(
        type_name: impl Into<String>,
        domain: IsolationDomain,
        instance: InstanceId,
        lease: LeaseHandle,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                type_name: type_name.into(),
                target: ProxyTarget::Domain {
                    domain,
                    instance,
                    lease,
                },
            }),
        }
    }

    pub(crate) fn local(type_name: impl Into<String>, cell: AddonCell) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                type_name: type_name.into(),
                target: ProxyTarget::Local {
                    cell: Mutex::new(cell),
                },
            }),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// True when both handles refer to the same underlying instance.
    pub fn same_instance(&self, other: &AddonProxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        match &self.inner.target {
            ProxyTarget::Domain { instance, .. } => Some(*instance),
            ProxyTarget::Local { .. } => None,
        }
    }

    pub fn domain_name(&self) -> Option<&str> {
        match &self.inner.target {
            ProxyTarget::Domain { domain, .. } => Some(domain.name()),
            ProxyTarget::Local { .. } => None,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if let ProxyTarget::Domain { domain, lease, .. } = &self.inner.target {
            if domain.is_destroyed() {
                return Err(Error::proxy_invalid(
                    &self.inner.type_name,
                    format!("domain `{}` has been destroyed", domain.name()),
                ));
            }
            if !lease.is_active() {
                return Err(Error::proxy_invalid(
                    &self.inner.type_name,
                    "its lease has expired",
                ));
            }
        }
        Ok(())
    }

    fn with_local<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut AddonCell) -> anyhow::Result<R>,
    ) -> Result<R> {
        let ProxyTarget::Local { cell } = &self.inner.target else {
            unreachable!("with_local on a domain-backed proxy");
        };
        let mut cell = cell.lock();
        let op = format!("{}.{operation}", self.inner.type_name);
        match catch_unwind(AssertUnwindSafe(|| f(&mut cell))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::invocation(op, format!("{err:#}"))),
            Err(payload) => Err(Error::invocation(
                op,
                format!("panicked: {}", panic_message(payload)),
            )),
        }
    }

    pub fn start(&self) -> Result<()> {
        self.ensure_live()?;
        match &self.inner.target {
            ProxyTarget::Domain {
                domain, instance, ..
            } => domain.start_instance(*instance),
            ProxyTarget::Local { .. } => self.with_local("start", |cell| cell.start()),
        }
    }

    pub fn stop(&self) -> Result<()> {
        self.ensure_live()?;
        match &self.inner.target {
            ProxyTarget::Domain {
                domain, instance, ..
            } => domain.stop_instance(*instance),
            ProxyTarget::Local { .. } => self.with_local("stop", |cell| cell.stop()),
        }
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.stats()?.is_running)
    }

    pub fn stats(&self) -> Result<RunStats> {
        self.ensure_live()?;
        match &self.inner.target {
            ProxyTarget::Domain {
                domain, instance, ..
            } => domain.instance_stats(*instance),
            ProxyTarget::Local { cell } => Ok(cell.lock().stats()),
        }
    }

    /// Dispatch a method. Arguments and the result cross the boundary by
    /// value; a failure inside the addon comes back as `Invocation` with
    /// the original message preserved.
    pub fn call(&self, method: &str, args_json: &str) -> Result<String> {
        self.ensure_live()?;
        match &self.inner.target {
            ProxyTarget::Domain {
                domain, instance, ..
            } => domain.call_instance(*instance, method, args_json),
            ProxyTarget::Local { .. } => {
                self.with_local(method, |cell| cell.call(method, args_json))
            }
        }
    }
}
