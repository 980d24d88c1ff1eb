//! Single-shot execution inside a throwaway isolation domain.
//!
//! Both entry points spin up a fresh domain, run caller code on its worker
//! thread, and unconditionally tear the domain down on the way out — a
//! guard handles teardown even when the caller's closure errors or panics,
//! so no module loaded for the run outlives it.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use cloister_addon_api::AddonCell;

use crate::config::strip_type_qualifier;
use crate::domain::{DomainConfig, IsolationDomain};
use crate::error::{Error, Result};
use crate::host::HostShared;
use crate::resolve::ModuleLocation;

/// Destroys the domain when the run ends, however it ends.
struct TeardownGuard {
    domain: IsolationDomain,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Err(err) = self.domain.destroy() {
            tracing::warn!(
                target: "cloister_host::transient",
                domain = %self.domain.name(),
                error = %err,
                "transient domain teardown failed"
            );
        }
    }
}

fn fresh_domain(
    host: &Arc<HostShared>,
    label: &str,
    base_dir: PathBuf,
    probe_paths: &str,
) -> Result<IsolationDomain> {
    IsolationDomain::create(
        host.next_domain_name(label),
        DomainConfig {
            base_dir,
            probe_paths: probe_paths.to_string(),
        },
        Arc::clone(&host.registry),
    )
}

fn unbox<R: Send + 'static>(value: Box<dyn Any + Send>) -> Result<R> {
    match value.downcast::<Result<R>>() {
        Ok(result) => *result,
        Err(_) => Err(Error::invocation(
            "transient execution",
            "task returned an unexpected value type",
        )),
    }
}

/// Run `f(state)` inside a fresh domain and return its outcome. A failure
/// or panic inside `f` comes back as the error value — it never takes the
/// host down — and the domain is gone by the time this returns.
pub(crate) fn execute<S, R>(
    host: &Arc<HostShared>,
    probe_paths: &str,
    state: S,
    f: impl FnOnce(S) -> anyhow::Result<R> + Send + 'static,
) -> Result<R>
where
    S: Send + 'static,
    R: Send + 'static,
{
    let domain = fresh_domain(host, "transient", PathBuf::from("."), probe_paths)?;
    let guard = TeardownGuard {
        domain: domain.clone(),
    };

    let boxed = domain.run_task(
        "transient execution",
        Box::new(move |_actor| -> Box<dyn Any + Send> {
            let outcome: Result<R> = f(state)
                .map_err(|e| Error::invocation("transient execution", format!("{e:#}")));
            Box::new(outcome)
        }),
    )?;
    drop(guard);
    unbox(boxed)
}

/// Resolve `module`, instantiate `type_name` inside a fresh domain, and
/// hand the instance to `f` on the domain thread. Teardown is unconditional,
/// so nothing loaded for the query is retained afterwards.
pub(crate) fn query_type<S, R>(
    host: &Arc<HostShared>,
    module: &str,
    type_name: &str,
    probe_paths: &str,
    state: S,
    f: impl FnOnce(&mut AddonCell, S) -> anyhow::Result<R> + Send + 'static,
) -> Result<R>
where
    S: Send + 'static,
    R: Send + 'static,
{
    let location = ModuleLocation::parse(module);
    let base_dir = match &location {
        ModuleLocation::Path(path) => path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        ModuleLocation::Name(_) => PathBuf::from("."),
    };
    let type_name = strip_type_qualifier(type_name).to_string();

    let domain = fresh_domain(host, "query", base_dir, probe_paths)?;
    let guard = TeardownGuard {
        domain: domain.clone(),
    };

    let boxed = domain.run_task(
        "transient type query",
        Box::new(move |actor| -> Box<dyn Any + Send> {
            let outcome: Result<R> = (|| {
                let id = actor.instantiate_internal(&location, &type_name)?;
                let cell = actor.cell_mut(id)?;
                f(cell, state)
                    .map_err(|e| Error::invocation("transient type query", format!("{e:#}")))
            })();
            Box::new(outcome)
        }),
    )?;
    drop(guard);
    unbox(boxed)
}
