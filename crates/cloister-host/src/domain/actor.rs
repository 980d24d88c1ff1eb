use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use cloister_addon_api::{panic_message, AddonCell, RunStats};
use cloister_runtime::thread_actor::{ActorContext, Handler, Message};

use crate::domain::{DomainConfig, InstanceId};
use crate::error::{Error, Result};
use crate::module::{DylibModule, LoadedModule};
use crate::registry::{HostModuleHit, HostModuleRegistry};
use crate::resolve::{resolve, ModuleLocation, ResolvedModule};

pub(crate) type DomainTask =
    Box<dyn FnOnce(&mut DomainActor) -> Box<dyn Any + Send> + Send + 'static>;

struct InstanceSlot {
    type_name: String,
    cell: AddonCell,
}

/// Worker-thread state of one isolation domain. Exclusive owner of every
/// loaded module and instance; nothing here is ever touched from another
/// thread.
pub(crate) struct DomainActor {
    name: String,
    config: DomainConfig,
    registry: Arc<HostModuleRegistry>,
    // Instances are declared (and therefore dropped) before the modules
    // that created them.
    instances: HashMap<InstanceId, InstanceSlot>,
    modules: Vec<LoadedModule>,
    next_instance: u64,
}

impl DomainActor {
    pub(crate) fn new(
        name: String,
        config: DomainConfig,
        registry: Arc<HostModuleRegistry>,
    ) -> Self {
        Self {
            name,
            config,
            registry,
            instances: HashMap::new(),
            modules: Vec::new(),
            next_instance: 0,
        }
    }

    fn find_module(&self, name: &str) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// Bring a module into the domain, going through the resolver whenever
    /// the domain cannot satisfy the reference on its own. Idempotent per
    /// module name.
    pub(crate) fn ensure_module(&mut self, location: &ModuleLocation) -> Result<String> {
        let requested = location.display_name();
        if let Some(idx) = self.find_module(&requested) {
            return Ok(self.modules[idx].name().to_string());
        }

        let loaded = match location {
            ModuleLocation::Path(path) => {
                let module = DylibModule::load(path)
                    .map_err(|e| Error::module_load(&requested, format!("{e:#}")))?;
                LoadedModule::Dylib(module)
            }
            ModuleLocation::Name(name) => {
                let resolved = resolve(
                    name,
                    &self.config.base_dir,
                    &self.config.probe_paths,
                    &self.registry,
                )?;
                match resolved {
                    ResolvedModule::Host(HostModuleHit::Native(module)) => LoadedModule::Native {
                        name: module.name().to_string(),
                        module,
                    },
                    ResolvedModule::Host(HostModuleHit::Library { name, path })
                    | ResolvedModule::Library { name, path } => {
                        if let Some(idx) = self.find_module(&name) {
                            return Ok(self.modules[idx].name().to_string());
                        }
                        let module = DylibModule::load(&path)
                            .map_err(|e| Error::module_load(&name, format!("{e:#}")))?;
                        LoadedModule::Dylib(module)
                    }
                }
            }
        };

        let name = loaded.name().to_string();
        tracing::debug!(
            target: "cloister_host::domain",
            domain = %self.name,
            module = %name,
            "module loaded into domain"
        );
        self.modules.push(loaded);
        Ok(name)
    }

    /// Create `type_name` from the module at `location`. Modules loaded on
    /// the way to a failure stay loaded, so a retry after fixing the
    /// configuration does not rebuild the domain.
    pub(crate) fn instantiate_internal(
        &mut self,
        location: &ModuleLocation,
        type_name: &str,
    ) -> Result<InstanceId> {
        let module_name = self.ensure_module(location)?;
        let idx = self
            .find_module(&module_name)
            .ok_or_else(|| Error::module_load(&module_name, "module vanished after load"))?;

        let created = catch_unwind(AssertUnwindSafe(|| self.modules[idx].create(type_name)));
        let addon = match created {
            Ok(Ok(addon)) => addon,
            Ok(Err(err)) => {
                return Err(Error::instantiation(
                    &self.name,
                    type_name,
                    format!("{err:#}"),
                ))
            }
            Err(payload) => {
                return Err(Error::instantiation(
                    &self.name,
                    type_name,
                    format!("constructor panicked: {}", panic_message(payload)),
                ))
            }
        };

        self.next_instance += 1;
        let id = InstanceId(self.next_instance);
        self.instances.insert(
            id,
            InstanceSlot {
                type_name: type_name.to_string(),
                cell: AddonCell::new(addon),
            },
        );
        tracing::debug!(
            target: "cloister_host::domain",
            domain = %self.name,
            type_name = %type_name,
            instance = id.0,
            "instance created"
        );
        Ok(id)
    }

    pub(crate) fn cell_mut(&mut self, id: InstanceId) -> Result<&mut AddonCell> {
        let name = self.name.clone();
        match self.instances.get_mut(&id) {
            Some(slot) => Ok(&mut slot.cell),
            None => Err(Error::proxy_invalid(
                format!("instance {}", id.0),
                format!("no longer present in domain `{name}`"),
            )),
        }
    }

    fn with_instance<R>(
        &mut self,
        id: InstanceId,
        operation: &str,
        f: impl FnOnce(&mut AddonCell) -> anyhow::Result<R>,
    ) -> Result<R> {
        let slot = match self.instances.get_mut(&id) {
            Some(slot) => slot,
            None => {
                return Err(Error::proxy_invalid(
                    format!("instance {}", id.0),
                    format!("no longer present in domain `{}`", self.name),
                ))
            }
        };
        let op = format!("{}.{operation}", slot.type_name);
        match catch_unwind(AssertUnwindSafe(|| f(&mut slot.cell))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::invocation(op, format!("{err:#}"))),
            Err(payload) => Err(Error::invocation(
                op,
                format!("panicked: {}", panic_message(payload)),
            )),
        }
    }
}

pub(crate) struct LoadModuleMessage {
    pub location: ModuleLocation,
}

impl Message for LoadModuleMessage {
    type Response = Result<String>;
}

impl Handler<LoadModuleMessage> for DomainActor {
    fn handle(&mut self, message: LoadModuleMessage, _ctx: &mut ActorContext<Self>) -> Result<String> {
        self.ensure_module(&message.location)
    }
}

pub(crate) struct InstantiateMessage {
    pub location: ModuleLocation,
    pub type_name: String,
}

impl Message for InstantiateMessage {
    type Response = Result<InstanceId>;
}

impl Handler<InstantiateMessage> for DomainActor {
    fn handle(
        &mut self,
        message: InstantiateMessage,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<InstanceId> {
        self.instantiate_internal(&message.location, &message.type_name)
    }
}

pub(crate) struct StartInstanceMessage {
    pub id: InstanceId,
}

impl Message for StartInstanceMessage {
    type Response = Result<()>;
}

impl Handler<StartInstanceMessage> for DomainActor {
    fn handle(&mut self, message: StartInstanceMessage, _ctx: &mut ActorContext<Self>) -> Result<()> {
        self.with_instance(message.id, "start", |cell| cell.start())
    }
}

pub(crate) struct StopInstanceMessage {
    pub id: InstanceId,
}

impl Message for StopInstanceMessage {
    type Response = Result<()>;
}

impl Handler<StopInstanceMessage> for DomainActor {
    fn handle(&mut self, message: StopInstanceMessage, _ctx: &mut ActorContext<Self>) -> Result<()> {
        self.with_instance(message.id, "stop", |cell| cell.stop())
    }
}

pub(crate) struct CallInstanceMessage {
    pub id: InstanceId,
    pub method: String,
    pub args_json: String,
}

impl Message for CallInstanceMessage {
    type Response = Result<String>;
}

impl Handler<CallInstanceMessage> for DomainActor {
    fn handle(
        &mut self,
        message: CallInstanceMessage,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<String> {
        self.with_instance(message.id, &message.method, |cell| {
            cell.call(&message.method, &message.args_json)
        })
    }
}

pub(crate) struct InstanceStatsMessage {
    pub id: InstanceId,
}

impl Message for InstanceStatsMessage {
    type Response = Result<RunStats>;
}

impl Handler<InstanceStatsMessage> for DomainActor {
    fn handle(
        &mut self,
        message: InstanceStatsMessage,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<RunStats> {
        match self.instances.get(&message.id) {
            Some(slot) => Ok(slot.cell.stats()),
            None => Err(Error::proxy_invalid(
                format!("instance {}", message.id.0),
                format!("no longer present in domain `{}`", self.name),
            )),
        }
    }
}

pub(crate) struct ReleaseInstanceMessage {
    pub id: InstanceId,
}

impl Message for ReleaseInstanceMessage {
    type Response = ();
}

impl Handler<ReleaseInstanceMessage> for DomainActor {
    fn handle(&mut self, message: ReleaseInstanceMessage, _ctx: &mut ActorContext<Self>) {
        if self.instances.remove(&message.id).is_some() {
            tracing::debug!(
                target: "cloister_host::domain",
                domain = %self.name,
                instance = message.id.0,
                "instance released"
            );
        }
    }
}

pub(crate) struct RunTaskMessage {
    pub label: &'static str,
    pub task: DomainTask,
}

impl Message for RunTaskMessage {
    type Response = Result<Box<dyn Any + Send>>;
}

impl Handler<RunTaskMessage> for DomainActor {
    fn handle(
        &mut self,
        message: RunTaskMessage,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<Box<dyn Any + Send>> {
        let task = message.task;
        catch_unwind(AssertUnwindSafe(|| task(self))).map_err(|payload| {
            Error::invocation(
                message.label,
                format!("panicked: {}", panic_message(payload)),
            )
        })
    }
}

pub(crate) struct ShutdownMessage;

impl Message for ShutdownMessage {
    type Response = ();
}

impl Handler<ShutdownMessage> for DomainActor {
    fn handle(&mut self, _message: ShutdownMessage, ctx: &mut ActorContext<Self>) {
        let instances = self.instances.len();
        let modules = self.modules.len();
        self.instances.clear();
        self.modules.clear();
        tracing::debug!(
            target: "cloister_host::domain",
            domain = %self.name,
            instances,
            modules,
            "domain worker shutting down"
        );
        ctx.stop();
    }
}
