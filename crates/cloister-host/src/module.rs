use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cloister_addon_api::{
    Addon, ClAddonEntry, ClAddonInstanceRef, ClAddonModule, ClHostVTable, ClLogLevel, ClOwnedStr,
    ClStr, CLOISTER_ADDON_API_VERSION, CLOISTER_ADDON_ENTRY_SYMBOL,
};
use libloading::{Library, Symbol};

use crate::registry::NativeModule;
use crate::resolve::module_name_for_path;

/// A module loaded into an isolation domain.
pub enum LoadedModule {
    /// Host-resident module; calls stay plain Rust.
    Native {
        name: String,
        module: Arc<dyn NativeModule>,
    },
    /// Library loaded through the versioned C ABI.
    Dylib(DylibModule),
}

impl LoadedModule {
    pub fn name(&self) -> &str {
        match self {
            Self::Native { name, .. } => name,
            Self::Dylib(module) => &module.name,
        }
    }

    pub fn type_names(&self) -> Vec<String> {
        match self {
            Self::Native { module, .. } => module.type_names(),
            Self::Dylib(module) => module.type_names(),
        }
    }

    pub fn create(&self, type_name: &str) -> Result<Box<dyn Addon>> {
        match self {
            Self::Native { module, .. } => module.create(type_name),
            Self::Dylib(module) => module.create(type_name),
        }
    }
}

extern "C" fn host_log(
    _user_data: *mut core::ffi::c_void,
    level: ClLogLevel,
    msg_utf8: ClStr,
) {
    // SAFETY: the ABI guarantees the view is valid for the duration of the
    // call.
    let text = unsafe { msg_utf8.to_string_lossy() };
    match level {
        ClLogLevel::Error => tracing::error!(target: "cloister_host::addon", "{text}"),
        ClLogLevel::Warn => tracing::warn!(target: "cloister_host::addon", "{text}"),
        ClLogLevel::Info => tracing::info!(target: "cloister_host::addon", "{text}"),
        ClLogLevel::Debug => tracing::debug!(target: "cloister_host::addon", "{text}"),
        ClLogLevel::Trace => tracing::trace!(target: "cloister_host::addon", "{text}"),
    }
}

fn build_host_vtable() -> Box<ClHostVTable> {
    Box::new(ClHostVTable {
        api_version: CLOISTER_ADDON_API_VERSION,
        user_data: core::ptr::null_mut(),
        log_utf8: Some(host_log),
    })
}

/// A dynamically loaded addon library, owned by exactly one domain.
///
/// The raw module pointer stays valid while `_lib` is alive; instances
/// created from this module must be dropped before it (the owning domain
/// enforces that ordering).
pub struct DylibModule {
    name: String,
    library_path: PathBuf,
    module: *const ClAddonModule,
    // Keep-alive: the module holds pointers into both of these.
    _host_vtable: Box<ClHostVTable>,
    _lib: Library,
}

// SAFETY: created on, and confined to, its domain's worker thread after
// construction; the ABI requires module state to be thread-agnostic.
unsafe impl Send for DylibModule {}

impl DylibModule {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("module library not found: {}", path.display()));
        }
        // SAFETY: loading and calling a foreign module entrypoint is
        // inherently unsafe; the ABI version is checked below.
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("failed to load module library {}", path.display()))?;
        let entry: Symbol<ClAddonEntry> = unsafe {
            lib.get(CLOISTER_ADDON_ENTRY_SYMBOL.as_bytes())
                .with_context(|| {
                    format!(
                        "missing entry symbol `{CLOISTER_ADDON_ENTRY_SYMBOL}` in {}",
                        path.display()
                    )
                })?
        };

        let host_vtable = build_host_vtable();
        // SAFETY: entry is the checked symbol; null and version are
        // validated before use.
        let module_ptr = unsafe { (entry)(host_vtable.as_ref() as *const ClHostVTable) };
        if module_ptr.is_null() {
            return Err(anyhow!(
                "module {} rejected the host (entry returned null)",
                path.display()
            ));
        }
        // SAFETY: non-null module pointers stay valid until the library is
        // unloaded.
        let module = unsafe { &*module_ptr };
        if module.api_version != CLOISTER_ADDON_API_VERSION {
            let mismatch = module.api_version;
            if let Some(destroy) = module.destroy {
                destroy(module.user_data);
            }
            return Err(anyhow!(
                "module {} api_version mismatch: module={mismatch}, host={}",
                path.display(),
                CLOISTER_ADDON_API_VERSION
            ));
        }

        let declared = unsafe { module.module_name_utf8.to_string_lossy() };
        let name = if declared.trim().is_empty() {
            module_name_for_path(path)
        } else {
            declared
        };
        tracing::info!(
            target: "cloister_host::module",
            module = %name,
            path = %path.display(),
            types = module.type_count,
            "loaded addon library"
        );
        Ok(Self {
            name,
            library_path: path.to_path_buf(),
            module: module_ptr,
            _host_vtable: host_vtable,
            _lib: lib,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn type_names(&self) -> Vec<String> {
        // SAFETY: the descriptor table is valid while the library is loaded.
        let module = unsafe { &*self.module };
        if module.types.is_null() {
            return Vec::new();
        }
        let descriptors = unsafe { core::slice::from_raw_parts(module.types, module.type_count) };
        descriptors
            .iter()
            .map(|d| unsafe { d.type_name_utf8.to_string_lossy() })
            .collect()
    }

    pub fn create(&self, type_name: &str) -> Result<Box<dyn Addon>> {
        // SAFETY: as in `type_names`.
        let module = unsafe { &*self.module };
        let mut instance = ClAddonInstanceRef::null();
        let mut err = ClOwnedStr::empty();
        let status = (module.create_instance)(
            module.user_data,
            ClStr::from_str(type_name),
            &mut instance,
            &mut err,
        );
        if !status.is_ok() {
            let details = self.take_owned(err);
            return Err(anyhow!(
                "module `{}` could not create `{type_name}` (status {}): {details}",
                self.name,
                status.code
            ));
        }
        if instance.is_null() {
            return Err(anyhow!(
                "module `{}` returned a null instance for `{type_name}`",
                self.name
            ));
        }
        Ok(Box::new(DylibAddon {
            instance,
            module: self.module,
        }))
    }

    /// Copy an owned buffer out and hand it back to the module's allocator.
    fn take_owned(&self, s: ClOwnedStr) -> String {
        // SAFETY: as in `type_names`; the buffer came from this module.
        let module = unsafe { &*self.module };
        let text = unsafe { s.copy_to_string() };
        (module.free_str_utf8)(module.user_data, s);
        text
    }
}

impl Drop for DylibModule {
    fn drop(&mut self) {
        // SAFETY: destroy is called exactly once, before the library handle
        // (declared after `module`) is released.
        let module = unsafe { &*self.module };
        if let Some(destroy) = module.destroy {
            destroy(module.user_data);
        }
        tracing::debug!(
            target: "cloister_host::module",
            module = %self.name,
            path = %self.library_path.display(),
            "unloaded addon library"
        );
    }
}

/// Host-side adapter presenting an ABI instance as an [`Addon`].
struct DylibAddon {
    instance: ClAddonInstanceRef,
    // Borrowed from the owning `DylibModule`; instances are dropped before
    // their module, so the pointer stays valid.
    module: *const ClAddonModule,
}

// SAFETY: lives and dies on the domain worker thread that created it.
unsafe impl Send for DylibAddon {}

impl DylibAddon {
    fn take_owned(&self, s: ClOwnedStr) -> String {
        // SAFETY: module pointer valid per the field invariant; buffer came
        // from that module.
        let module = unsafe { &*self.module };
        let text = unsafe { s.copy_to_string() };
        (module.free_str_utf8)(module.user_data, s);
        text
    }

    fn vtable(&self) -> &cloister_addon_api::ClAddonInstanceVTable {
        // SAFETY: non-null by construction (checked in `DylibModule::create`).
        unsafe { &*self.instance.vtable }
    }
}

impl Addon for DylibAddon {
    fn on_start(&mut self) -> Result<()> {
        let mut err = ClOwnedStr::empty();
        let status = (self.vtable().start)(self.instance.handle, &mut err);
        if status.is_ok() {
            Ok(())
        } else {
            Err(anyhow!("{}", self.take_owned(err)))
        }
    }

    fn on_stop(&mut self) -> Result<()> {
        let mut err = ClOwnedStr::empty();
        let status = (self.vtable().stop)(self.instance.handle, &mut err);
        if status.is_ok() {
            Ok(())
        } else {
            Err(anyhow!("{}", self.take_owned(err)))
        }
    }

    fn call(&mut self, method: &str, args_json: &str) -> Result<String> {
        let mut out = ClOwnedStr::empty();
        let mut err = ClOwnedStr::empty();
        let status = (self.vtable().call_json_utf8)(
            self.instance.handle,
            ClStr::from_str(method),
            ClStr::from_str(args_json),
            &mut out,
            &mut err,
        );
        if status.is_ok() {
            Ok(self.take_owned(out))
        } else {
            Err(anyhow!("{}", self.take_owned(err)))
        }
    }
}

impl Drop for DylibAddon {
    fn drop(&mut self) {
        (self.vtable().destroy)(self.instance.handle);
    }
}
