//! Export helpers for addon crates.
//!
//! Every `extern "C"` callback emitted here catches panics: unwinding across
//! the module boundary is undefined behaviour, so failures are reported as
//! `CL_ERR_INTERNAL` with the panic message in `out_err` and mirrored to the
//! host log when one is attached.

use core::ffi::c_void;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::abi::{
    ClAddonInstanceRef, ClAddonInstanceVTable, ClAddonModule, ClHostVTable, ClLogLevel, ClOwnedStr,
    ClStatus, ClStr, ClTypeDescriptor, CLOISTER_ADDON_API_VERSION, CL_ERR_ADDON, CL_ERR_INTERNAL,
    CL_ERR_TYPE_NOT_FOUND,
};
use crate::addon::Addon;

static HOST_VTABLE: AtomicPtr<ClHostVTable> = AtomicPtr::new(core::ptr::null_mut());

/// Extract a human-readable message from a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Log through the host vtable captured at entry time, if any.
pub fn host_log(level: ClLogLevel, msg: &str) {
    let host = HOST_VTABLE.load(Ordering::Acquire);
    if host.is_null() {
        return;
    }
    // SAFETY: the host guarantees the vtable stays valid while the module is
    // loaded; set once in `entry_impl` before any other callback can run.
    let host = unsafe { &*host };
    if let Some(log) = host.log_utf8 {
        log(host.user_data, level, ClStr::from_str(msg));
    }
}

fn write_err(out_err: *mut ClOwnedStr, message: String) {
    if out_err.is_null() {
        return;
    }
    // SAFETY: caller passes either null or a valid out-parameter slot.
    unsafe {
        *out_err = ClOwnedStr::from_string(message);
    }
}

fn fail(out_err: *mut ClOwnedStr, code: i32, message: String) -> ClStatus {
    write_err(out_err, message);
    ClStatus::err(code)
}

fn guard_status(
    op: &'static str,
    out_err: *mut ClOwnedStr,
    f: impl FnOnce() -> ClStatus,
) -> ClStatus {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(payload) => {
            let msg = panic_message(payload);
            host_log(ClLogLevel::Error, &format!("panic in `{op}`: {msg}"));
            fail(out_err, CL_ERR_INTERNAL, format!("panic in `{op}`: {msg}"))
        }
    }
}

fn guard_void(op: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        let msg = panic_message(payload);
        host_log(ClLogLevel::Error, &format!("panic in `{op}`: {msg}"));
    }
}

/// One instantiable type exported by an addon crate.
#[derive(Clone, Copy)]
pub struct AddonTypeExport {
    pub type_name: &'static str,
    pub summary: &'static str,
    pub construct: fn() -> Box<dyn Addon>,
}

struct InstanceHolder {
    addon: Box<dyn Addon>,
}

static INSTANCE_VTABLE: ClAddonInstanceVTable = ClAddonInstanceVTable {
    start: instance_start,
    stop: instance_stop,
    call_json_utf8: instance_call,
    destroy: instance_destroy,
};

/// Wrap a boxed addon into an ABI instance owned by the caller; released
/// through the vtable's `destroy`.
pub fn instance_ref_from_addon(addon: Box<dyn Addon>) -> ClAddonInstanceRef {
    let holder = Box::new(InstanceHolder { addon });
    ClAddonInstanceRef {
        handle: Box::into_raw(holder) as *mut c_void,
        vtable: &INSTANCE_VTABLE,
    }
}

extern "C" fn instance_start(handle: *mut c_void, out_err: *mut ClOwnedStr) -> ClStatus {
    guard_status("addon start", out_err, || {
        // SAFETY: handle originates from `instance_ref_from_addon` and the
        // host serializes access per instance.
        let holder = unsafe { &mut *(handle as *mut InstanceHolder) };
        match holder.addon.on_start() {
            Ok(()) => ClStatus::OK,
            Err(err) => fail(out_err, CL_ERR_ADDON, format!("{err:#}")),
        }
    })
}

extern "C" fn instance_stop(handle: *mut c_void, out_err: *mut ClOwnedStr) -> ClStatus {
    guard_status("addon stop", out_err, || {
        // SAFETY: as in `instance_start`.
        let holder = unsafe { &mut *(handle as *mut InstanceHolder) };
        match holder.addon.on_stop() {
            Ok(()) => ClStatus::OK,
            Err(err) => fail(out_err, CL_ERR_ADDON, format!("{err:#}")),
        }
    })
}

extern "C" fn instance_call(
    handle: *mut c_void,
    method_utf8: ClStr,
    args_json_utf8: ClStr,
    out_json_utf8: *mut ClOwnedStr,
    out_err: *mut ClOwnedStr,
) -> ClStatus {
    guard_status("addon call", out_err, || {
        // SAFETY: as in `instance_start`; string views are valid for the
        // duration of the call per the ABI contract.
        let holder = unsafe { &mut *(handle as *mut InstanceHolder) };
        let method = unsafe { method_utf8.to_string_lossy() };
        let args = unsafe { args_json_utf8.to_string_lossy() };
        match holder.addon.call(&method, &args) {
            Ok(json) => {
                if !out_json_utf8.is_null() {
                    // SAFETY: valid out-parameter slot per the ABI contract.
                    unsafe {
                        *out_json_utf8 = ClOwnedStr::from_string(json);
                    }
                }
                ClStatus::OK
            }
            Err(err) => fail(out_err, CL_ERR_ADDON, format!("{err:#}")),
        }
    })
}

extern "C" fn instance_destroy(handle: *mut c_void) {
    guard_void("addon destroy", || {
        if handle.is_null() {
            return;
        }
        // SAFETY: handle originates from `instance_ref_from_addon`; the host
        // calls destroy exactly once.
        drop(unsafe { Box::from_raw(handle as *mut InstanceHolder) });
    });
}

struct ModuleWorld {
    exports: &'static [AddonTypeExport],
    descriptors: Vec<ClTypeDescriptor>,
    module: ClAddonModule,
}

extern "C" fn module_create_instance(
    user_data: *mut c_void,
    type_name_utf8: ClStr,
    out_instance: *mut ClAddonInstanceRef,
    out_err: *mut ClOwnedStr,
) -> ClStatus {
    guard_status("module create_instance", out_err, || {
        // SAFETY: user_data is the `ModuleWorld` leaked in `entry_impl`.
        let world = unsafe { &*(user_data as *const ModuleWorld) };
        let type_name = unsafe { type_name_utf8.to_string_lossy() };
        let Some(export) = world.exports.iter().find(|e| e.type_name == type_name) else {
            return fail(
                out_err,
                CL_ERR_TYPE_NOT_FOUND,
                format!("type `{type_name}` is not exported by this module"),
            );
        };
        let instance = instance_ref_from_addon((export.construct)());
        if !out_instance.is_null() {
            // SAFETY: valid out-parameter slot per the ABI contract.
            unsafe {
                *out_instance = instance;
            }
        }
        ClStatus::OK
    })
}

extern "C" fn module_free_str(_user_data: *mut c_void, s: ClOwnedStr) {
    guard_void("module free_str", || {
        // SAFETY: the buffer was produced by `ClOwnedStr::from_string` in
        // this compilation unit.
        drop(unsafe { s.into_string() });
    });
}

extern "C" fn module_destroy(user_data: *mut c_void) {
    guard_void("module destroy", || {
        if user_data.is_null() {
            return;
        }
        // SAFETY: reclaims the `ModuleWorld` (descriptor table included)
        // leaked by `entry_impl`; called at most once by the host.
        drop(unsafe { Box::from_raw(user_data as *mut ModuleWorld) });
    });
}

/// Entry-symbol body. Captures the host vtable, checks versions, and leaks a
/// module descriptor the host reclaims through `destroy`.
///
/// # Safety
/// `host` must be null or point at a vtable valid for the module lifetime.
pub unsafe fn entry_impl(
    module_name: &'static str,
    exports: &'static [AddonTypeExport],
    host: *const ClHostVTable,
) -> *const ClAddonModule {
    if !host.is_null() {
        if (*host).api_version != CLOISTER_ADDON_API_VERSION {
            return core::ptr::null();
        }
        HOST_VTABLE.store(host as *mut ClHostVTable, Ordering::Release);
    }

    let descriptors = exports
        .iter()
        .map(|e| ClTypeDescriptor {
            type_name_utf8: ClStr::from_str(e.type_name),
            summary_utf8: ClStr::from_str(e.summary),
        })
        .collect::<Vec<_>>();
    let mut world = Box::new(ModuleWorld {
        exports,
        descriptors,
        module: ClAddonModule {
            api_version: CLOISTER_ADDON_API_VERSION,
            user_data: core::ptr::null_mut(),
            module_name_utf8: ClStr::from_str(module_name),
            types: core::ptr::null(),
            type_count: 0,
            create_instance: module_create_instance,
            free_str_utf8: module_free_str,
            destroy: Some(module_destroy),
        },
    });
    // The descriptor points back into its own world; the heap allocation is
    // stable, so the pointers survive the leak below.
    let world_ptr: *mut ModuleWorld = &mut *world;
    world.module.user_data = world_ptr as *mut c_void;
    world.module.types = world.descriptors.as_ptr();
    world.module.type_count = world.descriptors.len();
    let module_ptr: *const ClAddonModule = &world.module;
    core::mem::forget(world);
    module_ptr
}

/// Emit the module entry symbol for an addon crate.
///
/// ```ignore
/// const EXPORTS: &[AddonTypeExport] = &[/* ... */];
/// export_addon_module!("demo.lib", EXPORTS);
/// ```
#[macro_export]
macro_rules! export_addon_module {
    ($name:expr, $exports:expr $(,)?) => {
        #[no_mangle]
        pub unsafe extern "C" fn cloister_addon_entry(
            host: *const $crate::ClHostVTable,
        ) -> *const $crate::ClAddonModule {
            $crate::export::entry_impl($name, $exports, host)
        }
    };
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::abi::CL_ERR_ADDON;

    #[derive(Default)]
    struct Flaky;

    impl Addon for Flaky {
        fn on_stop(&mut self) -> anyhow::Result<()> {
            Err(anyhow!("refusing to stop"))
        }

        fn call(&mut self, method: &str, args_json: &str) -> anyhow::Result<String> {
            match method {
                "echo" => Ok(args_json.to_string()),
                "boom" => panic!("addon exploded"),
                other => Err(anyhow!("no method `{other}`")),
            }
        }
    }

    fn take_err(slot: ClOwnedStr) -> String {
        // The test shares the allocator with the "module", so reclaiming
        // directly is fine here.
        unsafe { slot.into_string() }
    }

    #[test]
    fn vtable_routes_into_addon_impl() {
        let instance = instance_ref_from_addon(Box::new(Flaky::default()));
        let vtable = unsafe { &*instance.vtable };

        let mut err = ClOwnedStr::empty();
        let status = (vtable.start)(instance.handle, &mut err);
        assert!(status.is_ok());

        let mut out = ClOwnedStr::empty();
        let status = (vtable.call_json_utf8)(
            instance.handle,
            ClStr::from_str("echo"),
            ClStr::from_str("{\"x\":1}"),
            &mut out,
            &mut err,
        );
        assert!(status.is_ok());
        assert_eq!(take_err(out), "{\"x\":1}");

        (vtable.destroy)(instance.handle);
    }

    #[test]
    fn addon_errors_surface_as_status_and_message() {
        let instance = instance_ref_from_addon(Box::new(Flaky::default()));
        let vtable = unsafe { &*instance.vtable };

        let mut err = ClOwnedStr::empty();
        let status = (vtable.stop)(instance.handle, &mut err);
        assert_eq!(status.code, CL_ERR_ADDON);
        assert!(take_err(err).contains("refusing to stop"));

        (vtable.destroy)(instance.handle);
    }

    #[test]
    fn addon_panics_become_internal_status_not_unwinds() {
        let instance = instance_ref_from_addon(Box::new(Flaky::default()));
        let vtable = unsafe { &*instance.vtable };

        let mut out = ClOwnedStr::empty();
        let mut err = ClOwnedStr::empty();
        let status = (vtable.call_json_utf8)(
            instance.handle,
            ClStr::from_str("boom"),
            ClStr::empty(),
            &mut out,
            &mut err,
        );
        assert_eq!(status.code, CL_ERR_INTERNAL);
        assert!(take_err(err).contains("addon exploded"));

        (vtable.destroy)(instance.handle);
    }

    #[test]
    fn entry_impl_rejects_mismatched_host_version() {
        static EXPORTS: &[AddonTypeExport] = &[];
        let host = ClHostVTable {
            api_version: CLOISTER_ADDON_API_VERSION + 1,
            user_data: core::ptr::null_mut(),
            log_utf8: None,
        };
        let module = unsafe { entry_impl("test.module", EXPORTS, &host) };
        assert!(module.is_null());
    }

    #[test]
    fn entry_impl_exports_type_table_and_create() {
        fn make() -> Box<dyn Addon> {
            Box::new(Flaky::default())
        }
        static EXPORTS: &[AddonTypeExport] = &[AddonTypeExport {
            type_name: "Test.Widget",
            summary: "test widget",
            construct: make,
        }];
        let module_ptr = unsafe { entry_impl("test.module", EXPORTS, core::ptr::null()) };
        assert!(!module_ptr.is_null());
        // Copy the descriptor out so `destroy` below leaves no live borrow.
        let module = unsafe { *module_ptr };
        assert_eq!(module.api_version, CLOISTER_ADDON_API_VERSION);
        assert_eq!(module.type_count, 1);

        let mut instance = ClAddonInstanceRef::null();
        let mut err = ClOwnedStr::empty();
        let status = (module.create_instance)(
            module.user_data,
            ClStr::from_str("Test.Widget"),
            &mut instance,
            &mut err,
        );
        assert!(status.is_ok());
        assert!(!instance.is_null());
        let vtable = unsafe { &*instance.vtable };
        (vtable.destroy)(instance.handle);

        let status = (module.create_instance)(
            module.user_data,
            ClStr::from_str("Test.Missing"),
            &mut instance,
            &mut err,
        );
        assert_eq!(status.code, CL_ERR_TYPE_NOT_FOUND);
        assert!(take_err(err).contains("Test.Missing"));

        if let Some(destroy) = module.destroy {
            destroy(module.user_data);
        }
    }
}
