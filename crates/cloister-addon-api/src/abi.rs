use core::ffi::c_void;

// Single in-development ABI version. May change in place until the first
// stable release.
pub const CLOISTER_ADDON_API_VERSION: u32 = 1;
pub const CLOISTER_ADDON_ENTRY_SYMBOL: &str = "cloister_addon_entry";

// Status codes (non-exhaustive). Addons may return other non-zero codes,
// but host and export helpers use these.
pub const CL_ERR_INVALID_ARG: i32 = 1;
pub const CL_ERR_TYPE_NOT_FOUND: i32 = 2;
pub const CL_ERR_UNSUPPORTED: i32 = 3;
pub const CL_ERR_ADDON: i32 = 4;
pub const CL_ERR_INTERNAL: i32 = 5;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClStatus {
    pub code: i32,
}

impl ClStatus {
    pub const OK: ClStatus = ClStatus { code: 0 };

    pub const fn err(code: i32) -> Self {
        Self { code }
    }

    pub fn is_ok(self) -> bool {
        self.code == 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClLogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

/// Immutable UTF-8 bytes. Not NUL-terminated. Borrowed for the duration of
/// the call that receives it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl ClStr {
    pub const fn empty() -> Self {
        Self {
            ptr: core::ptr::null(),
            len: 0,
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    pub fn is_empty(self) -> bool {
        self.ptr.is_null() || self.len == 0
    }

    /// # Safety
    /// `ptr` must point at `len` readable bytes for the duration of the call.
    pub unsafe fn to_string_lossy(self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let bytes = core::slice::from_raw_parts(self.ptr, self.len);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Heap UTF-8 buffer allocated inside a module. Must be released through the
/// `free_str_utf8` callback of the module that produced it; the host never
/// frees it with its own allocator.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClOwnedStr {
    pub ptr: *mut u8,
    pub len: usize,
    pub cap: usize,
}

impl ClOwnedStr {
    pub const fn empty() -> Self {
        Self {
            ptr: core::ptr::null_mut(),
            len: 0,
            cap: 0,
        }
    }

    pub fn from_string(s: String) -> Self {
        let mut bytes = s.into_bytes();
        let out = Self {
            ptr: bytes.as_mut_ptr(),
            len: bytes.len(),
            cap: bytes.capacity(),
        };
        core::mem::forget(bytes);
        out
    }

    pub fn is_empty(self) -> bool {
        self.ptr.is_null() || self.len == 0
    }

    /// # Safety
    /// Only valid for buffers produced by [`ClOwnedStr::from_string`] inside
    /// the same compilation unit; consumes ownership of the buffer.
    pub unsafe fn into_string(self) -> String {
        if self.ptr.is_null() {
            return String::new();
        }
        let bytes = Vec::from_raw_parts(self.ptr, self.len, self.cap);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// # Safety
    /// `ptr` must point at `len` readable bytes; ownership is not consumed.
    pub unsafe fn copy_to_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let bytes = core::slice::from_raw_parts(self.ptr, self.len);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Callbacks the host hands to a module at entry time.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClHostVTable {
    pub api_version: u32,
    pub user_data: *mut c_void,
    pub log_utf8: Option<extern "C" fn(user_data: *mut c_void, level: ClLogLevel, msg_utf8: ClStr)>,
}

// Raw pointers make this not auto-Send/Sync. The vtable is immutable after
// construction and `user_data` is required by the ABI to be thread-safe.
unsafe impl Send for ClHostVTable {}
unsafe impl Sync for ClHostVTable {}

/// A single addon instance living inside a module.
///
/// `start`/`stop`/`call_json_utf8` write a failure message into `out_err`
/// (when non-null) alongside a non-zero status; the buffer is released via
/// the owning module's `free_str_utf8`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClAddonInstanceVTable {
    pub start: extern "C" fn(handle: *mut c_void, out_err: *mut ClOwnedStr) -> ClStatus,
    pub stop: extern "C" fn(handle: *mut c_void, out_err: *mut ClOwnedStr) -> ClStatus,
    pub call_json_utf8: extern "C" fn(
        handle: *mut c_void,
        method_utf8: ClStr,
        args_json_utf8: ClStr,
        out_json_utf8: *mut ClOwnedStr,
        out_err: *mut ClOwnedStr,
    ) -> ClStatus,
    pub destroy: extern "C" fn(handle: *mut c_void),
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClAddonInstanceRef {
    pub handle: *mut c_void,
    pub vtable: *const ClAddonInstanceVTable,
}

impl ClAddonInstanceRef {
    pub const fn null() -> Self {
        Self {
            handle: core::ptr::null_mut(),
            vtable: core::ptr::null(),
        }
    }

    pub fn is_null(self) -> bool {
        self.handle.is_null() || self.vtable.is_null()
    }
}

/// One instantiable type exported by a module.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClTypeDescriptor {
    pub type_name_utf8: ClStr,
    pub summary_utf8: ClStr,
}

/// Root descriptor a module hands back from its entry symbol.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClAddonModule {
    pub api_version: u32,
    pub user_data: *mut c_void,
    pub module_name_utf8: ClStr,
    pub types: *const ClTypeDescriptor,
    pub type_count: usize,
    pub create_instance: extern "C" fn(
        user_data: *mut c_void,
        type_name_utf8: ClStr,
        out_instance: *mut ClAddonInstanceRef,
        out_err: *mut ClOwnedStr,
    ) -> ClStatus,
    pub free_str_utf8: extern "C" fn(user_data: *mut c_void, s: ClOwnedStr),
    pub destroy: Option<extern "C" fn(user_data: *mut c_void)>,
}

pub type ClAddonEntry = unsafe extern "C" fn(host: *const ClHostVTable) -> *const ClAddonModule;
