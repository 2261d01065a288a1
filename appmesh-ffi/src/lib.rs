//! C ABI shared library for AppMesh -- loadable by dlopen, PHP FFI, Qt, or
//! any FFI consumer.  The matching declarations live in `appmesh.h`.
//!
//! All exported functions follow the convention:
//! - Status codes: `APPMESH_OK=0`, `APPMESH_ERROR=-1`, `APPMESH_NULL_HANDLE=-2`
//! - Handle-returning functions return null on failure
//! - String outputs allocated by Rust, freed via `appmesh_string_free()`
//! - Last error retrievable via `appmesh_last_error()`
//! - No panic crosses the boundary
//!
//! Handles are opaque generation-counted values, not pointers: a freed or
//! forged handle is detected and reported instead of dereferenced.

use std::cell::RefCell;
use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Once;

use appmesh::config::{Config, ENV_LOG};
use appmesh::errors::HandleError;
use appmesh::handles::{HandleTable, RawHandle};
use appmesh::port::dispatch::error_value;
use appmesh::ports::install_default_ports;
use appmesh::{DispatchResult, EventTiming, InputHandle, PortHandle, PortRegistry};
use parking_lot::Mutex;

pub const APPMESH_OK: c_int = 0;
pub const APPMESH_ERROR: c_int = -1;
pub const APPMESH_NULL_HANDLE: c_int = -2;

pub const APPMESH_ABI_VERSION: u32 = 1;

/// Opaque input handle.
#[repr(C)]
pub struct AppMeshHandle {
    _private: [u8; 0],
}

/// Opaque port handle.
#[repr(C)]
pub struct AppMeshPort {
    _private: [u8; 0],
}

static INPUTS: HandleTable<InputHandle> = HandleTable::new(1);
static PORTS: HandleTable<PortHandle> = HandleTable::new(2);

static DEFAULT_PORTS: Mutex<bool> = Mutex::new(false);
static LOGGER: Once = Once::new();

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn init_logging() {
    LOGGER.call_once(|| {
        let env = env_logger::Env::default().filter_or(ENV_LOG, "warn");
        // The host may have installed its own logger
        let _ = env_logger::Builder::from_env(env).try_init();
    });
}

/// Run an entry point with logging set up and panics contained.
fn boundary<R>(name: &str, on_panic: R, f: impl FnOnce() -> R) -> R {
    init_logging();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(_) => {
            log::error!("panic in {name}");
            set_last_error(&format!("internal error in {name}"));
            on_panic
        }
    }
}

/// The process-wide registry with the built-in ports installed.
fn registry() -> Result<&'static PortRegistry, String> {
    let registry = PortRegistry::global();
    let mut installed = DEFAULT_PORTS.lock();
    if !*installed {
        let config = Config::from_env().map_err(|e| e.to_string())?;
        install_default_ports(registry, &config).map_err(|e| e.to_string())?;
        *installed = true;
    }
    Ok(registry)
}

/// Borrow a C string argument as UTF-8.
///
/// # Safety
///
/// `ptr` must be null or a valid null-terminated C string.
unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{what} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| format!("{what} is not valid UTF-8: {e}"))
}

fn into_c_string(json: String) -> *mut c_char {
    match CString::new(json) {
        Ok(cstr) => cstr.into_raw(),
        Err(e) => {
            set_last_error(&format!("CString conversion failed: {e}"));
            ptr::null_mut()
        }
    }
}

fn error_json(msg: &str) -> *mut c_char {
    into_c_string(error_value(msg).to_string())
}

fn handle_status(err: HandleError) -> c_int {
    set_last_error(&err.to_string());
    APPMESH_NULL_HANDLE
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Open an input handle, configured from the environment.
///
/// Returns null if the compositor's remote-input facility cannot be
/// reached; see `appmesh_last_error()`.  Release with `appmesh_free()`.
#[no_mangle]
pub extern "C" fn appmesh_init() -> *mut AppMeshHandle {
    boundary("appmesh_init", ptr::null_mut(), || {
        let opened = Config::from_env()
            .map_err(|e| e.to_string())
            .and_then(|config| InputHandle::open(&config).map_err(|e| e.to_string()));
        match opened {
            Ok(handle) => INPUTS.insert(handle) as *mut AppMeshHandle,
            Err(msg) => {
                log::warn!("appmesh_init failed: {msg}");
                set_last_error(&msg);
                ptr::null_mut()
            }
        }
    })
}

/// Type `text` into the focused window, pausing `delay_us` microseconds
/// between characters.
///
/// Returns `APPMESH_OK`, `APPMESH_NULL_HANDLE` for a null or freed
/// handle, or `APPMESH_ERROR`.
///
/// # Safety
///
/// `text` must be null or a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn appmesh_type_text(
    handle: *mut AppMeshHandle,
    text: *const c_char,
    delay_us: u64,
) -> c_int {
    boundary("appmesh_type_text", APPMESH_ERROR, || {
        let input = match INPUTS.get(handle as RawHandle) {
            Ok(input) => input,
            Err(e) => return handle_status(e),
        };
        let text = match unsafe { str_arg(text, "text") } {
            Ok(text) => text,
            Err(msg) => {
                set_last_error(&msg);
                return APPMESH_ERROR;
            }
        };
        match input.type_text(text, EventTiming::from_micros(delay_us)) {
            Ok(_) => APPMESH_OK,
            Err(e) => {
                set_last_error(&e.to_string());
                APPMESH_ERROR
            }
        }
    })
}

/// Send a key combo such as `"ctrl+v"`, holding it `delay_us`
/// microseconds between press and release.
///
/// # Safety
///
/// `combo` must be null or a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn appmesh_send_key(
    handle: *mut AppMeshHandle,
    combo: *const c_char,
    delay_us: u64,
) -> c_int {
    boundary("appmesh_send_key", APPMESH_ERROR, || {
        let input = match INPUTS.get(handle as RawHandle) {
            Ok(input) => input,
            Err(e) => return handle_status(e),
        };
        let combo = match unsafe { str_arg(combo, "combo") } {
            Ok(combo) => combo,
            Err(msg) => {
                set_last_error(&msg);
                return APPMESH_ERROR;
            }
        };
        match input.send_key(combo, EventTiming::from_micros(delay_us)) {
            Ok(()) => APPMESH_OK,
            Err(e) => {
                set_last_error(&e.to_string());
                APPMESH_ERROR
            }
        }
    })
}

/// Close an input handle.  Null is a no-op; a handle that was already
/// freed returns `APPMESH_NULL_HANDLE`.
#[no_mangle]
pub extern "C" fn appmesh_free(handle: *mut AppMeshHandle) -> c_int {
    boundary("appmesh_free", APPMESH_ERROR, || {
        if handle.is_null() {
            return APPMESH_OK;
        }
        match INPUTS.remove(handle as RawHandle) {
            Ok(input) => {
                // Waits for an in-flight call on another thread to finish
                input.close();
                APPMESH_OK
            }
            Err(e) => handle_status(e),
        }
    })
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Open the port registered as `name`.  Returns null for unknown names.
///
/// # Safety
///
/// `name` must be null or a valid null-terminated UTF-8 C string.
#[no_mangle]
pub unsafe extern "C" fn appmesh_port_open(name: *const c_char) -> *mut AppMeshPort {
    boundary("appmesh_port_open", ptr::null_mut(), || {
        let opened = unsafe { str_arg(name, "port name") }.and_then(|name| {
            registry()?.open(name).map_err(|e| e.to_string())
        });
        match opened {
            Ok(port) => PORTS.insert(port) as *mut AppMeshPort,
            Err(msg) => {
                set_last_error(&msg);
                ptr::null_mut()
            }
        }
    })
}

/// Execute `cmd` on a port with a JSON object of arguments (null for
/// none).
///
/// Always returns a JSON object: the command's result, or
/// `{"error": "..."}` for a bad handle, malformed arguments, an unknown
/// command or a failed command.  Null is returned only when no JSON could
/// be produced at all.  Free the result with `appmesh_string_free()`.
///
/// # Safety
///
/// `cmd` and `args_json` must each be null or a valid null-terminated
/// C string.
#[no_mangle]
pub unsafe extern "C" fn appmesh_port_execute(
    port: *mut AppMeshPort,
    cmd: *const c_char,
    args_json: *const c_char,
) -> *mut c_char {
    boundary("appmesh_port_execute", ptr::null_mut(), || {
        let handle = match PORTS.get(port as RawHandle) {
            Ok(handle) => handle,
            Err(e) => {
                set_last_error(&e.to_string());
                return error_json(&format!("port handle: {e}"));
            }
        };
        let cmd = match unsafe { str_arg(cmd, "command") } {
            Ok(cmd) => cmd,
            Err(msg) => return error_json(&msg),
        };
        let args = if args_json.is_null() {
            None
        } else {
            match unsafe { str_arg(args_json, "args_json") } {
                Ok(args) => Some(args),
                Err(msg) => return error_json(&msg),
            }
        };

        let result = handle.execute(cmd, args);
        if let DispatchResult::Failure(msg) = &result {
            set_last_error(msg);
        }
        match result.to_json() {
            Ok(json) => into_c_string(json),
            Err(e) => {
                log::error!("{}.{cmd}: result serialization failed: {e}", handle.name());
                set_last_error(&format!("JSON serialization failed: {e}"));
                ptr::null_mut()
            }
        }
    })
}

/// Describe a port's commands as
/// `{"port": ..., "description": ..., "commands": [...]}`.
#[no_mangle]
pub extern "C" fn appmesh_port_describe(port: *mut AppMeshPort) -> *mut c_char {
    boundary("appmesh_port_describe", ptr::null_mut(), || {
        match PORTS.get(port as RawHandle) {
            Ok(handle) => match serde_json::to_string(&handle.describe()) {
                Ok(json) => into_c_string(json),
                Err(e) => {
                    set_last_error(&format!("JSON serialization failed: {e}"));
                    ptr::null_mut()
                }
            },
            Err(e) => {
                set_last_error(&e.to_string());
                error_json(&format!("port handle: {e}"))
            }
        }
    })
}

/// Registered port names as `{"ports": [...]}`.
#[no_mangle]
pub extern "C" fn appmesh_port_list() -> *mut c_char {
    boundary("appmesh_port_list", ptr::null_mut(), || match registry() {
        Ok(registry) => {
            into_c_string(serde_json::json!({ "ports": registry.names() }).to_string())
        }
        Err(msg) => {
            set_last_error(&msg);
            error_json(&msg)
        }
    })
}

/// Release a port handle.  The port itself stays registered.
#[no_mangle]
pub extern "C" fn appmesh_port_free(port: *mut AppMeshPort) -> c_int {
    boundary("appmesh_port_free", APPMESH_ERROR, || {
        if port.is_null() {
            return APPMESH_OK;
        }
        match PORTS.remove(port as RawHandle) {
            Ok(_) => APPMESH_OK,
            Err(e) => handle_status(e),
        }
    })
}

/// Unregister every port.  Open port handles keep working; the built-in
/// ports are installed again on the next port call.
#[no_mangle]
pub extern "C" fn appmesh_shutdown() {
    boundary("appmesh_shutdown", (), || {
        let mut installed = DEFAULT_PORTS.lock();
        PortRegistry::global().clear();
        *installed = false;
        log::info!("port registry cleared");
    })
}

// ---------------------------------------------------------------------------
// Strings and errors
// ---------------------------------------------------------------------------

/// Free a string previously returned by an appmesh_* function.
///
/// # Safety
///
/// `ptr` must be a pointer returned by an appmesh_* function or null, and
/// must not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn appmesh_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

/// Retrieve the last error message (thread-local).
///
/// Returns a pointer valid until the next failing appmesh_* call on this
/// thread, or null if no error has occurred.  Do not free it.
#[no_mangle]
pub extern "C" fn appmesh_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn appmesh_abi_version() -> u32 {
    APPMESH_ABI_VERSION
}

/// Function table for version 1 of the ABI.
#[repr(C)]
pub struct AppMeshApiV1 {
    pub abi_version: u32,
    pub init: extern "C" fn() -> *mut AppMeshHandle,
    pub type_text: unsafe extern "C" fn(*mut AppMeshHandle, *const c_char, u64) -> c_int,
    pub send_key: unsafe extern "C" fn(*mut AppMeshHandle, *const c_char, u64) -> c_int,
    pub free: extern "C" fn(*mut AppMeshHandle) -> c_int,
    pub port_open: unsafe extern "C" fn(*const c_char) -> *mut AppMeshPort,
    pub port_execute:
        unsafe extern "C" fn(*mut AppMeshPort, *const c_char, *const c_char) -> *mut c_char,
    pub port_free: extern "C" fn(*mut AppMeshPort) -> c_int,
    pub port_describe: extern "C" fn(*mut AppMeshPort) -> *mut c_char,
    pub port_list: extern "C" fn() -> *mut c_char,
    pub string_free: unsafe extern "C" fn(*mut c_char),
    pub last_error: extern "C" fn() -> *const c_char,
    pub shutdown: extern "C" fn(),
}

static API_V1: AppMeshApiV1 = AppMeshApiV1 {
    abi_version: 1,
    init: appmesh_init,
    type_text: appmesh_type_text,
    send_key: appmesh_send_key,
    free: appmesh_free,
    port_open: appmesh_port_open,
    port_execute: appmesh_port_execute,
    port_free: appmesh_port_free,
    port_describe: appmesh_port_describe,
    port_list: appmesh_port_list,
    string_free: appmesh_string_free,
    last_error: appmesh_last_error,
    shutdown: appmesh_shutdown,
};

/// Function table for `version`, or null if this build does not provide it.
#[no_mangle]
pub extern "C" fn appmesh_get_api(version: u32) -> *const AppMeshApiV1 {
    match version {
        1 => &API_V1,
        _ => {
            set_last_error(&format!("unsupported ABI version {version}"));
            ptr::null()
        }
    }
}
