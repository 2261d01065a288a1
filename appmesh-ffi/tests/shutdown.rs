//! `appmesh_shutdown` clears the global registry, so it gets its own process.

use std::ffi::{CStr, CString};

use appmesh_core::*;
use serde_json::Value;

#[test]
fn test_shutdown_keeps_open_handles_and_reinstalls() {
    std::env::set_var("APPMESH_BACKEND", "dry-run");
    std::env::set_var("APPMESH_DEFAULT_DELAY_US", "0");

    let name = CString::new("input").unwrap();
    let port = unsafe { appmesh_port_open(name.as_ptr()) };
    assert!(!port.is_null());

    appmesh_shutdown();

    // Still bound to the table it was opened with
    let cmd = CString::new("type_text").unwrap();
    let args = CString::new(r#"{"text": "a"}"#).unwrap();
    let out = unsafe { appmesh_port_execute(port, cmd.as_ptr(), args.as_ptr()) };
    let text = unsafe { CStr::from_ptr(out) }.to_str().unwrap().to_owned();
    unsafe { appmesh_string_free(out) };
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["typed"], 1);

    // Built-ins come back on the next port call
    let again = unsafe { appmesh_port_open(name.as_ptr()) };
    assert!(!again.is_null());

    assert_eq!(appmesh_port_free(port), APPMESH_OK);
    assert_eq!(appmesh_port_free(again), APPMESH_OK);
}
