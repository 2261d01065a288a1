//! End-to-end tests through the exported C functions, on the dry-run backend.
//!
//! Every test holds the same lock, so the process-wide event log only sees
//! the events of the test that reads it.

use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::Once;

use appmesh::injector::MAX_TEXT_LENGTH;
use appmesh::keymap::{char_keystroke, KeyEvent, KEY_ENTER, KEY_LEFTCTRL, KEY_LEFTSHIFT, KEY_TAB};
use appmesh::session::dry_run::EventLog;
use appmesh_core::*;
use parking_lot::{Mutex, MutexGuard};
use serde_json::{json, Value};

fn setup() -> MutexGuard<'static, ()> {
    static ENV: Once = Once::new();
    static SERIAL: Mutex<()> = Mutex::new(());
    ENV.call_once(|| {
        std::env::set_var("APPMESH_BACKEND", "dry-run");
        std::env::set_var("APPMESH_DEFAULT_DELAY_US", "0");
    });
    let guard = SERIAL.lock();
    EventLog::global().clear();
    guard
}

/// Events recorded since the last call, draining the log.
fn recorded() -> Vec<KeyEvent> {
    EventLog::global().take()
}

fn typed(text: &str) -> Vec<KeyEvent> {
    text.chars()
        .flat_map(|ch| char_keystroke(ch).unwrap().events())
        .collect()
}

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

/// Parse and free a JSON string returned by the library.
fn take_json(ptr: *mut c_char) -> Value {
    assert!(!ptr.is_null());
    let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_owned();
    unsafe { appmesh_string_free(ptr) };
    serde_json::from_str(&text).unwrap()
}

fn last_error() -> String {
    let ptr = appmesh_last_error();
    assert!(!ptr.is_null());
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn execute(port: *mut AppMeshPort, cmd: &str, args: Option<&str>) -> Value {
    let cmd = c(cmd);
    let args = args.map(c);
    let args_ptr = args.as_ref().map_or(ptr::null(), |a| a.as_ptr());
    take_json(unsafe { appmesh_port_execute(port, cmd.as_ptr(), args_ptr) })
}

#[test]
fn test_init_type_free_lifecycle() {
    let _serial = setup();
    let h = appmesh_init();
    assert!(!h.is_null());

    let hello = c("hello");
    assert_eq!(unsafe { appmesh_type_text(h, hello.as_ptr(), 1000) }, APPMESH_OK);
    // h, e, l, l, o
    let expected: Vec<KeyEvent> = [35, 18, 38, 38, 24]
        .into_iter()
        .flat_map(|code| [KeyEvent::press(code), KeyEvent::release(code)])
        .collect();
    assert_eq!(recorded(), expected);
    assert_eq!(appmesh_free(h), APPMESH_OK);

    assert_eq!(
        unsafe { appmesh_type_text(h, hello.as_ptr(), 1000) },
        APPMESH_NULL_HANDLE
    );
    assert!(recorded().is_empty());
    assert_eq!(appmesh_free(h), APPMESH_NULL_HANDLE);
    assert!(last_error().contains("stale"));
}

#[test]
fn test_stale_handle_after_slot_reuse() {
    let _serial = setup();
    let old = appmesh_init();
    assert_eq!(appmesh_free(old), APPMESH_OK);
    let new = appmesh_init();

    let combo = c("enter");
    assert_eq!(unsafe { appmesh_send_key(old, combo.as_ptr(), 0) }, APPMESH_NULL_HANDLE);
    assert!(recorded().is_empty());
    assert_eq!(unsafe { appmesh_send_key(new, combo.as_ptr(), 0) }, APPMESH_OK);
    assert_eq!(
        recorded(),
        vec![KeyEvent::press(KEY_ENTER), KeyEvent::release(KEY_ENTER)]
    );
    assert_eq!(appmesh_free(new), APPMESH_OK);
}

#[test]
fn test_null_arguments_are_safe() {
    let _serial = setup();
    let text = c("x");
    assert_eq!(
        unsafe { appmesh_type_text(ptr::null_mut(), text.as_ptr(), 0) },
        APPMESH_NULL_HANDLE
    );
    assert_eq!(
        unsafe { appmesh_send_key(ptr::null_mut(), text.as_ptr(), 0) },
        APPMESH_NULL_HANDLE
    );
    assert_eq!(appmesh_free(ptr::null_mut()), APPMESH_OK);
    assert_eq!(appmesh_port_free(ptr::null_mut()), APPMESH_OK);
    unsafe { appmesh_string_free(ptr::null_mut()) };
    assert!(recorded().is_empty());

    let h = appmesh_init();
    assert_eq!(unsafe { appmesh_type_text(h, ptr::null(), 0) }, APPMESH_ERROR);
    assert!(last_error().contains("text is null"));
    appmesh_free(h);

    assert!(unsafe { appmesh_port_open(ptr::null()) }.is_null());
    let out = execute(ptr::null_mut(), "type_text", None);
    assert!(out.get("error").is_some());
}

#[test]
fn test_empty_text_and_bad_combo() {
    let _serial = setup();
    let h = appmesh_init();
    let empty = c("");
    assert_eq!(unsafe { appmesh_type_text(h, empty.as_ptr(), 5_000_000) }, APPMESH_OK);

    let bad = c("ctrl+bogus");
    assert_eq!(unsafe { appmesh_send_key(h, bad.as_ptr(), 0) }, APPMESH_ERROR);
    assert!(last_error().contains("ctrl+bogus"));
    assert!(recorded().is_empty());
    assert_eq!(appmesh_free(h), APPMESH_OK);
}

#[test]
fn test_oversized_text_is_rejected() {
    let _serial = setup();
    let h = appmesh_init();
    let long = c(&"x".repeat(MAX_TEXT_LENGTH + 1));
    assert_eq!(unsafe { appmesh_type_text(h, long.as_ptr(), 0) }, APPMESH_ERROR);
    assert!(last_error().contains("at most"));
    assert!(recorded().is_empty());
    assert_eq!(appmesh_free(h), APPMESH_OK);
}

#[test]
fn test_unknown_port_is_null() {
    let _serial = setup();
    let name = c("does-not-exist");
    assert!(unsafe { appmesh_port_open(name.as_ptr()) }.is_null());
    assert!(last_error().contains("unknown port"));
}

#[test]
fn test_input_port_round_trip() {
    let _serial = setup();
    let name = c("input");
    let port = unsafe { appmesh_port_open(name.as_ptr()) };
    assert!(!port.is_null());

    assert_eq!(
        execute(port, "type_text", Some(r#"{"text": "ok"}"#)),
        json!({ "typed": 2 })
    );
    assert_eq!(recorded(), typed("ok"));
    assert_eq!(
        execute(port, "send_key", Some(r#"{"combo": "ctrl+v", "delay_us": 0}"#)),
        json!({ "sent": "ctrl+v" })
    );
    assert_eq!(
        recorded(),
        vec![
            KeyEvent::press(KEY_LEFTCTRL),
            KeyEvent::press(47),
            KeyEvent::release(47),
            KeyEvent::release(KEY_LEFTCTRL),
        ]
    );

    let unknown = execute(port, "nonexistent", Some("{}"));
    assert_eq!(
        unknown,
        json!({ "error": "unknown command 'nonexistent' on port 'input'" })
    );

    let malformed = execute(port, "type_text", Some("{oops"));
    assert!(malformed["error"].as_str().unwrap().contains("invalid arguments JSON"));

    assert_eq!(appmesh_port_free(port), APPMESH_OK);
    assert_eq!(appmesh_port_free(port), APPMESH_NULL_HANDLE);
    assert!(execute(port, "type_text", Some(r#"{"text": "x"}"#))
        .get("error")
        .is_some());
}

#[test]
fn test_port_list_and_describe() {
    let _serial = setup();
    let list = take_json(appmesh_port_list());
    let ports: Vec<&str> = list["ports"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(ports.contains(&"input"));

    let name = c("input");
    let port = unsafe { appmesh_port_open(name.as_ptr()) };
    let desc = take_json(appmesh_port_describe(port));
    assert_eq!(desc["port"], "input");
    let commands: Vec<&str> = desc["commands"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(commands, vec!["send_key", "type_text"]);
    appmesh_port_free(port);
}

#[test]
fn test_concurrent_port_handles() {
    use rayon::prelude::*;

    let _serial = setup();
    let name = c("input");
    let a = unsafe { appmesh_port_open(name.as_ptr()) } as usize;
    let b = unsafe { appmesh_port_open(name.as_ptr()) } as usize;

    (0..32usize).into_par_iter().for_each(|i| {
        let (port, text) = if i % 2 == 0 { (a, "aa") } else { (b, "bbbb") };
        let args = json!({ "text": text, "delay_us": 0 }).to_string();
        let out = execute(port as *mut AppMeshPort, "type_text", Some(&args));
        assert_eq!(out, json!({ "typed": text.len() }));
    });

    assert_eq!(appmesh_port_free(a as *mut AppMeshPort), APPMESH_OK);
    assert_eq!(appmesh_port_free(b as *mut AppMeshPort), APPMESH_OK);

    // Both handles share the port's injector: calls never interleave
    let events = recorded();
    assert_eq!(events.len(), 16 * typed("aa").len() + 16 * typed("bbbb").len());
    for pair in events.chunks(2) {
        assert_eq!(pair[0], KeyEvent::press(pair[0].code));
        assert_eq!(pair[1], KeyEvent::release(pair[0].code));
    }
}

#[test]
fn test_versioned_api_table() {
    let _serial = setup();
    assert_eq!(appmesh_abi_version(), APPMESH_ABI_VERSION);
    assert!(appmesh_get_api(2).is_null());

    let api = unsafe { &*appmesh_get_api(1) };
    assert_eq!(api.abi_version, 1);

    let h = (api.init)();
    assert!(!h.is_null());
    let combo = c("shift+tab");
    assert_eq!(unsafe { (api.send_key)(h, combo.as_ptr(), 0) }, APPMESH_OK);
    assert_eq!(
        recorded(),
        vec![
            KeyEvent::press(KEY_LEFTSHIFT),
            KeyEvent::press(KEY_TAB),
            KeyEvent::release(KEY_TAB),
            KeyEvent::release(KEY_LEFTSHIFT),
        ]
    );
    assert_eq!((api.free)(h), APPMESH_OK);
}
