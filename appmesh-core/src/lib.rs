//! `appmesh` -- Pure Rust core library for AppMesh.
//!
//! This crate holds all automation logic with **no C ABI concerns**.
//! It is consumed by:
//! - `appmesh-ffi` (C ABI shared library `libappmesh_core.so`)
//! - `appmesh-cli` (standalone `appmesh` command)
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`errors`] | Per-boundary error enums via `thiserror` |
//! | [`config`] | Environment-driven [`Config`](config::Config) |
//! | [`keymap`] | evdev key codes, US layout, combo parsing |
//! | [`session`] | Remote-input connector (EIS over KWin, dry-run) |
//! | [`injector`] | `InputHandle`: text and key combos |
//! | [`handles`] | Generation-counted opaque handles |
//! | [`port`] | Command tables, port registry, JSON dispatch |
//! | [`ports`] | Built-in `input`, `notify`, `clipboard`, `screenshot` and `windows` ports |

pub mod config;
pub mod errors;
pub mod handles;
pub mod injector;
pub mod keymap;
pub mod port;
pub mod ports;
pub mod session;

pub use config::Config;
pub use errors::AppMeshError;
pub use injector::{EventTiming, InputHandle};
pub use port::{DispatchResult, PortHandle, PortRegistry};
