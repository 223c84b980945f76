//! ro-rs: Robot Odyssey execution engine
//!
//! Runs the statically translated 1984 DOS binaries on modern hosts. The
//! offline translator turns each 8086 executable into a module of Rust
//! functions; this crate supplies everything those functions need at
//! runtime: the virtual CPU state, segmented memory, a DOS/BIOS/PC facade,
//! and the output pipeline that converts CGA frames and speaker clicks into
//! RGBA images and PCM audio.
//!
//! The crate is headless. A host registers translated modules, implements
//! [`Host`] for presentation, and drives [`Engine::run`] from its own main
//! loop.

pub mod cpu;
pub mod draw;
pub mod engine;
pub mod fs;
pub mod game;
pub mod hardware;
pub mod host;
pub mod input;
pub mod mem;
pub mod output;
pub mod process;
mod ring;
pub mod tinysave;

pub use engine::{Engine, Step};
pub use hardware::SaveStatus;
pub use host::{Host, NullHost};
pub use process::{AddressId, Exec, Flow, ModuleDef};
