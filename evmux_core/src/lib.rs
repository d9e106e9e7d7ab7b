//! Callback-driven readiness multiplexer over epoll.

pub mod config;
pub mod error;
pub mod logger;
#[cfg(target_os = "linux")]
pub mod os;

pub use config::{BatchPolicy, MuxConfig};
pub use error::{MuxError, Result};
#[cfg(target_os = "linux")]
pub use os::{EventKind, EventSet, Multiplexer};
