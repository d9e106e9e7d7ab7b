//! Readiness multiplexing on top of Linux epoll.
//!
//! `Epoll` owns the kernel object, `Multiplexer` owns the descriptor registry
//! and dispatches ready events to per-kind handlers.

mod descriptor;
mod epoll;
mod interest;
mod multiplexer;
mod poller;

pub use descriptor::MonitoredDescriptor;
pub use epoll::{is_nonblocking, set_nonblocking, Epoll};
pub use interest::{EventKind, EventSet, ReadyEvent};
pub use multiplexer::{callback, Callback, Multiplexer};
pub use poller::Poller;
