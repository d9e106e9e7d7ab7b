//! Kernel readiness facility used by the multiplexer.
//!
//! `Epoll` is the only production implementation; the trait exists so the
//! dispatcher can be driven by scripted batches in tests.

use std::io::Result;
use std::os::unix::io::{AsRawFd, RawFd};

use super::interest::{EventSet, ReadyEvent};

pub trait Poller: AsRawFd {
    /// First registration of `fd`. Must be issued once per descriptor.
    fn add(&mut self, fd: RawFd, interest: EventSet) -> Result<()>;

    /// Replaces the whole previously registered interest of `fd`.
    fn modify(&mut self, fd: RawFd, interest: EventSet) -> Result<()>;

    fn delete(&mut self, fd: RawFd) -> Result<()>;

    /// Fills `events` with at most `max_events` ready pairs. `timeout_ms < 0`
    /// blocks until something is ready, `0` returns immediately.
    fn wait(&mut self, events: &mut Vec<ReadyEvent>, max_events: usize, timeout_ms: isize)
        -> Result<usize>;

    fn set_nonblocking(&mut self, fd: RawFd) -> Result<()> {
        super::epoll::set_nonblocking(fd)
    }
}
