//! Per-descriptor registry entry.

use std::fmt;
use std::os::unix::io::RawFd;

use super::interest::{EventKind, EventSet};
use super::multiplexer::Callback;
use super::poller::Poller;

/// Handlers attached to one monitored descriptor, one slot per [`EventKind`].
pub struct MonitoredDescriptor<P: Poller> {
    fd: RawFd,
    initialized: bool,
    handlers: [Option<Callback<P>>; 6],
}

impl<P: Poller> MonitoredDescriptor<P> {
    pub(crate) fn new(fd: RawFd) -> Self {
        MonitoredDescriptor { fd, initialized: false, handlers: Default::default() }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Whether the kernel has seen an ADD for this descriptor. Every later
    /// interest push must be a MOD.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.handlers[kind.index()].is_some()
    }

    pub fn handler(&self, kind: EventKind) -> Option<&Callback<P>> {
        self.handlers[kind.index()].as_ref()
    }

    /// Kinds that currently have a handler.
    pub fn handled_kinds(&self) -> EventSet {
        EventKind::ALL
            .into_iter()
            .filter(|k| self.has_handler(*k))
            .fold(EventSet::empty(), |acc, k| acc | k.bit())
    }

    /// `None` clears the slot.
    pub(crate) fn set_handler(&mut self, kind: EventKind, handler: Option<Callback<P>>) {
        self.handlers[kind.index()] = handler;
    }

    /// Copy of all six slots, for undoing a change the kernel rejected.
    pub(crate) fn slots(&self) -> [Option<Callback<P>>; 6] {
        self.handlers.clone()
    }

    pub(crate) fn restore_slots(&mut self, slots: [Option<Callback<P>>; 6]) {
        self.handlers = slots;
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }
}

impl<P: Poller> fmt::Debug for MonitoredDescriptor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredDescriptor")
            .field("fd", &self.fd)
            .field("initialized", &self.initialized)
            .field("handled_kinds", &self.handled_kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{callback, Epoll};
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    #[test]
    fn slots_are_independent() {
        let mut md = MonitoredDescriptor::<Epoll>::new(5);
        assert_eq!(md.handled_kinds(), EventSet::empty());

        let cb: Callback<Epoll> = callback::<Epoll, _>(|_, _| {});
        md.set_handler(EventKind::Writable, Some(cb.clone()));
        md.set_handler(EventKind::Hangup, Some(cb.clone()));
        assert_eq!(md.handled_kinds(), EventKind::Writable | EventKind::Hangup);
        assert!(Rc::ptr_eq(md.handler(EventKind::Writable).unwrap(), &cb));

        md.set_handler(EventKind::Writable, None);
        assert!(!md.has_handler(EventKind::Writable));
        assert!(md.has_handler(EventKind::Hangup));
        assert!(!md.is_initialized());
    }
}
