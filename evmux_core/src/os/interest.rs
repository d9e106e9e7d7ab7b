//! Readiness kinds, kind sets and kernel event masks.

use std::ops::BitOr;
use std::os::unix::io::RawFd;

use crate::error::MuxError;

/// One readiness condition a handler can be attached to.
///
/// The variant order is the order in which handlers of one descriptor are
/// invoked during dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Readable,
    Writable,
    PeerHalfClosed,
    PriorityData,
    Error,
    Hangup,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Readable,
        EventKind::Writable,
        EventKind::PeerHalfClosed,
        EventKind::PriorityData,
        EventKind::Error,
        EventKind::Hangup,
    ];

    pub const fn bit(self) -> EventSet {
        match self {
            EventKind::Readable => EventSet::READABLE,
            EventKind::Writable => EventSet::WRITABLE,
            EventKind::PeerHalfClosed => EventSet::PEER_HALF_CLOSED,
            EventKind::PriorityData => EventSet::PRIORITY_DATA,
            EventKind::Error => EventSet::ERROR,
            EventKind::Hangup => EventSet::HANGUP,
        }
    }

    /// Slot index inside a registry entry.
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u32> for EventKind {
    type Error = MuxError;

    /// Accepts exactly one of the six kernel bits.
    fn try_from(bits: u32) -> Result<Self, MuxError> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.bit().bits() == bits)
            .ok_or(MuxError::InvalidEventKind(bits))
    }
}

bitflags::bitflags! {
    /// A set of event kinds, also used verbatim as the kernel interest/ready mask.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EventSet: u32 {
        const READABLE         = libc::EPOLLIN as u32;
        const WRITABLE         = libc::EPOLLOUT as u32;
        const PEER_HALF_CLOSED = libc::EPOLLRDHUP as u32;
        const PRIORITY_DATA    = libc::EPOLLPRI as u32;
        const ERROR            = libc::EPOLLERR as u32;
        const HANGUP           = libc::EPOLLHUP as u32;
        const EDGE_TRIGGERED   = libc::EPOLLET as u32;
    }
}

impl EventSet {
    /// Kinds after which a descriptor is dropped from the registry.
    pub const HANGUP_CLASS: EventSet = EventSet::PEER_HALF_CLOSED.union(EventSet::HANGUP);

    pub fn has(self, kind: EventKind) -> bool {
        self.contains(kind.bit())
    }

    /// Contained kinds in dispatch order; `EDGE_TRIGGERED` is not a kind.
    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |k| self.has(*k))
    }
}

impl From<EventKind> for EventSet {
    fn from(kind: EventKind) -> Self {
        kind.bit()
    }
}

impl BitOr for EventKind {
    type Output = EventSet;

    fn bitor(self, rhs: EventKind) -> EventSet {
        self.bit() | rhs.bit()
    }
}

impl BitOr<EventKind> for EventSet {
    type Output = EventSet;

    fn bitor(self, rhs: EventKind) -> EventSet {
        self | rhs.bit()
    }
}

/// One (descriptor, ready mask) pair as reported by the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyEvent {
    pub fd: RawFd,
    pub events: EventSet,
}

impl ReadyEvent {
    pub fn new(fd: RawFd, events: impl Into<EventSet>) -> Self {
        ReadyEvent { fd, events: events.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kinds_come_back_in_dispatch_order() {
        let set = EventKind::Hangup | EventKind::Readable | EventKind::Error;
        let kinds: Vec<_> = (set | EventSet::EDGE_TRIGGERED).kinds().collect();
        assert_eq!(kinds, vec![EventKind::Readable, EventKind::Error, EventKind::Hangup]);
    }

    #[test]
    fn try_from_accepts_single_bits_only() {
        assert_eq!(EventKind::try_from(libc::EPOLLPRI as u32).unwrap(), EventKind::PriorityData);
        assert!(matches!(
            EventKind::try_from((libc::EPOLLIN | libc::EPOLLOUT) as u32),
            Err(MuxError::InvalidEventKind(_))
        ));
        assert!(EventKind::try_from(0).is_err());
        assert!(EventKind::try_from(libc::EPOLLET as u32).is_err());
    }

    #[test]
    fn hangup_class_covers_both_close_kinds() {
        assert!(EventSet::HANGUP_CLASS.has(EventKind::PeerHalfClosed));
        assert!(EventSet::HANGUP_CLASS.has(EventKind::Hangup));
        assert!(!EventSet::HANGUP_CLASS.intersects(EventSet::READABLE | EventSet::ERROR));
    }
}
