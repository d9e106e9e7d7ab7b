//! Descriptor registry and wait-and-dispatch loop on top of a [`Poller`].
//!
//! A [`Multiplexer`] maps every monitored descriptor to up to six handlers,
//! one per [`EventKind`]. Whenever a handler is attached or detached the
//! descriptor's full interest mask is recomputed and pushed to the kernel:
//! the first push is an ADD, every later one a MOD that replaces the previous
//! mask.
//!
//! Handlers run synchronously on the thread calling
//! [`Multiplexer::wait_for_events`] and receive the multiplexer itself, so a
//! handler may add or remove descriptors and handlers while a batch is being
//! dispatched. The registry is re-checked before every handler invocation.
//!
//! The type stores `Rc` handlers and is therefore neither `Send` nor `Sync`:
//! one thread owns it and drives its loop.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use super::descriptor::MonitoredDescriptor;
use super::epoll::{Epoll, MAX_EVENTS_LIMIT};
use super::interest::{EventKind, EventSet, ReadyEvent};
use super::poller::Poller;
use crate::config::{BatchPolicy, MuxConfig};
use crate::error::{MuxError, Result};

/// Handler invoked with the multiplexer and the ready descriptor.
pub type Callback<P = Epoll> = Rc<dyn Fn(&mut Multiplexer<P>, RawFd)>;

/// Wraps a closure into a [`Callback`].
pub fn callback<P, F>(f: F) -> Callback<P>
where
    P: Poller,
    F: Fn(&mut Multiplexer<P>, RawFd) + 'static,
{
    Rc::new(f)
}

pub struct Multiplexer<P: Poller = Epoll> {
    poller: P,
    monitored: HashMap<RawFd, MonitoredDescriptor<P>>,
    edge_triggered: bool,
    max_events: usize,
    batch_policy: BatchPolicy,
    events: Vec<ReadyEvent>,
}

impl Multiplexer<Epoll> {
    /// Creates an epoll-backed multiplexer with the default batch size.
    pub fn new(edge_triggered: bool) -> Result<Self> {
        Self::with_config(&MuxConfig { edge_triggered, ..MuxConfig::default() })
    }

    pub fn with_config(config: &MuxConfig) -> Result<Self> {
        let epoll = Epoll::new().map_err(MuxError::Create)?;
        Self::with_poller(epoll, config)
    }
}

impl<P: Poller> Multiplexer<P> {
    pub fn with_poller(poller: P, config: &MuxConfig) -> Result<Self> {
        if config.max_events == 0 {
            return Err(MuxError::InvalidConfig("max_events must be at least 1".into()));
        }
        if config.max_events > MAX_EVENTS_LIMIT {
            return Err(MuxError::InvalidConfig(format!(
                "max_events must not exceed {MAX_EVENTS_LIMIT}"
            )));
        }
        Ok(Multiplexer {
            poller,
            monitored: HashMap::new(),
            edge_triggered: config.edge_triggered,
            max_events: config.max_events,
            batch_policy: config.batch_policy,
            events: Vec::with_capacity(config.max_events),
        })
    }

    /// Starts tracking `fd`. Calling it again for a tracked descriptor keeps
    /// the existing entry and its handlers.
    ///
    /// In edge-triggered mode the descriptor is switched to non-blocking, since
    /// handlers have to drain it until `EAGAIN`.
    pub fn add_descriptor(&mut self, fd: RawFd) -> Result<()> {
        if self.edge_triggered {
            self.poller
                .set_nonblocking(fd)
                .map_err(|source| MuxError::NonBlocking { fd, source })?;
        }
        self.monitored.entry(fd).or_insert_with(|| {
            trace!(fd, "descriptor added");
            MonitoredDescriptor::new(fd)
        });
        Ok(())
    }

    /// Stops tracking `fd`. Unknown descriptors are ignored, and so is a
    /// failing kernel DEL: the descriptor may already be closed.
    ///
    /// The descriptor itself is never closed here.
    pub fn remove_descriptor(&mut self, fd: RawFd) {
        let Some(md) = self.monitored.remove(&fd) else {
            return;
        };
        if md.is_initialized() {
            if let Err(e) = self.poller.delete(fd) {
                debug!(fd, error = %e, "epoll_ctl DEL failed, ignored");
            }
        }
        trace!(fd, "descriptor removed");
    }

    /// Installs `handler` for every kind in `kinds` and pushes the new interest
    /// mask to the kernel.
    ///
    /// # Errors
    ///
    /// [`MuxError::NotAdded`] if `fd` was never passed to
    /// [`add_descriptor`](Self::add_descriptor); [`MuxError::Register`] or
    /// [`MuxError::Modify`] if the kernel rejects the mask.
    pub fn add_event_handler<F>(&mut self, fd: RawFd, kinds: impl Into<EventSet>, handler: F) -> Result<()>
    where
        F: Fn(&mut Multiplexer<P>, RawFd) + 'static,
    {
        self.add_callback(fd, kinds, callback(handler))
    }

    /// Like [`add_event_handler`](Self::add_event_handler) for a handler that
    /// is already shared, e.g. across several descriptors.
    pub fn add_callback(&mut self, fd: RawFd, kinds: impl Into<EventSet>, handler: Callback<P>) -> Result<()> {
        let kinds = kinds.into();
        self.update_slots(fd, |md| {
            for kind in kinds.kinds() {
                md.set_handler(kind, Some(Rc::clone(&handler)));
            }
        })
    }

    /// Clears the handlers of every kind in `kinds` and pushes the reduced
    /// interest mask.
    pub fn remove_event_handler(&mut self, fd: RawFd, kinds: impl Into<EventSet>) -> Result<()> {
        let kinds = kinds.into();
        self.update_slots(fd, |md| {
            for kind in kinds.kinds() {
                if md.has_handler(kind) {
                    md.set_handler(kind, None);
                }
            }
        })
    }

    /// Blocks until at least one descriptor is ready or `timeout` elapses
    /// (`None` waits forever, `Some(Duration::ZERO)` only polls), then runs the
    /// matching handlers.
    ///
    /// Pairs are handled in kernel order, kinds of one pair in
    /// [`EventKind::ALL`] order. After a pair carrying
    /// [`EventSet::HANGUP_CLASS`] the descriptor is removed. Returns the number
    /// of ready pairs fetched; an interrupted wait counts as zero.
    pub fn wait_for_events(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let mut batch = std::mem::take(&mut self.events);
        let res = self.poller.wait(&mut batch, self.max_events, timeout_to_ms(timeout));
        let n = match res {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                trace!("epoll_wait interrupted");
                0
            }
            Err(e) => {
                self.events = batch;
                return Err(MuxError::Wait(e));
            }
        };

        self.dispatch(&batch[..n.min(batch.len())]);
        batch.clear();
        self.events = batch;
        Ok(n)
    }

    /// Calls [`wait_for_events`](Self::wait_for_events) until `should_stop`
    /// returns true. `should_stop` is checked before every wait.
    pub fn run_until(&mut self, timeout: Option<Duration>, mut should_stop: impl FnMut() -> bool) -> Result<()> {
        while !should_stop() {
            self.wait_for_events(timeout)?;
        }
        Ok(())
    }

    pub fn monitored_fds(&self) -> &HashMap<RawFd, MonitoredDescriptor<P>> {
        &self.monitored
    }

    /// The epoll descriptor itself.
    pub fn kernel_fd(&self) -> RawFd {
        self.poller.as_raw_fd()
    }

    pub fn is_edge_triggered(&self) -> bool {
        self.edge_triggered
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        self.batch_policy
    }

    /// Mask that was (or would be) pushed to the kernel for `fd`.
    pub fn interest_mask(&self, fd: RawFd) -> Option<EventSet> {
        self.monitored.get(&fd).map(|md| self.mask_of(md))
    }

    fn mask_of(&self, md: &MonitoredDescriptor<P>) -> EventSet {
        let mut mask = md.handled_kinds();
        if self.edge_triggered {
            mask |= EventSet::EDGE_TRIGGERED;
        }
        mask
    }

    /// Applies `change` to the entry of `fd` and pushes the resulting mask.
    /// If the kernel rejects it the slots are put back, so the registry never
    /// reports handlers the kernel is not watching for.
    fn update_slots(&mut self, fd: RawFd, change: impl FnOnce(&mut MonitoredDescriptor<P>)) -> Result<()> {
        let md = self.monitored.get_mut(&fd).ok_or(MuxError::NotAdded(fd))?;
        let saved = md.slots();
        change(md);

        let res = self.reload_interest(fd);
        if res.is_err() {
            if let Some(md) = self.monitored.get_mut(&fd) {
                md.restore_slots(saved);
            }
        }
        res
    }

    fn reload_interest(&mut self, fd: RawFd) -> Result<()> {
        let mask = self.interest_mask(fd).ok_or(MuxError::NotAdded(fd))?;
        let md = self.monitored.get_mut(&fd).ok_or(MuxError::NotAdded(fd))?;

        // ADD is accepted only once per descriptor.
        if md.is_initialized() {
            self.poller
                .modify(fd, mask)
                .map_err(|source| MuxError::Modify { fd, source })?;
            trace!(fd, ?mask, "epoll_ctl MOD");
        } else {
            self.poller
                .add(fd, mask)
                .map_err(|source| MuxError::Register { fd, source })?;
            md.mark_initialized();
            trace!(fd, ?mask, "epoll_ctl ADD");
        }
        Ok(())
    }

    fn dispatch(&mut self, batch: &[ReadyEvent]) {
        'batch: for ev in batch {
            for kind in EventKind::ALL {
                let handler = match self.monitored.get(&ev.fd) {
                    None => match self.batch_policy {
                        BatchPolicy::AbortBatch => {
                            debug!(fd = ev.fd, "descriptor vanished mid-batch, dropping rest of batch");
                            return;
                        }
                        BatchPolicy::SkipDescriptor => {
                            debug!(fd = ev.fd, "descriptor vanished mid-batch, skipping it");
                            continue 'batch;
                        }
                    },
                    Some(md) if ev.events.has(kind) => md.handler(kind).cloned(),
                    Some(_) => None,
                };
                if let Some(handler) = handler {
                    handler(self, ev.fd);
                }
            }

            if ev.events.intersects(EventSet::HANGUP_CLASS) {
                debug!(fd = ev.fd, events = ?ev.events, "peer closed, removing descriptor");
                self.remove_descriptor(ev.fd);
            }
        }
    }
}

impl<P: Poller> fmt::Debug for Multiplexer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("kernel_fd", &self.kernel_fd())
            .field("edge_triggered", &self.edge_triggered)
            .field("max_events", &self.max_events)
            .field("batch_policy", &self.batch_policy)
            .field("monitored", &self.monitored.len())
            .finish()
    }
}

/// Sub-millisecond remainders round up so a short timeout never turns into a
/// non-blocking poll.
fn timeout_to_ms(timeout: Option<Duration>) -> isize {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
            ms.min(i32::MAX as u128) as isize
        }
    }
}
