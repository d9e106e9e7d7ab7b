use super::interest::{EventSet, ReadyEvent};
use super::poller::Poller;
use std::io::{Error, Result};
use std::os::unix::io::{AsRawFd, RawFd};

/// Largest event cap `epoll_wait` accepts (`maxevents` is an `int` and the
/// kernel bounds the buffer size by `INT_MAX` bytes).
pub(crate) const MAX_EVENTS_LIMIT: usize = i32::MAX as usize / std::mem::size_of::<libc::epoll_event>();

/// Owned epoll instance. Closing happens on drop; registered descriptors are
/// left alone.
#[derive(Debug)]
pub struct Epoll {
    fd: RawFd,
    raw: Vec<libc::epoll_event>,
}

impl Epoll {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        Ok(Epoll { fd, raw: Vec::new() })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: EventSet) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: fd as u64,
        };
        let res = unsafe { libc::epoll_ctl(self.fd, op, fd, &mut ev) };
        if res < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

impl Poller for Epoll {
    fn add(&mut self, fd: RawFd, interest: EventSet) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    fn modify(&mut self, fd: RawFd, interest: EventSet) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    fn delete(&mut self, fd: RawFd) -> Result<()> {
        // Pre-2.6.9 kernels reject a null event pointer for DEL.
        self.ctl(libc::EPOLL_CTL_DEL, fd, EventSet::empty())
    }

    fn wait(&mut self, events: &mut Vec<ReadyEvent>, max_events: usize, timeout_ms: isize) -> Result<usize> {
        events.clear();
        if self.raw.len() < max_events {
            self.raw.resize(max_events, libc::epoll_event { events: 0, u64: 0 });
        }

        let n = unsafe {
            libc::epoll_wait(
                self.fd,
                self.raw.as_mut_ptr(),
                max_events as i32,
                timeout_ms.clamp(-1, i32::MAX as isize) as i32,
            )
        };
        if n < 0 {
            return Err(Error::last_os_error());
        }

        // Copy out of the packed kernel struct before touching the fields.
        events.extend(self.raw.iter().take(n as usize).map(|src| {
            let bits = src.events;
            let data = src.u64;
            ReadyEvent { fd: data as RawFd, events: EventSet::from_bits_retain(bits) }
        }));
        Ok(n as usize)
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Adds `O_NONBLOCK` to the descriptor's status flags.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

pub fn is_nonblocking(fd: RawFd) -> Result<bool> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(Error::last_os_error());
    }
    Ok(flags & libc::O_NONBLOCK != 0)
}
