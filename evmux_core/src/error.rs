//! Error type shared by the dispatcher and its kernel backend.

use std::io;
use std::os::unix::io::RawFd;

pub type Result<T> = std::result::Result<T, MuxError>;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("failed to create epoll instance")]
    Create(#[source] io::Error),

    #[error("failed to put fd {fd} into non-blocking mode")]
    NonBlocking {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to register fd {fd} with epoll")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to modify epoll events of fd {fd}")]
    Modify {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("epoll_wait failed")]
    Wait(#[source] io::Error),

    #[error("fd {0} must be added with add_descriptor before attaching event handlers")]
    NotAdded(RawFd),

    #[error("{0:#x} is not a single event kind")]
    InvalidEventKind(u32),

    #[error("invalid multiplexer configuration: {0}")]
    InvalidConfig(String),
}

impl MuxError {
    /// Call-site bugs: retrying will not help, fixing the caller will.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            MuxError::NotAdded(_) | MuxError::InvalidEventKind(_) | MuxError::InvalidConfig(_)
        )
    }

    /// Kernel or resource-limit failures the process cannot recover from locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuxError::Create(_) | MuxError::NonBlocking { .. } | MuxError::Register { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classification_is_disjoint() {
        let errs = [
            MuxError::Create(io::Error::from_raw_os_error(libc::EMFILE)),
            MuxError::NotAdded(4),
            MuxError::InvalidEventKind(0x3),
            MuxError::Register { fd: 4, source: io::Error::from_raw_os_error(libc::EBADF) },
            MuxError::Wait(io::Error::from_raw_os_error(libc::EBADF)),
        ];
        let classes: Vec<(bool, bool)> =
            errs.iter().map(|e| (e.is_precondition(), e.is_fatal())).collect();
        assert_eq!(
            classes,
            vec![(false, true), (true, false), (true, false), (false, true), (false, false)]
        );
    }

    #[test]
    fn not_added_message_names_fd() {
        assert_eq!(
            MuxError::NotAdded(9).to_string(),
            "fd 9 must be added with add_descriptor before attaching event handlers"
        );
    }
}
