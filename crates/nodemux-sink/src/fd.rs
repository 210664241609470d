//! Raw socket options shared by the descriptor-backed sinks.

use std::os::fd::RawFd;

use crate::error::{Result, SinkError};

/// Whether a zero-timeout `poll` reports `fd` ready for writing.
pub(crate) fn poll_writable(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    // SAFETY: `pfd` is a valid, exclusively borrowed pollfd and nfds is 1.
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    rc == 1 && pfd.revents & libc::POLLOUT != 0
}

/// Set `SO_SNDBUF` on `fd`, saturating `size` at `c_int::MAX`.
pub(crate) fn set_send_buffer(fd: RawFd, size: usize) -> Result<()> {
    let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    // SAFETY: `fd` is an open socket owned by the caller and `value`
    // outlives the call; the length matches the pointed-to type.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(SinkError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}
