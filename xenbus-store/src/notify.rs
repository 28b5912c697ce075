//! Eventfd plumbing for the watch queue.
//!
//! The watch channel pairs an mpsc queue with an eventfd so external poll
//! loops can learn about pending events without consuming them.

use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

pub(crate) fn new_event_fd() -> io::Result<OwnedFd> {
    let fd = unsafe { nix::libc::eventfd(0, nix::libc::EFD_NONBLOCK | nix::libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bump the eventfd counter; best effort.
pub(crate) fn signal(fd: RawFd) {
    let buf: u64 = 1;
    unsafe {
        nix::libc::write(fd, &buf as *const u64 as *const nix::libc::c_void, 8);
    }
}
