//! Raw descriptor helpers that socket2 does not cover.

use std::{io, mem::MaybeUninit, os::unix::io::RawFd};

/// Checks for pending bytes on `fd` without consuming them and without
/// blocking. With `out_of_band` set, looks at the urgent byte instead.
pub(crate) fn peek_fd(fd: RawFd, out_of_band: bool) -> io::Result<usize> {
    let mut byte = 0u8;
    let mut flags = libc::MSG_PEEK | libc::MSG_DONTWAIT;
    if out_of_band {
        flags |= libc::MSG_OOB;
    }
    // SAFETY: the buffer is a live one-byte local and its length is passed along
    let received = unsafe { libc::recv(fd, (&mut byte as *mut u8).cast(), 1, flags) };
    if received < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(received as usize)
    }
}

/// View of an initialised buffer as the uninitialised one socket2 expects.
pub(crate) fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: `u8` and `MaybeUninit<u8>` share layout, and socket2 only ever
    // writes initialised bytes into the slice
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}
