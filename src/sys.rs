//! Raw V4L2 ioctl, poll and mmap access.
//!
//! Everything that needs `unsafe` lives here; the rest of the crate only
//! sees safe wrappers.

#![allow(unsafe_code)]

use std::io;
use std::os::raw::{c_int, c_void};
use std::ptr::{self, NonNull};
use std::time::Duration;

use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};

use crate::traits::MappedRegion;

/// Buffer sits in the driver's incoming queue.
pub const V4L2_BUF_FLAG_QUEUED: u32 = 0x0000_0001;
/// Buffer sits in the driver's outgoing queue.
pub const V4L2_BUF_FLAG_DONE: u32 = 0x0000_0004;
/// Set by the driver on a dequeued buffer whose data is corrupt.
pub const V4L2_BUF_FLAG_ERROR: u32 = 0x0000_0040;

/// Issue an ioctl, retrying while interrupted by a signal.
pub fn xioctl<T>(fd: c_int, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is a live, exclusively borrowed argument struct of the
        // type the request expects.
        let ret = unsafe { v4l2::ioctl(fd, request, ptr::from_mut(arg).cast::<c_void>()) };
        match ret {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Zeroed capture buffer descriptor for `index`.
pub fn capture_buffer(index: u32) -> v4l2_buffer {
    // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
    let mut buf: v4l2_buffer = unsafe { std::mem::zeroed() };
    buf.index = index;
    buf.type_ = Type::VideoCapture as u32;
    buf.memory = Memory::Mmap as u32;
    buf
}

/// Mapping offset of an mmap buffer descriptor.
pub fn buffer_offset(buf: &v4l2_buffer) -> u32 {
    // SAFETY: for MMAP buffers the driver fills the `offset` member of the union.
    unsafe { buf.m.offset }
}

/// Zeroed mmap capture buffer request for `count` buffers.
pub fn capture_request(count: u32) -> v4l2_requestbuffers {
    // SAFETY: v4l2_requestbuffers is a plain C struct; all-zero is valid.
    let mut req: v4l2_requestbuffers = unsafe { std::mem::zeroed() };
    req.count = count;
    req.type_ = Type::VideoCapture as u32;
    req.memory = Memory::Mmap as u32;
    req
}

/// Wait until `fd` is readable. Returns `false` on timeout.
pub fn poll_readable(fd: c_int, timeout: Duration) -> io::Result<bool> {
    let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
    let mut fds = [libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }];

    loop {
        // SAFETY: `fds` is a valid array of one pollfd for the duration of the call.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, millis) };
        match ret {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            0 => return Ok(false),
            _ => return Ok(true),
        }
    }
}

/// A device buffer mapped shared into process memory.
///
/// Unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MmapRegion {
    /// Map `len` bytes of `fd` at `offset`.
    pub fn map(fd: c_int, offset: u32, len: usize) -> io::Result<Self> {
        let offset = libc::off_t::try_from(offset).map_err(io::Error::other)?;
        // SAFETY: a fresh shared mapping chosen by the kernel; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        Ok(Self { ptr, len })
    }
}

impl MappedRegion for MmapRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&[u8]) -> T,
    {
        // SAFETY: the mapping is live for `len` bytes until drop. The pool only
        // reads a region while its slot is dequeued, so the device is not
        // writing to it.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) };
        f(bytes)
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a mapping created in `map` and not yet unmapped.
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
        if ret == -1 {
            tracing::warn!(
                error = %io::Error::last_os_error(),
                len = self.len,
                "munmap failed"
            );
        }
    }
}
