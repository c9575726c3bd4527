// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A thin, move-only file handle over [`super::IoEngine`].
//!
//! Grounded on `original_source/lib/reactor/io/file.hh`/`.cc`'s `File`:
//! non-copyable, fatal on drop if still open, every op a direct
//! `IoEngine` call with the kernel's negative result translated into a
//! thrown `system_error`. Rust has no implicit move-then-zombie
//! destructor path, so the "moved-from handle is harmless to drop"
//! behavior is realized explicitly by giving the moved-from `File` the
//! sentinel fd exactly as the original's move constructor does.

use std::ffi::CStr;

use crate::error::{Error, Result};
use crate::io::{check, IoEngine};

const INVALID_FD: i32 = -1;

/// An open file descriptor, readable/writable through the thread's
/// [`IoEngine`]. Must be [`File::close`]d; dropping one still open is a
/// fatal invariant violation, not a recoverable error.
pub struct File {
    fd: i32,
}

impl File {
    /// Open `path`, failing synchronously if `flags` requests
    /// `O_CREAT`/`O_TMPFILE` without a mode.
    pub async fn open(path: &CStr, flags: i32) -> Result<File> {
        Self::open_with_mode(path, flags, 0).await
    }

    pub async fn open_with_mode(path: &CStr, flags: i32, mode: u32) -> Result<File> {
        let fd = if flags & (libc::O_CREAT | libc::O_TMPFILE) != 0 {
            IoEngine::current().open_with_mode(path, flags, mode).await?
        } else {
            IoEngine::current().open(path, flags).await?
        };
        let fd = check("open", fd)?;
        Ok(File { fd })
    }

    pub async fn fsync(&self) -> Result<()> {
        let ret = IoEngine::current().fsync(self.fd).await?;
        check("fsync", ret)?;
        Ok(())
    }

    pub async fn fdatasync(&self) -> Result<()> {
        let ret = IoEngine::current().fdatasync(self.fd).await?;
        check("fdatasync", ret)?;
        Ok(())
    }

    pub async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<u64> {
        // Safety: `buf` outlives the await below; this async fn does not
        // return (and `buf` cannot be dropped or moved) until the
        // engine's future resolves.
        let result = unsafe { IoEngine::current().read(self.fd, offset, buf).await? };
        Ok(check("read", result)? as u64)
    }

    pub async fn write(&self, offset: u64, buf: &[u8]) -> Result<u64> {
        // Safety: see `read`.
        let result = unsafe { IoEngine::current().write(self.fd, offset, buf).await? };
        Ok(check("write", result)? as u64)
    }

    /// Close the handle, consuming it so a closed `File` cannot be used
    /// again. Calling this is the only way to dispose of a `File`
    /// without triggering the drop-time panic.
    pub async fn close(mut self) -> Result<()> {
        let fd = self.fd;
        self.fd = INVALID_FD;
        let result = IoEngine::current().close(fd).await?;
        check("close", result)?;
        Ok(())
    }

    /// The raw file descriptor, for callers building their own
    /// `io_uring` ops (e.g. `readv`/`writev`) against it.
    pub fn as_raw_fd(&self) -> i32 {
        self.fd
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.fd != INVALID_FD {
            panic!("File dropped without being closed");
        }
    }
}
