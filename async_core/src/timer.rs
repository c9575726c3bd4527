// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Absolute-deadline sleeping on top of [`crate::io::IoEngine::timeout`].
//!
//! Grounded on `original_source/lib/reactor/timer.cc`'s `sleep`: read
//! `CLOCK_MONOTONIC`, add the requested duration to get an absolute
//! deadline, submit an `IORING_TIMEOUT_ABS` timeout for it, and treat
//! `-ETIME` as ordinary completion rather than an error (it is the
//! kernel's normal "the deadline passed" signal for this op, not a
//! failure).

use std::time::Duration;

use io_uring::types::Timespec;

use crate::error::Result;
use crate::io::{check, IoEngine};

/// Suspend the calling coroutine until `duration` has elapsed, measured
/// against `CLOCK_MONOTONIC`.
pub async fn sleep(duration: Duration) -> Result<()> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // Safety: `now` is a valid, uniquely-owned `timespec` for the
    // duration of this call.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now);
    }

    let total_nanos = now.tv_nsec as i64 + duration.subsec_nanos() as i64;
    let deadline = Timespec::new()
        .sec(now.tv_sec as u64 + duration.as_secs() + (total_nanos / 1_000_000_000) as u64)
        .nsec((total_nanos % 1_000_000_000) as u32);

    // Safety: `deadline` lives on this async fn's stack for the whole
    // await below.
    let result = unsafe { IoEngine::current().timeout(&deadline).await? };

    if result == -libc::ETIME {
        return Ok(());
    }
    check("timeout", result)?;
    Ok(())
}
