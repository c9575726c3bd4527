// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Error taxonomy surfaced to callers (state protocol, system, argument,
//! fatal). See the crate-level docs for which kind applies where.

use thiserror::Error as ThisError;

/// The non-fatal error kinds a `Future` can carry or an engine call can
/// return synchronously.
///
/// Fatal engine-invariant violations (double reactor, exhausted
/// submission ring, ref-count underflow) are never represented here; they
/// `panic!` after logging a diagnostic, per the runtime's single-block,
/// single-instance contract.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Read attempted on a cell that has not yet been settled.
    #[error("not ready")]
    NotReady,

    /// `Promise::get_future` called a second time on the same promise.
    #[error("future already retrieved")]
    AlreadyRetrieved,

    /// `Promise::set`/`set_error` called on an already-settled cell.
    #[error("promise already satisfied")]
    AlreadySatisfied,

    /// The last `Promise` handle was dropped while the cell was still
    /// empty and a `Future` observer remained.
    #[error("broken promise")]
    BrokenPromise,

    /// A negative syscall or completion-queue result, translated to the
    /// platform error category plus a short human-readable context.
    #[error("{context}: {source}")]
    System {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Synchronous rejection of an ill-formed call, e.g. `open(O_CREAT)`
    /// without a mode.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Build a [`Error::System`] from a raw negative `errno` result, as
    /// returned by an `io_uring` completion or a POSIX shim.
    pub fn from_negative_errno(context: &'static str, result: i32) -> Self {
        debug_assert!(result < 0, "from_negative_errno called with non-negative result");
        Error::System {
            context,
            source: std::io::Error::from_raw_os_error(-result),
        }
    }

    /// The raw `errno` this error carries, if it is a [`Error::System`].
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::System { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Shorthand used throughout the crate for engine and coroutine results.
pub type Result<T> = std::result::Result<T, Error>;
