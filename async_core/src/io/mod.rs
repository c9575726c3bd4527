// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The `io_uring`-backed I/O engine: one instance per thread, polled as
//! a single reactor routine.
//!
//! Grounded on `original_source/lib/reactor/io/io.hh`/`.cc`. The
//! original placement-constructs a `Promise<int>` directly into an
//! `io_uring_sqe`'s 8-byte `user_data` word and reinterprets it back on
//! completion, verified by a `static_assert` that the two are the same
//! size. This crate's `Promise<T>` is a thin wrapper around
//! `Rc<RefCell<state::Inner<T>>>` (see `promise.rs`), so the same trick
//! is realized with `Rc::into_raw`/`Rc::from_raw` cast through `u64`,
//! verified the same way with `static_assertions::const_assert_eq!`.
//!
//! Every op here hands back the kernel's raw (possibly negative) result
//! as `Future<i32>`, exactly as the original does — translating a
//! negative result into a typed [`Error`] is left to call sites
//! ([`crate::timer::sleep`], [`crate::io::file`], [`crate::io::net`])
//! that know what a given negative result means for them, mirroring
//! `timer.cc`'s `-ETIME` special case. [`check`] is the shared helper
//! those call sites use.

pub mod file;
pub mod net;

use std::cell::{Cell, RefCell};
use std::ffi::CStr;
use std::rc::{Rc, Weak};

use io_uring::{opcode, squeue, types, IoUring};
use once_cell::sync::OnceCell;
use static_assertions::const_assert_eq;

use crate::error::Error;
use crate::executable::Routine;
use crate::promise::{make_exception_future, Future, Promise};
use crate::reactor::Reactor;
use crate::scope_guard::BoxedScopeGuard;
use crate::state::Inner;

const_assert_eq!(std::mem::size_of::<u64>(), std::mem::size_of::<*const ()>());

/// Submission queue depth used until a caller overrides it with
/// [`set_default_ring_entries`]. `io_uring_queue_init`'s `max_events`
/// equivalent.
const BUILTIN_RING_ENTRIES: u32 = 256;

/// If set, every subsequently constructed [`IoEngine`] sizes its
/// submission/completion rings to this value instead of
/// [`BUILTIN_RING_ENTRIES`].
///
/// Grounded on `cros_async`'s `DEFAULT_EXECUTOR_KIND`/
/// `Executor::set_default_executor_kind`: a process-wide configuration
/// default guarded by a `once_cell::sync::OnceCell`, settable at most
/// once. This crate's analogous per-process knob is the ring depth
/// rather than an executor kind (this runtime has only one reactor
/// flavor), but the shape — lazy built-in default, one-shot override
/// before first use — is carried exactly.
static DEFAULT_RING_ENTRIES: OnceCell<u32> = OnceCell::new();

/// Error returned by [`set_default_ring_entries`] when a default has
/// already been established, either by an earlier call or by the
/// built-in default already having been read.
#[derive(Debug, thiserror::Error)]
#[error("default ring entries already set to {0}")]
pub struct SetDefaultRingEntriesError(pub u32);

/// Override the submission/completion ring depth used by every
/// [`IoEngine`] constructed from this point on. Must be called before
/// the first [`IoEngine::new`] on the process (which otherwise falls
/// back to the built-in default and locks it in); a second call fails
/// with [`SetDefaultRingEntriesError`].
pub fn set_default_ring_entries(entries: u32) -> Result<(), SetDefaultRingEntriesError> {
    DEFAULT_RING_ENTRIES.set(entries).map_err(|_| {
        let current = *DEFAULT_RING_ENTRIES
            .get()
            .expect("OnceCell::set just failed, so a value must already be present");
        SetDefaultRingEntriesError(current)
    })
}

fn ring_entries() -> u32 {
    *DEFAULT_RING_ENTRIES.get_or_init(|| BUILTIN_RING_ENTRIES)
}

thread_local! {
    static CURRENT: RefCell<Option<Weak<IoEngine>>> = RefCell::new(None);
}

type Cell64<T> = Rc<RefCell<Inner<T>>>;

/// The process's single `io_uring` instance and its submission/in-flight
/// counters.
pub struct IoEngine {
    ring: RefCell<IoUring>,
    pending: Cell<u32>,
    in_flight: Cell<u32>,
    poll_guard: RefCell<Option<BoxedScopeGuard>>,
}

impl IoEngine {
    /// Create the engine and register its poll routine with `reactor`.
    /// Fatal if one already exists on this thread.
    pub fn new(reactor: &Rc<Reactor>) -> crate::error::Result<Rc<IoEngine>> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(weak) = current.as_ref() {
                if weak.upgrade().is_some() {
                    panic!("an IoEngine already exists on this thread");
                }
            }

            let ring = IoUring::new(ring_entries())
                .map_err(|source| Error::System { context: "io_uring_queue_init", source })?;

            let engine = Rc::new(IoEngine {
                ring: RefCell::new(ring),
                pending: Cell::new(0),
                in_flight: Cell::new(0),
                poll_guard: RefCell::new(None),
            });

            let weak_engine = Rc::downgrade(&engine);
            let guard = reactor.add_routine(Routine::new(move || {
                if let Some(engine) = weak_engine.upgrade() {
                    engine.submit_pending();
                    engine.complete_ready();
                }
            }));
            *engine.poll_guard.borrow_mut() = Some(guard);

            *current = Some(Rc::downgrade(&engine));
            Ok(engine)
        })
    }

    /// Fetch the thread's active engine. Fatal if none exists.
    pub fn current() -> Rc<IoEngine> {
        CURRENT
            .with(|c| c.borrow().as_ref().and_then(Weak::upgrade))
            .unwrap_or_else(|| panic!("no active IoEngine on this thread"))
    }

    fn prepare(&self, entry: squeue::Entry) -> Future<i32> {
        let mut promise: Promise<i32> = Promise::new();
        let future = promise
            .get_future()
            .expect("a freshly created promise's future has never been retrieved");
        let cell: Cell64<i32> = promise.into_cell();
        let user_data = Rc::into_raw(cell) as u64;
        let entry = entry.user_data(user_data);

        // Safety: `user_data` is a live `Rc::into_raw` pointer that
        // `complete_ready` reclaims with `Rc::from_raw` exactly once,
        // when (and only when) the kernel reports this entry complete.
        // Any buffer the entry references must outlive that completion;
        // callers preparing buffer-bearing ops are `unsafe` themselves
        // for that reason.
        unsafe {
            self.ring
                .borrow_mut()
                .submission()
                .push(&entry)
                .expect("submission queue full");
        }
        self.pending.set(self.pending.get() + 1);
        future
    }

    fn submit_pending(&self) {
        while self.pending.get() > 0 {
            match self.ring.borrow_mut().submit() {
                Ok(submitted) => {
                    self.pending.set(self.pending.get() - submitted as u32);
                    self.in_flight.set(self.in_flight.get() + submitted as u32);
                }
                Err(err) => {
                    log::error!(target: "io", "io_uring_submit failed: {err}");
                    return;
                }
            }
        }
    }

    /// Reap every currently-available completion, settling its
    /// `Promise`. Blocks in `io_uring_enter` first, but only when the
    /// reactor made no progress this iteration and at least one op is
    /// in flight — the single-block rule spec.md assigns to this
    /// routine.
    fn complete_ready(&self) {
        if !Reactor::current().has_progress() && self.in_flight.get() > 0 {
            if let Err(err) = self.ring.borrow_mut().submit_and_wait(1) {
                log::error!(target: "io", "io_uring_enter (wait) failed: {err}");
            }
        }

        let mut ring = self.ring.borrow_mut();
        let mut completion = ring.completion();
        completion.sync();
        for cqe in &mut completion {
            self.in_flight.set(self.in_flight.get() - 1);
            // Safety: this user_data was produced by `Rc::into_raw` in
            // `prepare` and is reclaimed exactly once, here.
            let cell: Cell64<i32> =
                unsafe { Rc::from_raw(cqe.user_data() as *const RefCell<Inner<i32>>) };
            let _ = cell.borrow_mut().set(cqe.result());
        }
    }

    /// Fails synchronously if `flags` requests `O_CREAT`/`O_TMPFILE`
    /// without a mode — use [`IoEngine::open_with_mode`] for that case.
    pub fn open(&self, path: &CStr, flags: i32) -> Future<i32> {
        if flags & (libc::O_CREAT | libc::O_TMPFILE) != 0 {
            return make_exception_future(Error::InvalidArgument(
                "open: O_CREAT/O_TMPFILE requires a mode, use open_with_mode".into(),
            ));
        }
        self.open_with_mode(path, flags, 0)
    }

    pub fn open_with_mode(&self, path: &CStr, flags: i32, mode: u32) -> Future<i32> {
        let entry = opcode::OpenAt::new(types::Fd(libc::AT_FDCWD), path.as_ptr())
            .flags(flags)
            .mode(mode)
            .build();
        self.prepare(entry)
    }

    pub fn fsync(&self, fd: i32) -> Future<i32> {
        self.prepare(opcode::Fsync::new(types::Fd(fd)).build())
    }

    pub fn fdatasync(&self, fd: i32) -> Future<i32> {
        self.prepare(
            opcode::Fsync::new(types::Fd(fd))
                .flags(types::FsyncFlags::DATASYNC)
                .build(),
        )
    }

    /// # Safety
    /// `buf` must remain valid (not moved, dropped, or aliased) from
    /// this call until the returned future resolves.
    pub unsafe fn read(&self, fd: i32, offset: u64, buf: &mut [u8]) -> Future<i32> {
        let entry = opcode::Read::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
            .offset(offset)
            .build();
        self.prepare(entry)
    }

    /// # Safety
    /// See [`IoEngine::read`].
    pub unsafe fn write(&self, fd: i32, offset: u64, buf: &[u8]) -> Future<i32> {
        let entry = opcode::Write::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
            .offset(offset)
            .build();
        self.prepare(entry)
    }

    /// # Safety
    /// `iov` and every buffer it describes must remain valid until the
    /// returned future resolves.
    pub unsafe fn readv(&self, fd: i32, offset: u64, iov: &[libc::iovec]) -> Future<i32> {
        let entry = opcode::Readv::new(types::Fd(fd), iov.as_ptr(), iov.len() as u32)
            .offset(offset)
            .build();
        self.prepare(entry)
    }

    /// # Safety
    /// See [`IoEngine::readv`].
    pub unsafe fn writev(&self, fd: i32, offset: u64, iov: &[libc::iovec]) -> Future<i32> {
        let entry = opcode::Writev::new(types::Fd(fd), iov.as_ptr(), iov.len() as u32)
            .offset(offset)
            .build();
        self.prepare(entry)
    }

    /// # Safety
    /// See [`IoEngine::read`].
    pub unsafe fn send(&self, fd: i32, buf: &[u8], flags: i32) -> Future<i32> {
        let entry = opcode::Send::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
            .flags(flags)
            .build();
        self.prepare(entry)
    }

    /// # Safety
    /// See [`IoEngine::read`].
    pub unsafe fn recv(&self, fd: i32, buf: &mut [u8], flags: i32) -> Future<i32> {
        let entry = opcode::Recv::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
            .flags(flags)
            .build();
        self.prepare(entry)
    }

    pub fn close(&self, fd: i32) -> Future<i32> {
        self.prepare(opcode::Close::new(types::Fd(fd)).build())
    }

    /// # Safety
    /// `ts` must remain valid until the returned future resolves.
    pub unsafe fn timeout(&self, ts: &types::Timespec) -> Future<i32> {
        let entry = opcode::Timeout::new(ts as *const types::Timespec)
            .flags(io_uring::types::TimeoutFlags::ABS)
            .build();
        self.prepare(entry)
    }

    pub fn socket(&self, domain: i32, kind: i32, protocol: i32) -> Future<i32> {
        self.prepare(opcode::Socket::new(domain, kind, protocol).build())
    }

    /// # Safety
    /// `addr` must remain valid until the returned future resolves.
    pub unsafe fn connect(&self, fd: i32, addr: *const libc::sockaddr, addrlen: u32) -> Future<i32> {
        let entry = opcode::Connect::new(types::Fd(fd), addr, addrlen).build();
        self.prepare(entry)
    }

    /// # Safety
    /// `addr`/`addrlen` must remain valid until the returned future
    /// resolves.
    pub unsafe fn accept(
        &self,
        fd: i32,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
    ) -> Future<i32> {
        let entry = opcode::Accept::new(types::Fd(fd), addr, addrlen).build();
        self.prepare(entry)
    }

    /// Synchronous shim, mirroring `posix_call` — `setsockopt` has no
    /// `io_uring` opcode in the kernel versions this engine targets.
    pub fn setsockopt(
        &self,
        fd: i32,
        level: i32,
        optname: i32,
        optval: &[u8],
    ) -> Future<i32> {
        posix_call(|| unsafe {
            libc::setsockopt(
                fd,
                level,
                optname,
                optval.as_ptr() as *const libc::c_void,
                optval.len() as libc::socklen_t,
            )
        })
    }

    /// Synchronous shim, mirroring `posix_call`.
    pub fn bind(&self, fd: i32, addr: *const libc::sockaddr, addrlen: u32) -> Future<i32> {
        posix_call(|| unsafe { libc::bind(fd, addr, addrlen) })
    }

    /// Synchronous shim, mirroring `posix_call`.
    pub fn listen(&self, fd: i32, backlog: i32) -> Future<i32> {
        posix_call(|| unsafe { libc::listen(fd, backlog) })
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        debug_assert_eq!(self.pending.get(), 0, "IoEngine dropped with unsubmitted entries");
    }
}

/// Mirrors `posix_call`: runs a synchronous syscall and wraps its
/// result (`0` on success, the negated `errno` on failure) as an
/// already-settled future, instead of going through the ring.
fn posix_call(call: impl FnOnce() -> i32) -> Future<i32> {
    let ret = call();
    if ret < 0 {
        crate::promise::make_ready_future(-std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    } else {
        crate::promise::make_ready_future(0)
    }
}

/// Translate a raw (possibly negative) `io_uring`/syscall result into a
/// typed [`Error`], for call sites that need one. `context` is folded
/// into the resulting [`Error::System`] for diagnostics.
pub fn check(context: &'static str, result: i32) -> crate::error::Result<i32> {
    if result < 0 {
        Err(Error::from_negative_errno(context, result))
    } else {
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No other test in this crate's lib test binary touches
    // `DEFAULT_RING_ENTRIES` (none of the other modules' tests
    // construct an `IoEngine`), so this test owns the process-wide
    // OnceCell outright and can exercise its one-shot-set discipline
    // deterministically.
    #[test]
    fn default_ring_entries_can_be_set_at_most_once() {
        assert!(set_default_ring_entries(512).is_ok());
        assert_eq!(ring_entries(), 512);

        match set_default_ring_entries(1024) {
            Err(SetDefaultRingEntriesError(current)) => assert_eq!(current, 512),
            Ok(()) => panic!("a second call must fail once a default is set"),
        }
        assert_eq!(ring_entries(), 512, "a failed override must not change the default");
    }

    #[test]
    fn check_translates_negative_results_and_passes_through_non_negative_ones() {
        assert_eq!(check("read", 42).unwrap(), 42);
        assert!(matches!(check("read", -libc::ENOENT), Err(Error::System { .. })));
    }
}
