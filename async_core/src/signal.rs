// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Signal delivery bridged into the reactor through `signalfd` plus a
//! dedicated, non-blocking `epoll` descriptor.
//!
//! Grounded on `original_source/lib/reactor/signal.cc`'s `handle_signals`:
//! block the signal in the process mask, create a non-blocking
//! `signalfd`, register it with edge-triggered oneshot interest, and on
//! each notification read one `signalfd_siginfo`, invoke the handler,
//! then rearm. That file drives its epoll registration through
//! `IoEngine::instance().epoll_ctl(...)`, but the `io.hh` variant
//! retrieved alongside it (see `original_source/lib/reactor/io/io.hh`)
//! exposes no `epoll_ctl`/`signalfd` methods — spec.md §9 notes that two
//! parallel source variants disagree on whether this bridge lives on the
//! `IoEngine` at all. This module resolves that by owning its epoll
//! descriptor directly, which is still "the only reason the engine
//! maintains an internal epoll descriptor" (spec.md §4.6) — just scoped
//! to its own small bridge rather than folded into `io::IoEngine`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::executable::Routine;
use crate::promise::{Future, Promise};
use crate::reactor::Reactor;
use crate::scope_guard::BoxedScopeGuard;

thread_local! {
    static CURRENT: RefCell<Option<Weak<SignalBridge>>> = RefCell::new(None);
}

const MAX_EVENTS: usize = 16;

fn last_os_error(context: &'static str) -> Error {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    Error::from_negative_errno(context, -errno)
}

/// The kernel's `signalfd_siginfo` layout. Only `ssi_signo` is consumed
/// here; the remaining fields exist so the struct's size matches what
/// the kernel actually writes, per `signalfd(2)`.
#[repr(C)]
struct SignalfdSiginfo {
    ssi_signo: u32,
    ssi_errno: i32,
    ssi_code: i32,
    ssi_pid: u32,
    ssi_uid: u32,
    ssi_fd: i32,
    ssi_tid: u32,
    ssi_band: u32,
    ssi_overrun: u32,
    ssi_trapno: u32,
    ssi_status: i32,
    ssi_int: i32,
    ssi_ptr: u64,
    ssi_utime: u64,
    ssi_stime: u64,
    ssi_addr: u64,
    ssi_addr_lsb: u16,
    _pad2: u16,
    ssi_syscall: i32,
    ssi_call_addr: u64,
    ssi_arch: u32,
    _pad: [u8; 28],
}

/// One thread's signal bridge: a single `epoll` descriptor, polled
/// non-blockingly once per reactor iteration, multiplexing any number
/// of oneshot-registered file descriptors (in practice, one `signalfd`
/// per distinct signal `handle_signals` is asked to watch).
pub struct SignalBridge {
    epoll_fd: i32,
    waiters: RefCell<HashMap<u64, Promise<()>>>,
    next_token: Cell<u64>,
    poll_guard: RefCell<Option<BoxedScopeGuard>>,
}

impl SignalBridge {
    /// Create the bridge and register its poll routine with `reactor`.
    /// Fatal if one already exists on this thread, mirroring
    /// [`crate::reactor::Reactor::new`] and [`crate::io::IoEngine::new`].
    pub fn new(reactor: &Rc<Reactor>) -> Result<Rc<SignalBridge>> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(weak) = current.as_ref() {
                if weak.upgrade().is_some() {
                    panic!("a SignalBridge already exists on this thread");
                }
            }

            // Safety: a plain syscall with no pointers to misuse.
            let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if epoll_fd < 0 {
                return Err(last_os_error("epoll_create1"));
            }

            let bridge = Rc::new(SignalBridge {
                epoll_fd,
                waiters: RefCell::new(HashMap::new()),
                next_token: Cell::new(0),
                poll_guard: RefCell::new(None),
            });

            let weak_bridge = Rc::downgrade(&bridge);
            let guard = reactor.add_routine(Routine::new(move || {
                if let Some(bridge) = weak_bridge.upgrade() {
                    bridge.poll_once();
                }
            }));
            *bridge.poll_guard.borrow_mut() = Some(guard);

            *current = Some(Rc::downgrade(&bridge));
            Ok(bridge)
        })
    }

    /// Fetch the thread's active bridge. Fatal if none exists.
    pub fn current() -> Rc<SignalBridge> {
        CURRENT
            .with(|c| c.borrow().as_ref().and_then(Weak::upgrade))
            .unwrap_or_else(|| panic!("no active SignalBridge on this thread"))
    }

    /// Non-blocking `epoll_wait`, matching the single-block rule
    /// (spec.md §5): this bridge never blocks, only
    /// `IoEngine::complete_ready` may.
    fn poll_once(&self) {
        let mut events: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        // Safety: `events` is a correctly sized, uniquely owned buffer
        // for the duration of this call; a zero timeout never blocks.
        let n = unsafe { libc::epoll_wait(self.epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                log::error!(target: "signal", "epoll_wait failed: {err}");
            }
            return;
        }
        let mut waiters = self.waiters.borrow_mut();
        for ev in &events[..n as usize] {
            let token = ev.u64;
            if let Some(mut promise) = waiters.remove(&token) {
                let _ = promise.set(());
            }
        }
    }

    /// Register `fd` for oneshot `events` under a fresh token (if
    /// `token` is `None`) or rearm an existing registration (if
    /// `Some`, used by the oneshot-rearm discipline after each
    /// notification). Returns the token and a future that resolves the
    /// next time `fd` reports readiness.
    fn watch(&self, fd: i32, events: u32, token: Option<u64>) -> Result<(u64, Future<()>)> {
        let (op, token) = match token {
            Some(token) => (libc::EPOLL_CTL_MOD, token),
            None => {
                let token = self.next_token.get();
                self.next_token.set(token + 1);
                (libc::EPOLL_CTL_ADD, token)
            }
        };

        let mut promise: Promise<()> = Promise::new();
        let future = promise
            .get_future()
            .expect("a freshly created promise's future has never been retrieved");
        self.waiters.borrow_mut().insert(token, promise);

        let mut ev = libc::epoll_event {
            events: events | libc::EPOLLONESHOT as u32,
            u64: token,
        };
        // Safety: `ev` is valid and uniquely owned for this call;
        // `epoll_ctl` does not retain the pointer past it.
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret < 0 {
            self.waiters.borrow_mut().remove(&token);
            return Err(last_os_error("epoll_ctl"));
        }
        Ok((token, future))
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        // Safety: `epoll_fd` was opened by this struct and is closed
        // exactly once, here.
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

/// Block `signum` in the process signal mask, bridge its delivery
/// through a `signalfd` registered on the current thread's
/// [`SignalBridge`], and invoke `handler` once per delivery, forever.
///
/// Grounded on `original_source/lib/reactor/signal.cc`'s
/// `handle_signals`; typically driven with [`crate::coroutine::spawn_detached`]
/// so it runs for the lifetime of the reactor.
pub async fn handle_signals<F, Fut>(signum: i32, mut handler: F) -> Result<()>
where
    F: FnMut(i32) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut mask: libc::sigset_t = unsafe { std::mem::zeroed() };
    // Safety: `mask` is a valid, uniquely owned sigset_t for these calls.
    unsafe {
        libc::sigemptyset(&mut mask);
        libc::sigaddset(&mut mask, signum);
        if libc::sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()) < 0 {
            return Err(last_os_error("sigprocmask"));
        }
    }

    // Safety: `mask` outlives this call; fd is a process-global
    // resource this function owns until it returns (it never closes it
    // explicitly, mirroring `handle_signals`' unbounded lifetime loop).
    let fd = unsafe { libc::signalfd(-1, &mask, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC) };
    if fd < 0 {
        return Err(last_os_error("signalfd"));
    }

    let bridge = SignalBridge::current();
    let (mut token, mut ready) = bridge.watch(fd, libc::EPOLLIN as u32, None)?;

    loop {
        (&mut ready).await?;

        let mut info: SignalfdSiginfo = unsafe { std::mem::zeroed() };
        // Safety: `info` is sized exactly to what the kernel writes for
        // one `signalfd_siginfo`; `fd` was just reported readable.
        let n = unsafe {
            libc::read(
                fd,
                &mut info as *mut SignalfdSiginfo as *mut libc::c_void,
                std::mem::size_of::<SignalfdSiginfo>(),
            )
        };
        if n < 0 {
            return Err(last_os_error("read(signalfd)"));
        }

        handler(info.ssi_signo as i32).await?;

        let (new_token, next) = bridge.watch(fd, libc::EPOLLIN as u32, Some(token))?;
        token = new_token;
        ready = next;
    }
}
