// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A coroutine-aware counting semaphore with FIFO wakeup.
//!
//! Grounded on `original_source/lib/reactor/sync.hh`/`.cc`'s
//! `Semaphore`: `wait()` returns a `Future<Defer<>>` holding the permit,
//! already-ready if a slot was free; otherwise a waiter is queued and
//! `signal_later()` hands the permit directly to the oldest waiter
//! instead of incrementing the counter and letting an arbitrary waiter
//! race for it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::promise::{make_ready_future, Future, Promise};
use crate::scope_guard::BoxedScopeGuard;

struct State {
    count: u32,
    waiters: VecDeque<Promise<BoxedScopeGuard>>,
}

/// A counting semaphore whose permits are represented as
/// [`BoxedScopeGuard`]s: holding one means holding the slot, dropping it
/// releases the slot back (to the next waiter, FIFO, or to the counter
/// if none are waiting).
#[derive(Clone)]
pub struct Semaphore {
    state: Rc<RefCell<State>>,
}

impl Semaphore {
    pub fn new(count: u32) -> Self {
        Semaphore {
            state: Rc::new(RefCell::new(State {
                count,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Acquire a permit. Resolves immediately if one is free; otherwise
    /// the returned future resolves once an earlier waiter releases its
    /// permit back to this semaphore.
    pub fn wait(&self) -> Future<BoxedScopeGuard> {
        let mut state = self.state.borrow_mut();
        if state.count > 0 {
            state.count -= 1;
            drop(state);
            make_ready_future(self.signal_later())
        } else {
            let mut promise = Promise::new();
            let future = promise
                .get_future()
                .expect("a freshly created promise's future has never been retrieved");
            state.waiters.push_back(promise);
            future
        }
    }

    /// True if a call to [`Semaphore::wait`] right now would resolve
    /// without queuing.
    pub fn would_wait_immediately(&self) -> bool {
        self.state.borrow().count > 0
    }

    fn signal_later(&self) -> BoxedScopeGuard {
        let state = self.state.clone();
        BoxedScopeGuard::new(move || {
            let mut guard = state.borrow_mut();
            match guard.waiters.pop_front() {
                Some(mut waiter) => {
                    drop(guard);
                    let permit = Semaphore {
                        state: state.clone(),
                    }
                    .signal_later();
                    let _ = waiter.set(permit);
                }
                None => {
                    guard.count += 1;
                }
            }
        })
    }
}
