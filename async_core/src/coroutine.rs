// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Coroutine spawning and yielding on top of real `async`/`.await`.
//!
//! Grounded on `original_source/lib/reactor/coroutine.hh`'s
//! `BaseCoroPromise<Self>`. The original hand-rolls a C++20 coroutine
//! promise type whose `await_transform` builds a reactor `Task` per
//! suspend point (predicate = `future.is_ready()`, action =
//! `handle.resume()`) and whose `unhandled_exception` logs under a
//! distinguished category when the coroutine's own `Future` was never
//! retrieved. Rust's `async fn` already compiles down to a single
//! `std::future::Future` state machine, so there is no per-suspend-point
//! hook to reimplement; instead this module polls that whole state
//! machine with a real `Waker` (spec.md §9's "wake-on-settle" variant)
//! built by `waker_fn`, whose callback re-enqueues a one-shot reactor
//! `Task` that polls again.

use std::cell::RefCell;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use waker_fn::waker_fn;

use crate::error::Error;
use crate::promise::{Future, Promise};
use crate::reactor::Reactor;

type BoxFuture<T> = Pin<Box<dyn StdFuture<Output = Result<T, Error>>>>;

fn drive<F, T>(fut: F, promise: Promise<T>)
where
    F: StdFuture<Output = Result<T, Error>> + 'static,
    T: 'static,
{
    let fut: Rc<RefCell<BoxFuture<T>>> = Rc::new(RefCell::new(Box::pin(fut)));
    let promise = Rc::new(RefCell::new(promise));
    poll_coroutine(fut, promise);
}

fn poll_coroutine<T>(fut: Rc<RefCell<BoxFuture<T>>>, promise: Rc<RefCell<Promise<T>>>)
where
    T: 'static,
{
    let waker = {
        let fut = fut.clone();
        let promise = promise.clone();
        waker_fn(move || {
            let fut = fut.clone();
            let promise = promise.clone();
            Reactor::current().add_task_fn(move || poll_coroutine(fut, promise));
        })
    };
    let mut cx = Context::from_waker(&waker);

    let poll = fut.borrow_mut().as_mut().poll(&mut cx);
    if let Poll::Ready(result) = poll {
        let mut promise = promise.borrow_mut();
        let had_future = promise.has_future();
        let settle = match result {
            Ok(value) => promise.set(value),
            Err(error) => {
                if !had_future {
                    log::error!(
                        target: "orphan",
                        "coroutine completed with an error nobody retrieved: {error}"
                    );
                }
                promise.set_error(error)
            }
        };
        settle.expect("a freshly-completed coroutine's own promise is never pre-settled");
    }
}

/// Spawn `fut` on the current thread's reactor and return a handle to
/// its eventual result. Panics if no [`Reactor`] is active.
pub fn spawn<F, T>(fut: F) -> Future<T>
where
    F: StdFuture<Output = Result<T, Error>> + 'static,
    T: 'static,
{
    let mut promise = Promise::new();
    let future = promise
        .get_future()
        .expect("a freshly created promise's future has never been retrieved");
    drive(fut, promise);
    future
}

/// Spawn `fut` without retaining a handle to its result. If it
/// completes with an error, that error is logged under the `orphan`
/// target (see [`spawn`]'s doc comment) rather than surfaced anywhere.
pub fn spawn_detached<F, T>(fut: F)
where
    F: StdFuture<Output = Result<T, Error>> + 'static,
    T: 'static,
{
    drive(fut, Promise::new());
}

/// Suspend the calling coroutine for exactly one reactor iteration.
///
/// Grounded on `original_source/lib/reactor/coroutine.hh`'s
/// `await_transform(Yield)`: an unconditional re-enqueue with no
/// readiness predicate.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// The future returned by [`yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl StdFuture for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        let waker = cx.waker().clone();
        Reactor::current().add_task_fn(move || waker.wake());
        Poll::Pending
    }
}
