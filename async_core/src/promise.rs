// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Write side ([`Promise`]) and read side ([`Future`]) of a [`crate::state`]
//! cell, plus the `make_ready_future`/`make_exception_future` factories.
//!
//! Grounded on `original_source/lib/reactor/future.hh`'s `Promise<Data>`/
//! `Future<Data>`. The C++ original stores its own ref count inline and
//! manages it through `intrusive_ptr_add_ref`/`_release`; here `Rc`
//! already is that intrusive pointer, so `Promise`/`Future` are thin
//! wrappers around `Rc<RefCell<state::Inner<T>>>` and `Rc::strong_count`
//! stands in wherever the original inspects its ref count.

use std::cell::RefCell;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::Error;
use crate::state::Inner;

type Cell<T> = Rc<RefCell<Inner<T>>>;

/// Write side of a state cell. Created empty, or already-settled via
/// [`make_ready_future`]/[`make_exception_future`] (in which case no
/// `Promise` is ever observable — those factories build the cell
/// directly).
///
/// Dropping a `Promise` while its cell is still empty and a `Future`
/// remains attached settles the cell with [`Error::BrokenPromise`],
/// per spec invariant I6.
pub struct Promise<T> {
    state: Option<Cell<T>>,
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Promise { state: None }
    }
}

impl<T> Promise<T> {
    /// Create an empty promise. The backing cell is allocated lazily by
    /// the first call to [`Promise::get_future`] or [`Promise::set`].
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&mut self) -> &Cell<T> {
        self.state
            .get_or_insert_with(|| Rc::new(RefCell::new(Inner::new_empty())))
    }

    /// Retrieve the read side of this promise. May be called at most
    /// once; a second call fails with [`Error::AlreadyRetrieved`].
    pub fn get_future(&mut self) -> Result<Future<T>, Error> {
        let cell = self.cell().clone();
        {
            let mut inner = cell.borrow_mut();
            if inner.future_retrieved {
                return Err(Error::AlreadyRetrieved);
            }
            inner.future_retrieved = true;
        }
        Ok(Future { state: cell })
    }

    /// Settle the cell with a value. Fails with
    /// [`Error::AlreadySatisfied`] if already settled.
    pub fn set(&mut self, value: T) -> Result<(), Error> {
        self.cell().borrow_mut().set(value)
    }

    /// Settle the cell with an error. Fails with
    /// [`Error::AlreadySatisfied`] if already settled.
    pub fn set_error(&mut self, error: Error) -> Result<(), Error> {
        self.cell().borrow_mut().set_error(error)
    }

    /// True once a `Future` handle has been handed out, regardless of
    /// whether it is still alive. Used by the coroutine adapter to
    /// decide whether an error surfacing from a coroutine is orphaned.
    pub(crate) fn has_future(&self) -> bool {
        match &self.state {
            Some(cell) => cell.borrow().future_retrieved,
            None => false,
        }
    }

    /// Build a `Promise` directly from an existing cell, used by the
    /// I/O engine to reconstruct the write side placed in a submission
    /// entry's user-data word (see `io::engine`).
    pub(crate) fn from_cell(state: Cell<T>) -> Self {
        Promise { state: Some(state) }
    }

    /// Take ownership of the backing cell without running the
    /// broken-promise check on drop, so the caller can re-home it (e.g.
    /// cast it to a kernel submission entry's opaque user-data word).
    pub(crate) fn into_cell(mut self) -> Cell<T> {
        self.state
            .take()
            .unwrap_or_else(|| Rc::new(RefCell::new(Inner::new_empty())))
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(state) = &self.state {
            // strong_count > 1 means at least one Future still observes
            // this cell; settling it here is what lets that Future see
            // a BrokenPromise instead of hanging forever in NotReady.
            if Rc::strong_count(state) > 1 {
                let mut inner = state.borrow_mut();
                if !inner.is_ready() {
                    let _ = inner.set_error(Error::BrokenPromise);
                }
            }
        }
    }
}

/// Read side of a state cell. Move-only (no `Clone`/`Copy`); readable
/// exactly once with [`Future::get`], which drains the payload.
#[must_use = "a Future does nothing unless polled or awaited"]
pub struct Future<T> {
    state: Cell<T>,
}

impl<T> Future<T> {
    /// True once the cell has transitioned out of `Empty`.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// True once the cell has settled with an error.
    pub fn has_failed(&self) -> bool {
        self.state.borrow().has_failed()
    }

    /// Consume the value or rethrow the error. Fails with
    /// [`Error::NotReady`] if the cell has not settled yet. A second
    /// call always fails, since the first call drains the payload.
    pub fn get(&mut self) -> Result<T, Error> {
        self.state.borrow_mut().take()
    }
}

impl<T> StdFuture for Future<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.state.borrow_mut();
        if inner.is_ready() {
            Poll::Ready(inner.take())
        } else {
            inner.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Returns a future whose cell is already settled with `value`.
///
/// Grounded on `original_source/lib/reactor/future.hh`'s
/// `make_ready_future`.
pub fn make_ready_future<T>(value: T) -> Future<T> {
    Future {
        state: Rc::new(RefCell::new(Inner {
            tag: crate::state::Tag::Value(value),
            waker: None,
            future_retrieved: true,
        })),
    }
}

/// Returns a future whose cell is already settled with `error`.
///
/// Grounded on `original_source/lib/reactor/future.hh`'s
/// `make_exception_future`.
pub fn make_exception_future<T>(error: Error) -> Future<T> {
    Future {
        state: Rc::new(RefCell::new(Inner {
            tag: crate::state::Tag::Error(error),
            waker: None,
            future_retrieved: true,
        })),
    }
}

pub(crate) type CellHandle<T> = Cell<T>;
