// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The one-shot value/error cell shared between a [`crate::Promise`] and a
//! [`crate::Future`].
//!
//! Grounded on `original_source/lib/reactor/future.hh`'s `State<Data>`:
//! a tag in `{Empty, Value, Error}` plus a payload, with settlement a
//! one-way transition out of `Empty`. Rust's `Rc` already provides the
//! reference count the C++ original hand-rolls via
//! `intrusive_ptr_add_ref`/`intrusive_ptr_release`, so `Inner<T>` only
//! needs to track the tag and, while unsettled, a waker for whichever
//! task is polling the `Future` half through `std::future::Future`.

use std::task::Waker;

use crate::error::Error;

pub(crate) enum Tag<T> {
    Empty,
    Value(T),
    Error(Error),
}

pub(crate) struct Inner<T> {
    pub(crate) tag: Tag<T>,
    pub(crate) waker: Option<Waker>,
    /// Set once `Promise::get_future` has handed out the read side. Used
    /// to distinguish "no Future was ever retrieved" (orphan detection)
    /// from "a Future exists but already consumed its single read".
    pub(crate) future_retrieved: bool,
}

impl<T> Inner<T> {
    pub(crate) fn new_empty() -> Self {
        Inner {
            tag: Tag::Empty,
            waker: None,
            future_retrieved: false,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        !matches!(self.tag, Tag::Empty)
    }

    pub(crate) fn has_failed(&self) -> bool {
        matches!(self.tag, Tag::Error(_))
    }

    /// Settle the cell with a value. Fails with [`Error::AlreadySatisfied`]
    /// if the cell already transitioned out of `Empty`.
    pub(crate) fn set(&mut self, value: T) -> Result<(), Error> {
        if self.is_ready() {
            return Err(Error::AlreadySatisfied);
        }
        self.tag = Tag::Value(value);
        self.wake();
        Ok(())
    }

    pub(crate) fn set_error(&mut self, error: Error) -> Result<(), Error> {
        if self.is_ready() {
            return Err(Error::AlreadySatisfied);
        }
        self.tag = Tag::Error(error);
        self.wake();
        Ok(())
    }

    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    /// Destructive read: takes the value or error out of the cell,
    /// leaving `Empty` behind. A second call therefore returns
    /// `NotReady`, matching the original's "drains the cell" discipline.
    pub(crate) fn take(&mut self) -> Result<T, Error> {
        match std::mem::replace(&mut self.tag, Tag::Empty) {
            Tag::Empty => Err(Error::NotReady),
            Tag::Value(v) => Ok(v),
            Tag::Error(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cell_is_empty_and_not_ready() {
        let cell: Inner<i32> = Inner::new_empty();
        assert!(!cell.is_ready());
        assert!(!cell.has_failed());
    }

    #[test]
    fn set_transitions_empty_to_value_exactly_once() {
        let mut cell = Inner::new_empty();
        assert!(cell.set(7).is_ok());
        assert!(cell.is_ready());
        assert!(!cell.has_failed());
        assert!(matches!(cell.set(8), Err(Error::AlreadySatisfied)));
    }

    #[test]
    fn set_error_transitions_empty_to_error_exactly_once() {
        let mut cell: Inner<i32> = Inner::new_empty();
        assert!(cell.set_error(Error::NotReady).is_ok());
        assert!(cell.is_ready());
        assert!(cell.has_failed());
        assert!(matches!(cell.set_error(Error::NotReady), Err(Error::AlreadySatisfied)));
    }

    #[test]
    fn take_on_empty_cell_fails_not_ready() {
        let mut cell: Inner<i32> = Inner::new_empty();
        assert!(matches!(cell.take(), Err(Error::NotReady)));
    }

    #[test]
    fn take_drains_the_value_leaving_empty_behind() {
        let mut cell = Inner::new_empty();
        cell.set(42).unwrap();
        assert_eq!(cell.take().unwrap(), 42);
        assert!(!cell.is_ready(), "take() must reset the tag to Empty");
        assert!(matches!(cell.take(), Err(Error::NotReady)));
    }

    #[test]
    fn take_rethrows_the_settled_error() {
        let mut cell: Inner<i32> = Inner::new_empty();
        cell.set_error(Error::BrokenPromise).unwrap();
        assert!(matches!(cell.take(), Err(Error::BrokenPromise)));
    }
}
