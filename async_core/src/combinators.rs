// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! `when_all`/`when_any` over this crate's own [`crate::promise::Future`].
//!
//! Grounded on `original_source/lib/reactor/when.hh`. The original is a
//! variadic template over any awaitable; Rust has no variadic generics,
//! and `when_any`'s polling loop specifically needs a non-consuming
//! `is_ready()` check that `std::future::Future` doesn't expose. Both
//! combinators are realized here over a homogeneous
//! `Vec<crate::promise::Future<T>>` instead — the common case for a
//! reactor (awaiting N instances of the same kind of operation) and the
//! shape every caller in this codebase actually needs.

use crate::coroutine::yield_now;
use crate::error::Result;
use crate::promise::Future as PromiseFuture;

/// Await every future in `futs`, in order, and collect their results.
///
/// Grounded on `when_all`'s sequential `co_await` loop — this is not
/// concurrent dispatch, just a convenience over awaiting a collection
/// one at a time.
pub async fn when_all<T>(futs: Vec<PromiseFuture<T>>) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(futs.len());
    for mut fut in futs {
        results.push((&mut fut).await?);
    }
    Ok(results)
}

/// Wait until at least one future in `futs` is ready, yielding to the
/// reactor between polls. Returns the index of the first ready future
/// together with the whole collection (including the still-pending
/// ones), so the caller can drain the ready one with
/// [`crate::promise::Future::get`] and decide what to do with the rest.
///
/// Grounded on `when_any`'s round-robin `is_ready()` poll loop.
pub async fn when_any<T>(futs: Vec<PromiseFuture<T>>) -> (usize, Vec<PromiseFuture<T>>) {
    let mut futs = futs;
    loop {
        if let Some(index) = futs.iter().position(PromiseFuture::is_ready) {
            return (index, futs);
        }
        yield_now().await;
    }
}
