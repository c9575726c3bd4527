// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The single-threaded scheduler: owns the task queue and the routine
//! map, drives one quantum per [`Reactor::run`] call.
//!
//! Grounded on `original_source/lib/reactor/reactor.hh`/`.cc`. The
//! original keeps a single process-wide `Reactor* g_instance` reached via
//! `Reactor::instance()`; spec.md §9 calls this out as a global
//! singleton whose "at-most-one-per-process" property must hold
//! regardless of encoding. This crate realizes it as a `thread_local!`
//! weak handle (the runtime is single-threaded by design, per spec.md
//! §5), matching the `other_examples` Uringy runtime's
//! `LOCAL_RUNTIME: RefCell<Option<EventLoop>>` pattern rather than a
//! process-wide mutable global.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::executable::{Executable, Routine, Task};
use crate::scope_guard::BoxedScopeGuard;

thread_local! {
    static CURRENT: RefCell<Option<Weak<Reactor>>> = RefCell::new(None);
}

/// The reactor's two queues: an append-only `new_tasks` staging list
/// spliced into `tasks` at the start of the next iteration (so a task
/// can never observe, or be disturbed by, insertions made during the
/// iteration that is currently running it), and an ordered map of
/// routines keyed by a small integer id.
pub struct Reactor {
    tasks: RefCell<Vec<Box<dyn Executable>>>,
    new_tasks: RefCell<Vec<Box<dyn Executable>>>,
    routines: RefCell<BTreeMap<u16, Box<dyn Executable>>>,
    has_progress: Cell<bool>,
}

impl Reactor {
    /// Construct the process's reactor. Fatal (`panic!`) if one already
    /// exists on this thread, matching spec.md §4.3's "construction
    /// while another exists is fatal".
    pub fn new() -> Rc<Reactor> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(weak) = current.as_ref() {
                if weak.upgrade().is_some() {
                    panic!("a Reactor already exists on this thread");
                }
            }
            let reactor = Rc::new(Reactor {
                tasks: RefCell::new(Vec::new()),
                new_tasks: RefCell::new(Vec::new()),
                routines: RefCell::new(BTreeMap::new()),
                has_progress: Cell::new(false),
            });
            *current = Some(Rc::downgrade(&reactor));
            reactor
        })
    }

    /// Fetch the thread's active reactor. Fatal if none exists.
    pub fn current() -> Rc<Reactor> {
        CURRENT
            .with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
            .unwrap_or_else(|| panic!("no active Reactor on this thread"))
    }

    /// O(1) append to the staging queue. The executable is driven no
    /// earlier than the next call to [`Reactor::run`].
    pub fn add_task<E: Executable + 'static>(&self, task: E) {
        self.new_tasks.borrow_mut().push(Box::new(task));
    }

    pub(crate) fn add_task_fn<F>(&self, action: F)
    where
        F: FnOnce() + 'static,
    {
        self.add_task(Task::new(action));
    }

    /// Register a routine, invoked once per [`Reactor::run`] call in
    /// ascending id order. Returns a guard whose drop removes the
    /// routine, mirroring `original_source/lib/reactor/reactor.cc`'s
    /// `add_routine`'s id-probing scheme.
    pub fn add_routine<E: Executable + 'static>(self: &Rc<Self>, routine: E) -> BoxedScopeGuard {
        let mut routines = self.routines.borrow_mut();
        let start = routines.len() as u32;
        let mut id = start;
        while routines.contains_key(&(id as u16)) {
            id = (id + 1) % (u16::MAX as u32 + 1);
            if id == start {
                panic!("Reactor routine table exhausted (2^16 routines registered)");
            }
        }
        let id = id as u16;
        routines.insert(id, Box::new(routine));
        drop(routines);

        let weak = Rc::downgrade(self);
        BoxedScopeGuard::new(move || {
            if let Some(reactor) = weak.upgrade() {
                reactor.remove_routine(id);
            }
        })
    }

    fn remove_routine(&self, id: u16) {
        self.routines.borrow_mut().remove(&id);
    }

    /// True iff at least one task completed during the last call to
    /// [`Reactor::run`]. Consulted by the I/O engine to decide whether
    /// it may block waiting for a completion.
    pub fn has_progress(&self) -> bool {
        self.has_progress.get()
    }

    /// Drive one scheduler quantum: splice staged tasks in, run every
    /// task once (removing those that report completion), record whether
    /// any task completed, then run every routine once in ascending id
    /// order.
    pub fn run(&self) {
        {
            let mut new_tasks = self.new_tasks.borrow_mut();
            if !new_tasks.is_empty() {
                self.tasks.borrow_mut().append(&mut new_tasks);
            }
        }

        let mut progress = false;
        {
            let mut tasks = self.tasks.borrow_mut();
            let mut remaining = Vec::with_capacity(tasks.len());
            for mut task in tasks.drain(..) {
                if task.try_execute() {
                    progress = true;
                } else {
                    remaining.push(task);
                }
            }
            *tasks = remaining;
        }
        self.has_progress.set(progress);

        let mut routines = self.routines.borrow_mut();
        for routine in routines.values_mut() {
            routine.try_execute();
        }
    }
}

/// A routine built from a plain `FnMut`, for callers that don't need a
/// full `Routine`/`Executable` impl of their own.
pub fn make_routine<F>(body: F) -> Routine
where
    F: FnMut() + 'static,
{
    Routine::new(body)
}
