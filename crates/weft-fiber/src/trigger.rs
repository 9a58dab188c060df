// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ordered trigger lists.
//!
//! Each fiber carries two lists: `on_yield` fires on every yield and
//! `on_stop` fires exactly once when the fiber terminates. Callbacks
//! return a status instead of escaping with an error: a failure is
//! logged by the runner and never installed as a new diagnostic, and a
//! callback removes itself by returning [`TriggerAction::Remove`].

use tracing::error;

/// What the runner should do with a trigger after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Keep the trigger registered.
    Keep,
    /// Unregister the trigger.
    Remove,
}

/// Identifies one registered trigger within its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerId(u64);

type TriggerFn = Box<dyn FnMut() -> anyhow::Result<TriggerAction>>;

struct TriggerEntry {
    id: u64,
    run: TriggerFn,
}

/// An append-only list of callbacks run in registration order.
#[derive(Default)]
pub struct TriggerList {
    entries: Vec<TriggerEntry>,
    next_id: u64,
}

impl TriggerList {
    /// Register a callback at the tail of the list.
    pub fn add<F>(&mut self, run: F) -> TriggerId
    where
        F: FnMut() -> anyhow::Result<TriggerAction> + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(TriggerEntry {
            id,
            run: Box::new(run),
        });
        TriggerId(id)
    }

    /// Unregister a callback. Unknown ids are ignored.
    pub fn clear(&mut self, id: TriggerId) {
        self.entries.retain(|e| e.id != id.0);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run all triggers in registration order. Failures are logged and
    /// do not stop the remaining triggers.
    pub(crate) fn run(&mut self, context: &str) {
        self.run_inner(context, false);
    }

    /// Run all triggers in reverse registration order.
    pub(crate) fn run_reverse(&mut self, context: &str) {
        self.run_inner(context, true);
    }

    fn run_inner(&mut self, context: &str, reverse: bool) {
        let mut keep = |entry: &mut TriggerEntry| match (entry.run)() {
            Ok(TriggerAction::Keep) => true,
            Ok(TriggerAction::Remove) => false,
            Err(err) => {
                error!(context, error = %err, "trigger failed");
                true
            }
        };
        let taken = std::mem::take(&mut self.entries);
        let mut survivors = Vec::with_capacity(taken.len());
        if reverse {
            for mut entry in taken.into_iter().rev() {
                if keep(&mut entry) {
                    survivors.push(entry);
                }
            }
            survivors.reverse();
        } else {
            for mut entry in taken {
                if keep(&mut entry) {
                    survivors.push(entry);
                }
            }
        }
        // Triggers registered from inside a callback landed in
        // self.entries; they belong after the surviving ones.
        survivors.append(&mut self.entries);
        self.entries = survivors;
    }

    /// Splice `newer` (a list that accumulated registrations while this
    /// one was detached for running) onto the tail.
    pub(crate) fn merge_back(&mut self, mut newer: TriggerList) {
        self.entries.append(&mut newer.entries);
        self.next_id = self.next_id.max(newer.next_id);
    }
}

impl std::fmt::Debug for TriggerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerList")
            .field("len", &self.entries.len())
            .finish()
    }
}
