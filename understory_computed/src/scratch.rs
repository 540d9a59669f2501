// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reusable per-thread scratch for change closures.
//!
//! Announcing a change computes the set of properties that transitively
//! depend on it. The set is appended to one per-thread list; a listener that
//! announces another change while the first is still being delivered appends
//! after it and truncates back when done.

use core::cell::RefCell;

use crate::key::PropertyKey;

std::thread_local! {
    static CHANGED: RefCell<Vec<PropertyKey>> = RefCell::new(Vec::with_capacity(16));
}

/// The region of the per-thread change list owned by one announcement.
///
/// Dropping the span truncates the list back to where the span started.
pub(crate) struct ChangeSpan {
    start: usize,
}

impl ChangeSpan {
    pub(crate) fn open() -> Self {
        let start = CHANGED.with(|list| list.borrow().len());
        Self { start }
    }

    /// Appends `key` unless the span already holds it.
    ///
    /// Returns `true` if the key was appended.
    pub(crate) fn push(&self, key: PropertyKey) -> bool {
        CHANGED.with(|list| {
            let mut list = list.borrow_mut();
            if list[self.start..].contains(&key) {
                return false;
            }
            list.push(key);
            true
        })
    }

    /// Returns the number of keys in the span.
    pub(crate) fn len(&self) -> usize {
        CHANGED.with(|list| list.borrow().len() - self.start)
    }

    /// Returns the key at position `index` of the span.
    pub(crate) fn get(&self, index: usize) -> PropertyKey {
        CHANGED.with(|list| list.borrow()[self.start + index])
    }
}

impl Drop for ChangeSpan {
    fn drop(&mut self) {
        CHANGED.with(|list| list.borrow_mut().truncate(self.start));
    }
}
