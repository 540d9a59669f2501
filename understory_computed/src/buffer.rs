// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reusable dependency buffer.
//!
//! Every evaluation of a computed property appends the reads it makes to a
//! per-thread [`DependencyBuffer`], tagged with a [`Cookie`] minted when the
//! evaluation began. Nested evaluations mint their own cookies, so an outer
//! evaluation only ever collects its own reads.

use core::cell::RefCell;

use crate::key::PropertyKey;
use crate::observable::SourceRef;

/// A generation tag identifying one evaluation.
///
/// Cookies come from a monotonically increasing counter and are never reused
/// within a thread.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Cookie(u64);

impl Cookie {
    /// Returns the raw generation number.
    #[must_use]
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// One recorded read.
#[derive(Clone, Debug)]
pub struct BufferEntry {
    /// The object that was read.
    pub source: SourceRef,
    /// The property that was read.
    pub property: PropertyKey,
    /// The evaluation that made the read.
    pub cookie: Cookie,
}

/// Scratch storage for dependency collection.
///
/// The buffer retains capacity across evaluations. Entries belonging to
/// an evaluation are removed by [`DependencyBuffer::drain_generation`] when
/// that evaluation ends, whether it returned a value, an error, or unwound.
///
/// # Example
///
/// ```rust
/// use understory_computed::{DependencyBuffer, PropertyKey, Reactive, SourceRef};
///
/// let object = Reactive::new();
/// let source = SourceRef::new(object.observable());
///
/// let mut buffer = DependencyBuffer::new();
/// let outer = buffer.begin();
/// buffer.record(source.clone(), PropertyKey::new("A"), outer);
///
/// let inner = buffer.begin();
/// buffer.record(source.clone(), PropertyKey::new("B"), inner);
///
/// let mut reads: Vec<(SourceRef, PropertyKey)> = Vec::new();
/// buffer.drain_generation(inner, &mut reads);
/// assert_eq!(reads.len(), 1);
/// assert_eq!(buffer.len(), 1);
///
/// reads.clear();
/// buffer.drain_generation(outer, &mut reads);
/// assert_eq!(reads[0].1, PropertyKey::new("A"));
/// assert!(buffer.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct DependencyBuffer {
    entries: Vec<BufferEntry>,
    generation: u64,
}

impl DependencyBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer with room for `capacity` reads.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            generation: 0,
        }
    }

    /// Starts a new evaluation and returns its cookie.
    pub fn begin(&mut self) -> Cookie {
        self.generation = self.generation.wrapping_add(1);
        Cookie(self.generation)
    }

    /// Returns the most recently minted generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Records that the evaluation tagged `cookie` read `property` of `source`.
    pub fn record(&mut self, source: SourceRef, property: PropertyKey, cookie: Cookie) {
        self.entries.push(BufferEntry {
            source,
            property,
            cookie,
        });
    }

    /// Moves every read tagged `cookie` into `out`, in recording order.
    ///
    /// Reads tagged with other cookies stay in the buffer in their original
    /// order.
    pub fn drain_generation<E>(&mut self, cookie: Cookie, out: &mut E)
    where
        E: Extend<(SourceRef, PropertyKey)>,
    {
        let Some(first) = self.entries.iter().position(|e| e.cookie == cookie) else {
            return;
        };
        out.extend(
            self.entries
                .extract_if(first.., |e| e.cookie == cookie)
                .map(|e| (e.source, e.property)),
        );
    }

    /// Returns the number of buffered reads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no reads are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the buffered reads.
    #[must_use]
    pub fn entries(&self) -> &[BufferEntry] {
        &self.entries
    }
}

std::thread_local! {
    static THREAD_BUFFER: RefCell<DependencyBuffer> = RefCell::new(DependencyBuffer::with_capacity(32));
}

/// Runs `f` with this thread's dependency buffer.
///
/// `f` must not evaluate computed properties.
pub(crate) fn with_thread_buffer<R>(f: impl FnOnce(&mut DependencyBuffer) -> R) -> R {
    THREAD_BUFFER.with(|buffer| f(&mut buffer.borrow_mut()))
}

/// Returns the number of reads buffered on this thread.
///
/// Outside of any evaluation this is zero.
#[must_use]
pub fn thread_buffer_len() -> usize {
    with_thread_buffer(|buffer| buffer.len())
}
