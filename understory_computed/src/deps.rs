// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The tracking context handed to derivations.

use core::fmt;
use core::marker::PhantomData;
use std::rc::Rc;

use crate::buffer::{Cookie, with_thread_buffer};
use crate::computed::{Computed, Stored};
use crate::key::{Property, PropertyKey};
use crate::observable::{Observable, Observe, SourceRef};
use crate::reactive::ReactiveObject;

/// Records the reads a derivation makes.
///
/// A derivation receives `&mut Deps` and reads its inputs through it. Each
/// tracked read becomes a dependency edge of the property being computed
/// once the derivation returns. Reads made directly on objects, without
/// going through `Deps`, are not tracked.
///
/// `Deps` is neither `Send` nor `Sync`: dependency collection is per thread.
pub struct Deps {
    cookie: Option<Cookie>,
    _not_send: PhantomData<*const ()>,
}

impl Deps {
    pub(crate) fn recording(cookie: Cookie) -> Self {
        Self {
            cookie: Some(cookie),
            _not_send: PhantomData,
        }
    }

    /// Creates a context that records nothing.
    ///
    /// Useful for calling a derivation outside of evaluation, for example in
    /// tests or from [`Computed::derive_untracked`].
    #[must_use]
    pub fn untracked() -> Self {
        Self {
            cookie: None,
            _not_send: PhantomData,
        }
    }

    /// Returns `true` if reads are being recorded.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.cookie.is_some()
    }

    /// Records a read of `property` on `source` without reading anything.
    pub fn track(&mut self, source: Rc<dyn Observable>, property: PropertyKey) {
        if let Some(cookie) = self.cookie {
            with_thread_buffer(|buffer| buffer.record(SourceRef::new(source), property, cookie));
        }
    }

    /// Reads a stored property and records the read.
    pub fn get<O, T>(&mut self, object: &O, property: &Property<O, T>) -> T
    where
        O: Observe + ?Sized,
    {
        if self.is_tracking() {
            self.track(object.observable(), property.key());
        }
        property.get(object)
    }

    /// Evaluates a computed property and records the read.
    pub fn get_computed<O, T>(&mut self, object: &O, computed: &Computed<O, T>) -> T
    where
        O: ReactiveObject,
    {
        if self.is_tracking() {
            self.track(object.observable(), computed.key());
        }
        computed.eval(object)
    }

    /// Reads a computed property through its [`Stored`] slot and records the
    /// read.
    ///
    /// On a cached object whose copy is still valid the derivation does not
    /// run again.
    pub fn get_stored<O, T>(
        &mut self,
        object: &O,
        computed: &Computed<O, T>,
        slot: &Stored<T>,
    ) -> T
    where
        O: ReactiveObject,
        T: Clone + PartialEq,
    {
        if self.is_tracking() {
            self.track(object.observable(), computed.key());
        }
        computed.eval_stored(object, slot)
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deps")
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}
