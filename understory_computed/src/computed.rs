// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Computed properties.
//!
//! A [`Computed`] is a named derivation. Evaluating it runs the derivation
//! against a fresh [`Deps`] and then replaces the property's dependency edges
//! on the owning [`Reactive`] with exactly the reads that evaluation made.

use core::cell::RefCell;
use core::fmt;

use smallvec::SmallVec;
use tracing::trace;

use crate::buffer::{Cookie, with_thread_buffer};
use crate::deps::Deps;
use crate::key::PropertyKey;
use crate::observable::SourceRef;
use crate::reactive::{Reactive, ReactiveObject};

/// A property whose value is derived from other properties.
///
/// The derivation reads its inputs through the [`Deps`] it is given. After
/// every evaluation the property depends on exactly what that evaluation
/// read, so conditional reads produce conditional dependencies.
///
/// Derivations that can fail return `Result`; the edges recorded before the
/// failure still replace the old ones.
///
/// ```rust
/// use core::cell::Cell;
/// use understory_computed::{Computed, Property, Reactive, ReactiveObject};
///
/// struct Rect {
///     reactive: Reactive,
///     width: Cell<f64>,
///     height: Cell<f64>,
/// }
///
/// impl ReactiveObject for Rect {
///     fn reactive(&self) -> &Reactive {
///         &self.reactive
///     }
/// }
///
/// impl Rect {
///     const WIDTH: Property<Self, f64> = Property::new("Width", |r| r.width.get());
///     const HEIGHT: Property<Self, f64> = Property::new("Height", |r| r.height.get());
///     const AREA: Computed<Self, f64> = Computed::new("Area", |r, deps| {
///         deps.get(r, &Self::WIDTH) * deps.get(r, &Self::HEIGHT)
///     });
/// }
///
/// let rect = Rect {
///     reactive: Reactive::new(),
///     width: Cell::new(2.0),
///     height: Cell::new(3.0),
/// };
/// assert_eq!(Rect::AREA.eval(&rect), 6.0);
/// assert_eq!(rect.reactive().dependencies(Rect::AREA.key()).len(), 2);
/// ```
pub struct Computed<O, T> {
    key: PropertyKey,
    derive: fn(&O, &mut Deps) -> T,
}

impl<O, T> Computed<O, T> {
    /// Creates a computed property named `name`.
    #[must_use]
    #[inline]
    pub const fn new(name: &'static str, derive: fn(&O, &mut Deps) -> T) -> Self {
        Self {
            key: PropertyKey::new(name),
            derive,
        }
    }

    /// Returns the key of this property.
    #[must_use]
    #[inline]
    pub const fn key(&self) -> PropertyKey {
        self.key
    }

    /// Runs the derivation without touching any dependency edges.
    pub fn derive_untracked(&self, object: &O) -> T {
        (self.derive)(object, &mut Deps::untracked())
    }
}

impl<O: ReactiveObject, T> Computed<O, T> {
    /// Evaluates the property and refreshes its dependency edges.
    ///
    /// If the derivation unwinds, the reads made before the panic still
    /// replace the old edges and the thread's dependency buffer is restored.
    pub fn eval(&self, object: &O) -> T {
        let mut evaluation = Evaluation::begin(object.reactive(), self.key);
        (self.derive)(object, &mut evaluation.deps)
    }

    /// Evaluates the property through a [`Stored`] cache.
    ///
    /// On a cached object whose copy of this property is still valid the
    /// stored value is returned without running the derivation. Otherwise the
    /// property is evaluated, and the stored value is only replaced when the
    /// new value differs from it.
    pub fn eval_stored(&self, object: &O, slot: &Stored<T>) -> T
    where
        T: Clone + PartialEq,
    {
        let reactive = object.reactive();
        if reactive.is_property_valid(self.key)
            && let Some(value) = slot.get()
        {
            trace!(property = %self.key, "cached value reused");
            return value;
        }
        let value = slot.store(self.eval(object));
        reactive.set_property_valid(self.key);
        value
    }
}

impl<O, T> Copy for Computed<O, T> {}

impl<O, T> Clone for Computed<O, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<O, T> fmt::Debug for Computed<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("key", &self.key)
            .field("type", &core::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// One in-flight evaluation.
///
/// Dropping it collects the reads tagged with its cookie and hands them to
/// the owning object, on both normal return and unwind.
struct Evaluation<'a> {
    reactive: &'a Reactive,
    target: PropertyKey,
    cookie: Cookie,
    deps: Deps,
}

impl<'a> Evaluation<'a> {
    fn begin(reactive: &'a Reactive, target: PropertyKey) -> Self {
        let cookie = with_thread_buffer(|buffer| buffer.begin());
        trace!(property = %target, cookie = cookie.get(), "evaluation started");
        Self {
            reactive,
            target,
            cookie,
            deps: Deps::recording(cookie),
        }
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        let mut reads: SmallVec<[(SourceRef, PropertyKey); 8]> = SmallVec::new();
        with_thread_buffer(|buffer| buffer.drain_generation(self.cookie, &mut reads));
        self.reactive.reconcile(self.target, reads);
    }
}

/// Storage for the last value of a computed property.
///
/// Used with [`Computed::eval_stored`]. The slot keeps its old value when a
/// re-evaluation produces an equal one, so consumers holding on to the old
/// value keep seeing the same instance.
pub struct Stored<T> {
    value: RefCell<Option<T>>,
}

impl<T> Stored<T> {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: RefCell::new(None),
        }
    }

    /// Empties the slot.
    pub fn clear(&self) {
        self.value.replace(None);
    }

    /// Returns `true` if the slot holds a value.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.borrow().is_some()
    }
}

impl<T: Clone> Stored<T> {
    /// Returns a copy of the stored value.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    /// Stores `value` unless an equal value is already stored, and returns
    /// whatever the slot holds afterwards.
    pub fn store(&self, value: T) -> T
    where
        T: PartialEq,
    {
        let mut slot = self.value.borrow_mut();
        match &*slot {
            Some(old) if *old == value => old.clone(),
            _ => {
                *slot = Some(value.clone());
                value
            }
        }
    }
}

impl<T> Default for Stored<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Stored<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.try_borrow() {
            Ok(value) => f.debug_tuple("Stored").field(&*value).finish(),
            Err(_) => f.write_str("Stored(<borrowed>)"),
        }
    }
}
