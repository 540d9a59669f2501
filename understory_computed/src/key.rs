// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property identification types.
//!
//! This module provides [`PropertyKey`] for naming a property inside change
//! notifications and [`Property<O, T>`] for typed, readable stored properties.

use core::fmt;
use core::hash::{Hash, Hasher};

/// The name of a property on a reactive object.
///
/// Keys compare by their name, so two keys built from the same string are
/// the same key. Notifications carry `Option<PropertyKey>`, where `None`
/// means "every property may have changed".
///
/// # Example
///
/// ```rust
/// use understory_computed::PropertyKey;
///
/// let width = PropertyKey::new("Width");
/// assert_eq!(width.name(), "Width");
/// assert_eq!(width, PropertyKey::new("Width"));
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyKey(&'static str);

impl PropertyKey {
    /// Creates a key for the property with the given name.
    #[must_use]
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the property name.
    #[must_use]
    #[inline]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyKey").field(&self.0).finish()
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<&'static str> for PropertyKey {
    #[inline]
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

/// A typed, readable property of an object of type `O`.
///
/// A `Property` pairs a [`PropertyKey`] with a plain getter. Reading it
/// through [`Deps::get`](crate::Deps::get) records the read as a dependency
/// of whatever computed property is being evaluated; reading it through
/// [`Property::get`] does not.
///
/// Properties are usually declared as associated constants:
///
/// ```rust
/// use core::cell::Cell;
/// use understory_computed::Property;
///
/// struct Counter {
///     count: Cell<i32>,
/// }
///
/// impl Counter {
///     const COUNT: Property<Self, i32> = Property::new("Count", |c| c.count.get());
/// }
///
/// let counter = Counter { count: Cell::new(3) };
/// assert_eq!(Counter::COUNT.get(&counter), 3);
/// assert_eq!(Counter::COUNT.key().name(), "Count");
/// ```
pub struct Property<O: ?Sized, T> {
    key: PropertyKey,
    get: fn(&O) -> T,
}

impl<O: ?Sized, T> Property<O, T> {
    /// Creates a property named `name` read by `get`.
    #[must_use]
    #[inline]
    pub const fn new(name: &'static str, get: fn(&O) -> T) -> Self {
        Self {
            key: PropertyKey::new(name),
            get,
        }
    }

    /// Creates a property from an existing key.
    #[must_use]
    #[inline]
    pub const fn with_key(key: PropertyKey, get: fn(&O) -> T) -> Self {
        Self { key, get }
    }

    /// Returns the key of this property.
    #[must_use]
    #[inline]
    pub const fn key(&self) -> PropertyKey {
        self.key
    }

    /// Reads the property without recording a dependency.
    #[inline]
    pub fn get(&self, object: &O) -> T {
        (self.get)(object)
    }
}

// Manual trait implementations to avoid requiring O: Clone, T: Clone, etc.

impl<O: ?Sized, T> Copy for Property<O, T> {}

impl<O: ?Sized, T> Clone for Property<O, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<O: ?Sized, T> PartialEq for Property<O, T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<O: ?Sized, T> Eq for Property<O, T> {}

impl<O: ?Sized, T> Hash for Property<O, T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<O: ?Sized, T> fmt::Debug for Property<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("key", &self.key)
            .field("type", &core::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}
