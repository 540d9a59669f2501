// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request identity for async values.

use core::any::{Any, TypeId};

/// Something two async values can be compared by.
pub(crate) trait Identity {
    fn as_any(&self) -> &dyn Any;

    fn same(&self, other: &dyn Identity) -> bool;
}

/// The arguments of a request plus the type of the function that serves it.
///
/// Function items and non-capturing closures each have a distinct type, so
/// the type stands in for the function itself.
pub(crate) struct Keyed<A> {
    args: A,
    factory: TypeId,
}

impl<A> Keyed<A> {
    pub(crate) fn new<F: 'static>(args: A) -> Self {
        Self {
            args,
            factory: TypeId::of::<F>(),
        }
    }
}

impl<A: PartialEq + 'static> Identity for Keyed<A> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same(&self, other: &dyn Identity) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| other.factory == self.factory && other.args == self.args)
    }
}
