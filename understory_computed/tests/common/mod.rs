// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixtures shared by the integration tests.

#![allow(dead_code, reason = "not every test file uses every fixture")]

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use understory_computed::{
    Computed, ListenerId, Property, PropertyKey, Reactive, ReactiveObject, listener,
};

/// Records the properties announced on an object while alive, and checks
/// them against an expected set in [`ExpectChanges::finish`].
pub struct ExpectChanges<'a> {
    reactive: &'a Reactive,
    id: ListenerId,
    seen: Rc<RefCell<Vec<&'static str>>>,
    expected: Vec<&'static str>,
}

impl<'a> ExpectChanges<'a> {
    pub fn new(reactive: &'a Reactive, expected: &[&'static str]) -> Self {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let id = reactive.subscribe(listener(move |_, property| {
            log.borrow_mut()
                .push(property.map_or("*", PropertyKey::name));
        }));
        Self {
            reactive,
            id,
            seen,
            expected: expected.to_vec(),
        }
    }

    /// Returns the announcements seen so far, in order.
    pub fn seen(&self) -> Vec<&'static str> {
        self.seen.borrow().clone()
    }

    /// Detaches and asserts that every expected property was announced
    /// exactly once and nothing else was.
    pub fn finish(mut self) {
        self.reactive
            .unsubscribe(self.id)
            .expect("the recording listener is attached");
        let mut seen = self.seen.borrow().clone();
        seen.sort_unstable();
        self.expected.sort_unstable();
        assert_eq!(seen, self.expected, "announced properties");
    }
}

/// Two stored values and a chain of computed properties:
/// `C = A + 1`, `D = B + C`.
#[derive(Default)]
pub struct Chain {
    reactive: Reactive,
    a: Cell<i32>,
    b: Cell<i32>,
}

impl ReactiveObject for Chain {
    fn reactive(&self) -> &Reactive {
        &self.reactive
    }
}

impl Chain {
    pub const A: Property<Self, i32> = Property::new("A", |c| c.a.get());
    pub const B: Property<Self, i32> = Property::new("B", |c| c.b.get());
    pub const C: Computed<Self, i32> = Computed::new("C", |c, deps| deps.get(c, &Self::A) + 1);
    pub const D: Computed<Self, i32> = Computed::new("D", |c, deps| {
        deps.get(c, &Self::B) + deps.get_computed(c, &Self::C)
    });

    pub fn new() -> Self {
        Self::default()
    }

    pub fn a(&self) -> i32 {
        self.a.get()
    }

    pub fn set_a(&self, value: i32) -> bool {
        self.reactive.set_cell(&self.a, value, Self::A.key())
    }

    pub fn b(&self) -> i32 {
        self.b.get()
    }

    pub fn set_b(&self, value: i32) -> bool {
        self.reactive.set_cell(&self.b, value, Self::B.key())
    }

    pub fn c(&self) -> i32 {
        Self::C.eval(self)
    }

    pub fn d(&self) -> i32 {
        Self::D.eval(self)
    }

    pub fn has_listeners(&self) -> bool {
        self.reactive.has_listeners()
    }
}

/// [`Chain`] plus a switch: `F = E ? A : B + D`.
#[derive(Default)]
pub struct Switch {
    reactive: Reactive,
    a: Cell<i32>,
    b: Cell<i32>,
    e: Cell<bool>,
}

impl ReactiveObject for Switch {
    fn reactive(&self) -> &Reactive {
        &self.reactive
    }
}

impl Switch {
    pub const A: Property<Self, i32> = Property::new("A", |s| s.a.get());
    pub const B: Property<Self, i32> = Property::new("B", |s| s.b.get());
    pub const E: Property<Self, bool> = Property::new("E", |s| s.e.get());
    pub const C: Computed<Self, i32> = Computed::new("C", |s, deps| deps.get(s, &Self::A) + 1);
    pub const D: Computed<Self, i32> = Computed::new("D", |s, deps| {
        deps.get(s, &Self::B) + deps.get_computed(s, &Self::C)
    });
    pub const F: Computed<Self, i32> = Computed::new("F", |s, deps| {
        if deps.get(s, &Self::E) {
            deps.get(s, &Self::A)
        } else {
            deps.get(s, &Self::B) + deps.get_computed(s, &Self::D)
        }
    });

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_a(&self, value: i32) {
        self.reactive.set_cell(&self.a, value, Self::A.key());
    }

    pub fn set_b(&self, value: i32) {
        self.reactive.set_cell(&self.b, value, Self::B.key());
    }

    pub fn set_e(&self, value: bool) {
        self.reactive.set_cell(&self.e, value, Self::E.key());
    }

    pub fn c(&self) -> i32 {
        Self::C.eval(self)
    }

    pub fn d(&self) -> i32 {
        Self::D.eval(self)
    }

    pub fn f(&self) -> i32 {
        Self::F.eval(self)
    }
}
