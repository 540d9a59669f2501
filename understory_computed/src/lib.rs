// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Computed: computed properties with automatic dependency tracking.
//!
//! Objects embed a [`Reactive`] and declare two kinds of properties:
//!
//! - **Stored** properties ([`Property`]) hold plain values. Setting one
//!   through [`Reactive::set`] announces the change.
//! - **Computed** properties ([`Computed`]) derive their value from other
//!   properties, on the same object or on other objects. Their dependencies
//!   are discovered by running the derivation: every read made through the
//!   [`Deps`] context becomes an edge.
//!
//! ## Core Concepts
//!
//! ### Dependency Collection
//!
//! Each evaluation gets a fresh [`Cookie`] from the per-thread
//! [`DependencyBuffer`]. Tracked reads are appended to the buffer under that
//! cookie. When the evaluation ends, normally or by unwinding, its reads are
//! removed from the buffer and replace the property's previous edges.
//! Nested evaluations use their own cookies and never leak reads into the
//! outer one.
//!
//! ### Change Propagation
//!
//! Announcing a change to property `P` notifies listeners about `P` and
//! about every property that transitively depends on it through the
//! object's own edges, each once. An object with listeners subscribes once
//! to every distinct external source its edges mention, and forwards their
//! changes to the affected properties. An object without listeners holds
//! no subscriptions, so objects nobody watches can be dropped freely.
//!
//! ### Caching
//!
//! Objects built with [`Reactive::new_cached`] remember which computed
//! properties are still valid. [`Computed::eval_stored`] reuses the value
//! kept in a [`Stored`] slot until a change invalidates it.
//!
//! ## Quick Start
//!
//! ```rust
//! use core::cell::RefCell;
//! use std::rc::Rc;
//! use understory_computed::{
//!     Computed, Property, PropertyKey, Reactive, ReactiveObject, listener,
//! };
//!
//! struct Person {
//!     reactive: Reactive,
//!     first: RefCell<String>,
//!     last: RefCell<String>,
//! }
//!
//! impl ReactiveObject for Person {
//!     fn reactive(&self) -> &Reactive {
//!         &self.reactive
//!     }
//! }
//!
//! impl Person {
//!     const FIRST: Property<Self, String> = Property::new("First", |p| p.first.borrow().clone());
//!     const LAST: Property<Self, String> = Property::new("Last", |p| p.last.borrow().clone());
//!     const FULL: Computed<Self, String> = Computed::new("Full", |p, deps| {
//!         format!("{} {}", deps.get(p, &Self::FIRST), deps.get(p, &Self::LAST))
//!     });
//! }
//!
//! let person = Person {
//!     reactive: Reactive::new(),
//!     first: RefCell::new("Ada".into()),
//!     last: RefCell::new("Byron".into()),
//! };
//! assert_eq!(Person::FULL.eval(&person), "Ada Byron");
//!
//! let changes = Rc::new(RefCell::new(Vec::new()));
//! let log = Rc::clone(&changes);
//! let id = person.reactive().subscribe(listener(move |_, p| {
//!     log.borrow_mut().extend(p.map(PropertyKey::name));
//! }));
//!
//! person
//!     .reactive()
//!     .set(&person.last, "Lovelace".into(), Person::LAST.key());
//! assert_eq!(*changes.borrow(), ["Last", "Full"]);
//! assert_eq!(Person::FULL.eval(&person), "Ada Lovelace");
//!
//! person.reactive().unsubscribe(id).unwrap();
//! ```
//!
//! ## Threading
//!
//! Everything here is single-threaded. Objects, listeners and the
//! per-thread buffers are `!Send`.

mod buffer;
mod computed;
mod deps;
mod key;
mod observable;
mod reactive;
mod scratch;

pub use buffer::{BufferEntry, Cookie, DependencyBuffer, thread_buffer_len};
pub use computed::{Computed, Stored};
pub use deps::Deps;
pub use key::{Property, PropertyKey};
pub use observable::{
    Listener, ListenerId, ListenerSet, NotifyError, Observable, Observe, SourceRef, listener,
    observable_addr,
};
pub use reactive::{Reactive, ReactiveObject};
