// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reactive objects.
//!
//! A [`Reactive`] is the change-tracking state an object embeds to take part
//! in dependency tracking. It owns:
//!
//! - the object's listener list,
//! - the dependency edges of its computed properties,
//! - one subscription per distinct external source, held only while the
//!   object itself has listeners,
//! - for cached objects, the set of computed properties whose stored values
//!   are still valid.
//!
//! Edges are `(target, source, source property)` triples. A `None` source
//! means the object itself.

use core::cell::{Cell, RefCell};
use core::fmt;
use std::rc::{Rc, Weak};

use hashbrown::HashSet;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::key::PropertyKey;
use crate::observable::{
    Listener, ListenerId, ListenerSet, NotifyError, Observable, Observe, SourceRef,
};
use crate::scratch::ChangeSpan;

/// Implemented by types that embed a [`Reactive`].
///
/// This is what lets [`Computed::eval`](crate::Computed::eval) find the edge
/// table of the object it evaluates on, and what makes the object usable as
/// a dependency source.
pub trait ReactiveObject {
    /// Returns the object's change-tracking state.
    fn reactive(&self) -> &Reactive;
}

impl<O: ReactiveObject + ?Sized> Observe for O {
    fn observable(&self) -> Rc<dyn Observable> {
        self.reactive().observable()
    }
}

impl ReactiveObject for Reactive {
    fn reactive(&self) -> &Reactive {
        self
    }
}

#[derive(Clone, Debug)]
struct Edge {
    target: PropertyKey,
    source: Option<SourceRef>,
    property: PropertyKey,
}

struct ReactiveInner {
    listeners: RefCell<ListenerSet>,
    edges: RefCell<Vec<Edge>>,
    upstream: RefCell<SmallVec<[(SourceRef, ListenerId); 4]>>,
    valid: Option<RefCell<SmallVec<[PropertyKey; 8]>>>,
    on_upstream: Listener,
}

/// Change-tracking state of a reactive object.
///
/// Embed one in every object that has computed properties or that other
/// objects' computed properties read from, and implement
/// [`ReactiveObject`] to expose it.
///
/// `Reactive` is single-threaded: it is neither `Send` nor `Sync`.
///
/// Dropping a `Reactive` disposes it.
///
/// ```rust
/// use core::cell::Cell;
/// use std::rc::Rc;
/// use understory_computed::{Computed, Property, Reactive, ReactiveObject, listener};
///
/// struct Celsius {
///     reactive: Reactive,
///     degrees: Cell<f64>,
/// }
///
/// impl ReactiveObject for Celsius {
///     fn reactive(&self) -> &Reactive {
///         &self.reactive
///     }
/// }
///
/// impl Celsius {
///     const DEGREES: Property<Self, f64> = Property::new("Degrees", |c| c.degrees.get());
///     const FAHRENHEIT: Computed<Self, f64> =
///         Computed::new("Fahrenheit", |c, deps| deps.get(c, &Self::DEGREES) * 1.8 + 32.0);
///
///     fn set_degrees(&self, value: f64) {
///         self.reactive.set_cell(&self.degrees, value, Self::DEGREES.key());
///     }
/// }
///
/// let temp = Celsius { reactive: Reactive::new(), degrees: Cell::new(0.0) };
/// assert_eq!(Celsius::FAHRENHEIT.eval(&temp), 32.0);
///
/// let seen = Rc::new(Cell::new(0));
/// let counter = Rc::clone(&seen);
/// let id = temp.reactive().subscribe(listener(move |_, property| {
///     if property.is_some_and(|p| p.name() == "Fahrenheit") {
///         counter.set(counter.get() + 1);
///     }
/// }));
///
/// temp.set_degrees(100.0);
/// assert_eq!(seen.get(), 1);
/// assert_eq!(Celsius::FAHRENHEIT.eval(&temp), 212.0);
///
/// temp.reactive().unsubscribe(id).unwrap();
/// ```
pub struct Reactive {
    inner: Rc<ReactiveInner>,
}

impl Reactive {
    /// Creates state for an object whose computed properties are evaluated
    /// on every read.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ReactiveInner::new(false),
        }
    }

    /// Creates state for an object that caches computed values.
    ///
    /// Use [`Computed::eval_stored`](crate::Computed::eval_stored) to read
    /// through the cache.
    #[must_use]
    pub fn new_cached() -> Self {
        Self {
            inner: ReactiveInner::new(true),
        }
    }

    /// Returns `true` if this object caches computed values.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.inner.valid.is_some()
    }

    /// Returns the notifier for this object.
    ///
    /// All notifications this object sends use this notifier as the sender,
    /// so listeners can compare it by address.
    #[must_use]
    pub fn observable(&self) -> Rc<dyn Observable> {
        self.inner.clone()
    }

    /// Stores `value` into `slot` and announces `key` if it differs from the
    /// current value.
    ///
    /// Returns `true` if the value changed.
    pub fn set<T: PartialEq>(&self, slot: &RefCell<T>, value: T, key: PropertyKey) -> bool {
        self.set_with(slot, value, key, |current, value| current == value)
    }

    /// Like [`Reactive::set`], with a custom equality test.
    ///
    /// Useful for values such as `Rc<T>` that should compare by identity.
    pub fn set_with<T>(
        &self,
        slot: &RefCell<T>,
        value: T,
        key: PropertyKey,
        same: impl FnOnce(&T, &T) -> bool,
    ) -> bool {
        {
            let mut current = slot.borrow_mut();
            if same(&current, &value) {
                return false;
            }
            *current = value;
        }
        self.announce(Some(key));
        true
    }

    /// Like [`Reactive::set`], for `Copy` values held in a [`Cell`].
    pub fn set_cell<T: Copy + PartialEq>(&self, slot: &Cell<T>, value: T, key: PropertyKey) -> bool {
        if slot.get() == value {
            return false;
        }
        slot.set(value);
        self.announce(Some(key));
        true
    }

    /// Announces that `key` changed, or with `None` that every property may
    /// have changed.
    ///
    /// Listeners are told about `key` and then about every computed property
    /// that transitively depends on it through this object's own edges, each
    /// exactly once, in discovery order.
    pub fn announce(&self, key: Option<PropertyKey>) {
        self.inner.announce(key);
    }

    /// Attaches a listener.
    ///
    /// The first listener makes the object subscribe to its external sources.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        self.inner.subscribe(listener)
    }

    /// Detaches a listener.
    ///
    /// Detaching the last listener unsubscribes from every external source.
    pub fn unsubscribe(&self, id: ListenerId) -> Result<(), NotifyError> {
        self.inner.unsubscribe(id)
    }

    /// Returns `true` if at least one listener is attached.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }

    /// Detaches every listener, as if each had been detached in turn.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        let had = self.inner.listeners.borrow_mut().clear();
        if had {
            self.inner.listeners_detached();
        }
    }

    /// Returns `true` if the cached value of `key` is still valid.
    ///
    /// Always `false` for objects that do not cache.
    #[must_use]
    pub fn is_property_valid(&self, key: PropertyKey) -> bool {
        self.inner
            .valid
            .as_ref()
            .is_some_and(|valid| valid.borrow().contains(&key))
    }

    /// Marks the cached value of `key` as valid.
    ///
    /// While the object has no listeners it hears nothing from its external
    /// sources, so a property that reaches one of them is left invalid.
    pub fn set_property_valid(&self, key: PropertyKey) {
        let Some(valid) = &self.inner.valid else {
            return;
        };
        if !self.inner.has_listeners() && self.inner.reaches_upstream(key) {
            trace!(property = %key, "not caching: external sources are not being watched");
            return;
        }
        let mut valid = valid.borrow_mut();
        if !valid.contains(&key) {
            valid.push(key);
        }
    }

    /// Returns the current dependencies of `target`.
    ///
    /// A `None` source is this object.
    #[must_use]
    pub fn dependencies(&self, target: PropertyKey) -> Vec<(Option<SourceRef>, PropertyKey)> {
        self.inner
            .edges
            .borrow()
            .iter()
            .filter(|edge| edge.target == target)
            .map(|edge| (edge.source.clone(), edge.property))
            .collect()
    }

    /// Returns the number of dependency edges across all properties.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edges.borrow().len()
    }

    /// Returns the number of external sources currently subscribed to.
    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.inner.upstream.borrow().len()
    }

    /// Replaces the edges of `target` with exactly `reads`.
    pub(crate) fn reconcile<I>(&self, target: PropertyKey, reads: I)
    where
        I: IntoIterator<Item = (SourceRef, PropertyKey)>,
    {
        self.inner.reconcile(target, reads);
    }
}

impl Default for Reactive {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Reactive {
    fn drop(&mut self) {
        self.dispose();
        // Edges hold their sources strongly; objects that read each other
        // would otherwise keep each other alive.
        let edges = core::mem::take(&mut *self.inner.edges.borrow_mut());
        drop(edges);
        if let Some(valid) = &self.inner.valid {
            valid.borrow_mut().clear();
        }
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("cached", &self.is_cached())
            .field("listeners", &self.inner.listeners.borrow().len())
            .field("edges", &self.edge_count())
            .field("upstream", &self.upstream_count())
            .finish()
    }
}

impl ReactiveInner {
    fn new(cached: bool) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            Self {
                listeners: RefCell::new(ListenerSet::new()),
                edges: RefCell::new(Vec::new()),
                upstream: RefCell::new(SmallVec::new()),
                valid: cached.then(|| RefCell::new(SmallVec::new())),
                on_upstream: Rc::new(
                    move |sender: &dyn Observable, property: Option<PropertyKey>| {
                        if let Some(inner) = weak.upgrade() {
                            inner.upstream_changed(sender, property);
                        }
                    },
                ),
            }
        })
    }

    fn addr(&self) -> *const () {
        core::ptr::from_ref(self).cast::<()>()
    }

    fn announce(&self, key: Option<PropertyKey>) {
        let Some(key) = key else {
            if let Some(valid) = &self.valid {
                valid.borrow_mut().clear();
            }
            trace!("announcing every property");
            self.fire(None);
            return;
        };
        if self.valid.is_none() && !self.has_listeners() {
            return;
        }
        let span = ChangeSpan::open();
        {
            let edges = self.edges.borrow();
            collect_dependents(&span, &edges, key);
        }
        self.deliver(&span);
    }

    fn upstream_changed(&self, sender: &dyn Observable, property: Option<PropertyKey>) {
        if !self.has_listeners() {
            return;
        }
        let span = ChangeSpan::open();
        {
            let edges = self.edges.borrow();
            for edge in edges.iter() {
                let hit = edge.source.as_ref().is_some_and(|s| s.is(sender))
                    && property.is_none_or(|p| p == edge.property);
                if hit {
                    collect_dependents(&span, &edges, edge.target);
                }
            }
        }
        if span.len() > 0 {
            self.deliver(&span);
        }
    }

    /// Invalidates every key in `span`, then notifies listeners of each.
    fn deliver(&self, span: &ChangeSpan) {
        let len = span.len();
        if let Some(valid) = &self.valid {
            let mut valid = valid.borrow_mut();
            for index in 0..len {
                let key = span.get(index);
                valid.retain(|v| *v != key);
            }
        }
        trace!(changed = len, "delivering change closure");
        for index in 0..len {
            self.fire(Some(span.get(index)));
        }
    }

    fn fire(&self, key: Option<PropertyKey>) {
        let listeners = self.listeners.borrow().snapshot();
        for listener in listeners {
            listener(self, key);
        }
    }

    fn reconcile<I>(&self, target: PropertyKey, reads: I)
    where
        I: IntoIterator<Item = (SourceRef, PropertyKey)>,
    {
        let me = self.addr();
        let mut fresh: SmallVec<[(Option<SourceRef>, PropertyKey); 8]> = SmallVec::new();
        for (source, property) in reads {
            let source = (!core::ptr::eq(source.addr(), me)).then_some(source);
            if !fresh.iter().any(|(s, p)| *s == source && *p == property) {
                fresh.push((source, property));
            }
        }
        let external_changed = replace_edges(&mut self.edges.borrow_mut(), target, &fresh);
        trace!(property = %target, edges = fresh.len(), "dependencies reconciled");
        if external_changed && self.has_listeners() {
            self.sync_upstream();
        }
    }

    /// Brings the upstream subscriptions in line with the edge table.
    ///
    /// While listening, every distinct external source gets exactly one
    /// subscription. Otherwise there are none.
    fn sync_upstream(&self) {
        let mut wanted: SmallVec<[SourceRef; 4]> = SmallVec::new();
        let mut seen: HashSet<*const ()> = HashSet::new();
        if self.has_listeners() {
            for edge in self.edges.borrow().iter() {
                if let Some(source) = &edge.source
                    && seen.insert(source.addr())
                {
                    wanted.push(source.clone());
                }
            }
        }

        let stale: SmallVec<[(SourceRef, ListenerId); 4]> = {
            let mut upstream = self.upstream.borrow_mut();
            let mut stale = SmallVec::new();
            let mut index = 0;
            while index < upstream.len() {
                if seen.contains(&upstream[index].0.addr()) {
                    index += 1;
                } else {
                    stale.push(upstream.swap_remove(index));
                }
            }
            stale
        };
        let fresh: SmallVec<[SourceRef; 4]> = {
            let upstream = self.upstream.borrow();
            wanted
                .into_iter()
                .filter(|source| !upstream.iter().any(|(s, _)| s == source))
                .collect()
        };
        if stale.is_empty() && fresh.is_empty() {
            return;
        }
        debug!(
            unsubscribed = stale.len(),
            subscribed = fresh.len(),
            "upstream subscriptions changed"
        );

        for (source, id) in stale {
            if let Err(err) = source.observable().unsubscribe(id) {
                debug!(%err, "upstream source had already dropped the listener");
            }
        }
        for source in fresh {
            let id = source.observable().subscribe(Rc::clone(&self.on_upstream));
            self.upstream.borrow_mut().push((source, id));
        }
    }

    fn listeners_detached(&self) {
        debug!("last listener detached");
        self.sync_upstream();
        if let Some(valid) = &self.valid {
            valid.borrow_mut().clear();
        }
    }

    /// Returns `true` if `key` depends on an external source, directly or
    /// through other local properties.
    fn reaches_upstream(&self, key: PropertyKey) -> bool {
        let edges = self.edges.borrow();
        let mut stack: SmallVec<[PropertyKey; 8]> = SmallVec::new();
        let mut visited: SmallVec<[PropertyKey; 8]> = SmallVec::new();
        stack.push(key);
        while let Some(current) = stack.pop() {
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            for edge in edges.iter().filter(|edge| edge.target == current) {
                if edge.source.is_some() {
                    return true;
                }
                stack.push(edge.property);
            }
        }
        false
    }
}

impl Observable for ReactiveInner {
    fn subscribe(&self, listener: Listener) -> ListenerId {
        let (id, first) = self.listeners.borrow_mut().insert(listener);
        if first {
            debug!("first listener attached");
            self.sync_upstream();
        }
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> Result<(), NotifyError> {
        let emptied = self.listeners.borrow_mut().remove(id)?;
        if emptied {
            self.listeners_detached();
        }
        Ok(())
    }

    fn has_listeners(&self) -> bool {
        !self.listeners.borrow().is_empty()
    }
}

/// Appends `key` and everything that locally depends on it to `span`.
fn collect_dependents(span: &ChangeSpan, edges: &[Edge], key: PropertyKey) {
    if !span.push(key) {
        return;
    }
    for edge in edges {
        if edge.source.is_none() && edge.property == key {
            collect_dependents(span, edges, edge.target);
        }
    }
}

/// Replaces the edges of `target` with `fresh`.
///
/// Edges that survive stay where they are; slots of dropped edges are reused
/// for new ones before the table grows. Returns `true` if an edge to an
/// external source was added or removed.
fn replace_edges(
    edges: &mut Vec<Edge>,
    target: PropertyKey,
    fresh: &[(Option<SourceRef>, PropertyKey)],
) -> bool {
    let mut kept: SmallVec<[bool; 8]> = SmallVec::from_elem(false, fresh.len());
    let mut stale: SmallVec<[usize; 8]> = SmallVec::new();
    for (index, edge) in edges.iter().enumerate() {
        if edge.target != target {
            continue;
        }
        match fresh
            .iter()
            .position(|(s, p)| edge.source == *s && edge.property == *p)
        {
            Some(i) if !kept[i] => kept[i] = true,
            _ => stale.push(index),
        }
    }

    let mut external_changed = false;
    let mut reusable = stale.into_iter();
    for ((source, property), _) in fresh.iter().zip(kept.iter()).filter(|(_, kept)| !**kept) {
        external_changed |= source.is_some();
        let edge = Edge {
            target,
            source: source.clone(),
            property: *property,
        };
        match reusable.next() {
            Some(slot) => {
                external_changed |= edges[slot].source.is_some();
                edges[slot] = edge;
            }
            None => edges.push(edge),
        }
    }

    let leftover: SmallVec<[usize; 8]> = reusable.collect();
    if !leftover.is_empty() {
        external_changed |= leftover.iter().any(|&i| edges[i].source.is_some());
        let mut index = 0;
        edges.retain(|_| {
            let keep = !leftover.contains(&index);
            index += 1;
            keep
        });
    }
    external_changed
}
