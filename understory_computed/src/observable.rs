// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The change-notification protocol.
//!
//! Anything that can report "property P of mine changed" implements
//! [`Observable`]. Reactive objects implement it, and so does the async bridge
//! in `understory_computed_task`. A dependency edge that points at another
//! object holds that object as a [`SourceRef`].

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::rc::Rc;

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::key::PropertyKey;

/// A change listener.
///
/// Called with the object that changed and the property that changed, or
/// `None` when every property may have changed.
pub type Listener = Rc<dyn Fn(&dyn Observable, Option<PropertyKey>)>;

/// Wraps a closure as a [`Listener`].
///
/// ```rust
/// use understory_computed::{Reactive, listener};
///
/// let object = Reactive::new();
/// let id = object.subscribe(listener(|_, property| {
///     println!("{property:?} changed");
/// }));
/// assert!(object.has_listeners());
/// object.unsubscribe(id).unwrap();
/// ```
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&dyn Observable, Option<PropertyKey>) + 'static,
{
    Rc::new(f)
}

/// Identifies one attached [`Listener`].
///
/// Returned by [`Observable::subscribe`] and handed back to
/// [`Observable::unsubscribe`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Returns the raw id.
    #[must_use]
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// An object that announces property changes to attached listeners.
///
/// Implementations must treat the transition from zero to one listener and
/// from one to zero listeners as lifecycle events: that is when they start
/// and stop listening to their own sources.
pub trait Observable {
    /// Attaches `listener` and returns its id.
    fn subscribe(&self, listener: Listener) -> ListenerId;

    /// Detaches the listener with the given id.
    ///
    /// Returns [`NotifyError::UnknownListener`] if `id` was never attached to
    /// this object, or was already detached.
    fn unsubscribe(&self, id: ListenerId) -> Result<(), NotifyError>;

    /// Returns `true` if at least one listener is attached.
    fn has_listeners(&self) -> bool;
}

/// Types that can hand out a shared handle to their change notifier.
///
/// Dependency tracking uses this to turn "I read property P of `object`"
/// into an edge that can be subscribed to later. Every
/// [`ReactiveObject`](crate::ReactiveObject) implements it.
pub trait Observe {
    /// Returns the notifier that announces changes to this object's properties.
    fn observable(&self) -> Rc<dyn Observable>;
}

impl Observe for Rc<dyn Observable> {
    fn observable(&self) -> Rc<dyn Observable> {
        Self::clone(self)
    }
}

/// Errors reported by the change-notification protocol.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NotifyError {
    /// The listener id is not attached to this object.
    UnknownListener(ListenerId),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownListener(id) => {
                write!(f, "listener {} is not attached to this object", id.0)
            }
        }
    }
}

impl core::error::Error for NotifyError {}

/// A shared reference to a dependency source, compared by address.
///
/// Two `SourceRef`s are equal when they point at the same notifier, no matter
/// what the notifier's value looks like.
#[derive(Clone)]
pub struct SourceRef(Rc<dyn Observable>);

impl SourceRef {
    /// Wraps a notifier.
    #[must_use]
    pub fn new(observable: Rc<dyn Observable>) -> Self {
        Self(observable)
    }

    /// Returns the wrapped notifier.
    #[must_use]
    pub fn observable(&self) -> &Rc<dyn Observable> {
        &self.0
    }

    /// Returns the address used for identity comparisons.
    #[must_use]
    pub fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast::<()>()
    }

    /// Returns `true` if this source is `other`.
    #[must_use]
    pub fn is(&self, other: &dyn Observable) -> bool {
        core::ptr::eq(self.addr(), observable_addr(other))
    }
}

impl PartialEq for SourceRef {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for SourceRef {}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceRef").field(&self.addr()).finish()
    }
}

/// Returns the address of a notifier, for identity comparisons.
#[must_use]
pub fn observable_addr(observable: &dyn Observable) -> *const () {
    core::ptr::from_ref(observable).cast::<()>()
}

/// Source of listener ids.
///
/// Shared by every set in the process, so an id never names listeners on two
/// different notifiers.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);

/// The listener list of one notifier.
///
/// [`ListenerSet::clear`] retires the ids attached at that moment, so
/// detaching one of those later is not an error. Each retired id can be
/// detached once.
#[derive(Default)]
pub struct ListenerSet {
    entries: SmallVec<[(ListenerId, Listener); 2]>,
    retired: HashSet<ListenerId>,
}

impl ListenerSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    ///
    /// Returns its id and whether it is the first listener in the set.
    pub fn insert(&mut self, listener: Listener) -> (ListenerId, bool) {
        let id = issue();
        let first = self.entries.is_empty();
        self.entries.push((id, listener));
        (id, first)
    }

    /// Issues an id that is already retired.
    ///
    /// Used by notifiers that accept a listener without keeping it.
    pub fn issue_retired(&mut self) -> ListenerId {
        let id = issue();
        self.retired.insert(id);
        id
    }

    /// Removes a listener.
    ///
    /// Returns `Ok(true)` when this removal emptied the set.
    pub fn remove(&mut self, id: ListenerId) -> Result<bool, NotifyError> {
        if let Some(index) = self.entries.iter().position(|(entry, _)| *entry == id) {
            self.entries.remove(index);
            return Ok(self.entries.is_empty());
        }
        if self.retired.remove(&id) {
            Ok(false)
        } else {
            Err(NotifyError::UnknownListener(id))
        }
    }

    /// Removes every listener.
    ///
    /// Returns `true` if the set had listeners.
    pub fn clear(&mut self) -> bool {
        let had = !self.entries.is_empty();
        self.retired.extend(self.entries.drain(..).map(|(id, _)| id));
        had
    }

    /// Returns `true` if the set has no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Copies the current listeners out so they can be called without
    /// holding a borrow of the set.
    #[must_use]
    pub fn snapshot(&self) -> SmallVec<[Listener; 2]> {
        self.entries.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

fn issue() -> ListenerId {
    ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.entries.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}
