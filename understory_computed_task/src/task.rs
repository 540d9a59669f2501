// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The async value bridge.

use core::cell::{Cell, RefCell};
use core::fmt;
use std::rc::{Rc, Weak};

use futures::future::{self, Either, FutureExt, LocalBoxFuture};
use futures::task::{LocalSpawn, LocalSpawnExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use understory_computed::{
    Listener, ListenerId, ListenerSet, NotifyError, Observable, Observe, Property,
};

use crate::identity::{Identity, Keyed};

type Factory<T, E> = dyn Fn(CancellationToken) -> LocalBoxFuture<'static, Result<T, E>>;

/// Where an async value is in its lifecycle.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TaskStatus {
    /// Not started, or cancelled before it settled.
    Idle,
    /// Work is in flight.
    Pending,
    /// The work finished with a value or an error. Final.
    Settled,
}

enum State<T, E> {
    Idle,
    Pending {
        token: CancellationToken,
        attempt: u64,
    },
    Settled(Result<T, E>),
}

struct TaskInner<T, E> {
    factory: Rc<Factory<T, E>>,
    identity: Option<Box<dyn Identity>>,
    spawner: Box<dyn LocalSpawn>,
    state: RefCell<State<T, E>>,
    listeners: RefCell<ListenerSet>,
    attempts: Cell<u64>,
    this: Weak<Self>,
}

/// A lazily started, cancellable, one-shot async value.
///
/// The work is not started when the value is created. It starts when the
/// first listener attaches, and is cancelled when the last listener detaches
/// before it finishes; a later listener starts it again from scratch. Once
/// the work finishes, listeners get exactly one notification with property
/// `None`, are dropped, and the value never changes again.
///
/// A computed property that reads [`Task::HAS_VALUE`] or [`Task::VALUE`]
/// through [`Deps`](understory_computed::Deps) picks this up like any other
/// source: while its object is being watched, the work runs, and the
/// property is announced when the result arrives.
///
/// ```rust
/// use futures::channel::oneshot;
/// use futures::executor::LocalPool;
/// use understory_computed::listener;
/// use understory_computed_task::Task;
///
/// let mut pool = LocalPool::new();
/// let (tx, rx) = oneshot::channel::<u32>();
/// let rx = std::cell::RefCell::new(Some(rx));
///
/// let task: Task<u32, oneshot::Canceled> =
///     Task::new(pool.spawner(), move |_token| rx.borrow_mut().take().unwrap());
/// assert!(!task.has_value());
///
/// let id = task.subscribe(listener(|_, _| {}));
/// pool.run_until_stalled();
/// assert!(task.is_pending());
///
/// tx.send(42).unwrap();
/// pool.run_until_stalled();
/// assert_eq!(task.value(), Some(Ok(42)));
/// task.unsubscribe(id).unwrap();
/// ```
pub struct Task<T, E> {
    inner: Rc<TaskInner<T, E>>,
}

impl<T: 'static, E: 'static> Task<T, E> {
    /// Creates an async value whose work is produced by `factory`.
    ///
    /// Every start calls `factory` with a fresh cancellation token and runs
    /// the returned future on `spawner`.
    pub fn new<S, F, Fut>(spawner: S, factory: F) -> Self
    where
        S: LocalSpawn + 'static,
        F: Fn(CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Self::build(
            Box::new(spawner),
            Rc::new(move |token| factory(token).boxed_local()),
            None,
        )
    }

    /// Creates an async value identified by `args` and `factory`.
    ///
    /// Two values created this way compare equal when their arguments are
    /// equal and their factories have the same type. Pass a function item
    /// or a non-capturing closure; all function pointers of one signature
    /// share a type.
    ///
    /// Stored computed properties keep the old value when a recomputation
    /// returns an equal one, so re-deriving the same request does not
    /// restart the work.
    pub fn with_identity<S, A, F, Fut>(spawner: S, args: A, factory: F) -> Self
    where
        S: LocalSpawn + 'static,
        A: Clone + PartialEq + 'static,
        F: Fn(A, CancellationToken) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let identity = Keyed::new::<F>(args.clone());
        Self::build(
            Box::new(spawner),
            Rc::new(move |token| factory(args.clone(), token).boxed_local()),
            Some(Box::new(identity)),
        )
    }

    fn build(
        spawner: Box<dyn LocalSpawn>,
        factory: Rc<Factory<T, E>>,
        identity: Option<Box<dyn Identity>>,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<TaskInner<T, E>>| TaskInner {
            factory,
            identity,
            spawner,
            state: RefCell::new(State::Idle),
            listeners: RefCell::new(ListenerSet::new()),
            attempts: Cell::new(0),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Returns the notifier for this value.
    #[must_use]
    pub fn observable(&self) -> Rc<dyn Observable> {
        self.inner.clone()
    }

    /// Attaches a listener, starting the work if this is the first one.
    ///
    /// After the value has settled the listener is not kept.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        self.inner.subscribe(listener)
    }

    /// Detaches a listener, cancelling the work if it was the last one.
    pub fn unsubscribe(&self, id: ListenerId) -> Result<(), NotifyError> {
        self.inner.unsubscribe(id)
    }
}

impl<T, E> Task<T, E> {
    /// Returns `true` once the work has finished, with a value or an error.
    #[must_use]
    pub fn has_value(&self) -> bool {
        matches!(*self.inner.state.borrow(), State::Settled(_))
    }

    /// Returns `true` while work is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state.borrow(), State::Pending { .. })
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match *self.inner.state.borrow() {
            State::Idle => TaskStatus::Idle,
            State::Pending { .. } => TaskStatus::Pending,
            State::Settled(_) => TaskStatus::Settled,
        }
    }

    /// Returns how many times the work has been started.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.get()
    }

    /// Returns `true` if at least one listener is attached.
    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.inner.listeners.borrow().is_empty()
    }

    /// Cancels in-flight work and drops every listener.
    ///
    /// A settled value stays settled. Idempotent.
    pub fn dispose(&self) {
        self.inner.listeners.borrow_mut().clear();
        self.inner.cancel();
    }

    /// Returns the outcome of the work, if it has finished.
    #[must_use]
    pub fn value(&self) -> Option<Result<T, E>>
    where
        T: Clone,
        E: Clone,
    {
        match &*self.inner.state.borrow() {
            State::Settled(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Returns the error the work failed with, if it has failed.
    #[must_use]
    pub fn error(&self) -> Option<E>
    where
        E: Clone,
    {
        match &*self.inner.state.borrow() {
            State::Settled(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Task<T, E> {
    /// Whether the work has finished.
    pub const HAS_VALUE: Property<Self, bool> = Property::new("HasValue", Self::has_value);

    /// The outcome of the work, once finished.
    pub const VALUE: Property<Self, Option<Result<T, E>>> = Property::new("Value", Self::value);

    /// The error the work failed with, once failed.
    pub const ERROR: Property<Self, Option<E>> = Property::new("Error", Self::error);
}

impl<T: 'static, E: 'static> Observe for Task<T, E> {
    fn observable(&self) -> Rc<dyn Observable> {
        self.inner.clone()
    }
}

impl<T, E> Clone for Task<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> PartialEq for Task<T, E> {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        match (&self.inner.identity, &other.inner.identity) {
            (Some(a), Some(b)) => a.same(b.as_ref()),
            _ => false,
        }
    }
}

impl<T, E> fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("status", &self.status())
            .field("attempts", &self.attempts())
            .field("listeners", &self.inner.listeners.borrow().len())
            .field("keyed", &self.inner.identity.is_some())
            .finish()
    }
}

impl<T: 'static, E: 'static> TaskInner<T, E> {
    fn start(&self) {
        let attempt = self.attempts.get() + 1;
        self.attempts.set(attempt);
        let token = CancellationToken::new();
        *self.state.borrow_mut() = State::Pending {
            token: token.clone(),
            attempt,
        };
        debug!(attempt, "async value started");

        let factory = Rc::clone(&self.factory);
        let this = self.this.clone();
        let driver = async move {
            if token.is_cancelled() {
                return;
            }
            let work = factory(token.clone());
            let cancelled = core::pin::pin!(token.cancelled());
            match future::select(work, cancelled).await {
                Either::Left((result, _)) => {
                    if let Some(inner) = this.upgrade() {
                        inner.complete(attempt, result);
                    }
                }
                Either::Right(((), _)) => {
                    trace!(attempt, "in-flight work dropped after cancellation");
                }
            }
        };
        if let Err(err) = self.spawner.spawn_local(driver) {
            warn!(%err, attempt, "could not spawn async value");
            *self.state.borrow_mut() = State::Idle;
        }
    }

    fn complete(&self, attempt: u64, result: Result<T, E>) {
        {
            let mut state = self.state.borrow_mut();
            let current = matches!(
                &*state,
                State::Pending { token, attempt: a } if *a == attempt && !token.is_cancelled()
            );
            if !current {
                trace!(attempt, "stale result discarded");
                return;
            }
            *state = State::Settled(result);
        }
        let listeners = {
            let mut set = self.listeners.borrow_mut();
            let snapshot = set.snapshot();
            set.clear();
            snapshot
        };
        debug!(attempt, listeners = listeners.len(), "async value settled");
        for listener in listeners {
            listener(self, None);
        }
    }
}

impl<T, E> TaskInner<T, E> {
    fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        if let State::Pending { token, attempt } = &*state {
            token.cancel();
            debug!(attempt = *attempt, "async value cancelled");
            *state = State::Idle;
        }
    }
}

impl<T: 'static, E: 'static> Observable for TaskInner<T, E> {
    fn subscribe(&self, listener: Listener) -> ListenerId {
        if matches!(*self.state.borrow(), State::Settled(_)) {
            trace!("async value already settled; listener not kept");
            return self.listeners.borrow_mut().issue_retired();
        }
        let (id, first) = self.listeners.borrow_mut().insert(listener);
        if first && matches!(*self.state.borrow(), State::Idle) {
            self.start();
        }
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> Result<(), NotifyError> {
        let emptied = self.listeners.borrow_mut().remove(id)?;
        if emptied {
            self.cancel();
        }
        Ok(())
    }

    fn has_listeners(&self) -> bool {
        !self.listeners.borrow().is_empty()
    }
}

impl<T, E> Drop for TaskInner<T, E> {
    fn drop(&mut self) {
        if let State::Pending { token, .. } = self.state.get_mut() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use futures::executor::LocalPool;
    use understory_computed::listener;

    #[derive(Clone, Debug, PartialEq)]
    enum Failure {
        Closed,
        Rejected(&'static str),
    }

    /// Hands each started attempt a fresh receiver and remembers its token.
    #[derive(Default)]
    struct Gate {
        receivers: RefCell<Vec<oneshot::Receiver<Result<u32, Failure>>>>,
        tokens: RefCell<Vec<CancellationToken>>,
    }

    impl Gate {
        fn arm(&self) -> oneshot::Sender<Result<u32, Failure>> {
            let (tx, rx) = oneshot::channel();
            self.receivers.borrow_mut().push(rx);
            tx
        }

        fn task(self: &Rc<Self>, pool: &LocalPool) -> Task<u32, Failure> {
            let gate = Rc::clone(self);
            Task::new(pool.spawner(), move |token| {
                gate.tokens.borrow_mut().push(token);
                let rx = gate.receivers.borrow_mut().pop();
                async move {
                    match rx {
                        Some(rx) => rx.await.unwrap_or(Err(Failure::Closed)),
                        None => Err(Failure::Closed),
                    }
                }
            })
        }

        fn started(&self) -> usize {
            self.tokens.borrow().len()
        }

        fn cancelled(&self, attempt: usize) -> bool {
            self.tokens.borrow()[attempt].is_cancelled()
        }
    }

    fn counter() -> (Rc<Cell<u32>>, Listener) {
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let l = listener(move |_, property| {
            assert!(property.is_none(), "async values announce every property");
            seen.set(seen.get() + 1);
        });
        (count, l)
    }

    #[test]
    fn work_starts_only_when_watched() {
        let mut pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let task = gate.task(&pool);
        pool.run_until_stalled();
        assert_eq!(gate.started(), 0);
        assert_eq!(task.status(), TaskStatus::Idle);
        assert_eq!(task.value(), None);

        let (_count, l) = counter();
        let _id = task.subscribe(l);
        assert!(task.is_pending());
        pool.run_until_stalled();
        assert_eq!(gate.started(), 1);
        assert_eq!(task.attempts(), 1);
    }

    #[test]
    fn settling_notifies_once_and_releases_listeners() {
        let mut pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let tx = gate.arm();
        let task = gate.task(&pool);

        let (count, l) = counter();
        let id = task.subscribe(l);
        let (second_count, second) = counter();
        let _second = task.subscribe(second);
        pool.run_until_stalled();
        assert!(!task.has_value());

        tx.send(Ok(5)).unwrap();
        pool.run_until_stalled();
        assert_eq!(count.get(), 1);
        assert_eq!(second_count.get(), 1);
        assert!(task.has_value());
        assert_eq!(task.value(), Some(Ok(5)));
        assert!(!task.has_listeners());

        // Detaching after settlement is fine.
        assert_eq!(task.unsubscribe(id), Ok(()));

        // Attaching after settlement neither restarts nor notifies.
        let (late_count, late) = counter();
        let late_id = task.subscribe(late);
        pool.run_until_stalled();
        assert_eq!(late_count.get(), 0);
        assert_eq!(gate.started(), 1);
        assert_eq!(task.unsubscribe(late_id), Ok(()));
        assert_eq!(task.value(), Some(Ok(5)));
    }

    #[test]
    fn last_detach_cancels_and_next_attach_restarts() {
        let mut pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let first_tx = gate.arm();
        let task = gate.task(&pool);

        let (count, l) = counter();
        let id = task.subscribe(Rc::clone(&l));
        pool.run_until_stalled();
        assert_eq!(gate.started(), 1);

        task.unsubscribe(id).unwrap();
        assert!(gate.cancelled(0));
        assert_eq!(task.status(), TaskStatus::Idle);
        pool.run_until_stalled();

        // The abandoned attempt's result goes nowhere.
        assert!(first_tx.send(Ok(1)).is_err());
        pool.run_until_stalled();
        assert!(!task.has_value());
        assert_eq!(count.get(), 0);

        let second_tx = gate.arm();
        let _id = task.subscribe(l);
        pool.run_until_stalled();
        assert_eq!(gate.started(), 2);
        assert!(!gate.cancelled(1));

        second_tx.send(Ok(2)).unwrap();
        pool.run_until_stalled();
        assert_eq!(count.get(), 1);
        assert_eq!(task.value(), Some(Ok(2)));
        assert_eq!(task.attempts(), 2);
    }

    #[test]
    fn failures_settle_like_values() {
        let mut pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let tx = gate.arm();
        let task = gate.task(&pool);

        let (count, l) = counter();
        let _id = task.subscribe(l);
        pool.run_until_stalled();
        tx.send(Err(Failure::Rejected("offline"))).unwrap();
        pool.run_until_stalled();

        assert_eq!(count.get(), 1);
        assert!(task.has_value());
        assert_eq!(task.error(), Some(Failure::Rejected("offline")));
        assert_eq!(task.value(), Some(Err(Failure::Rejected("offline"))));
    }

    #[test]
    fn unknown_listener_is_rejected_while_live() {
        let pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let task = gate.task(&pool);
        let other = gate.task(&pool);
        let own = task.subscribe(listener(|_, _| {}));
        let id = other.subscribe(listener(|_, _| {}));
        assert_ne!(own, id);
        assert_eq!(task.unsubscribe(id), Err(NotifyError::UnknownListener(id)));
        assert!(task.has_listeners());
        assert!(task.is_pending());
        assert_eq!(gate.started(), 0);

        task.unsubscribe(own).unwrap();
        assert_eq!(task.status(), TaskStatus::Idle);
    }

    #[test]
    fn dispose_cancels_and_drops_listeners() {
        let mut pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let _tx = gate.arm();
        let task = gate.task(&pool);
        let id = task.subscribe(listener(|_, _| {}));
        pool.run_until_stalled();

        task.dispose();
        assert!(gate.cancelled(0));
        assert!(!task.has_listeners());
        assert_eq!(task.status(), TaskStatus::Idle);
        assert_eq!(task.unsubscribe(id), Ok(()));
        task.dispose();
    }

    #[test]
    fn dropping_the_last_handle_cancels() {
        let mut pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let _tx = gate.arm();
        let task = gate.task(&pool);
        let _id = task.subscribe(listener(|_, _| {}));
        pool.run_until_stalled();
        assert!(!gate.cancelled(0));

        drop(task);
        assert!(gate.cancelled(0));
        pool.run_until_stalled();
    }

    #[test]
    fn equality_by_handle_or_identity() {
        async fn fetch(_: &'static str, _: CancellationToken) -> Result<u32, Failure> {
            Ok(1)
        }
        async fn fetch_other(_: &'static str, _: CancellationToken) -> Result<u32, Failure> {
            Ok(0)
        }

        let pool = LocalPool::new();
        let a = Task::with_identity(pool.spawner(), "rust", fetch);
        let b = Task::with_identity(pool.spawner(), "rust", fetch);
        let c = Task::with_identity(pool.spawner(), "go", fetch);
        let d = Task::with_identity(pool.spawner(), "rust", fetch_other);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a, a.clone());

        let gate = Rc::new(Gate::default());
        let plain = gate.task(&pool);
        let other = gate.task(&pool);
        assert_eq!(plain, plain.clone());
        assert_ne!(plain, other);
    }
}
