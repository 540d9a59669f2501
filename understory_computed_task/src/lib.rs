// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Computed Task: async values for computed properties.
//!
//! A [`Task`] wraps a future-producing factory as a one-shot value that
//! speaks the [`understory_computed`] change protocol:
//!
//! - The work starts when the first listener attaches, not before.
//! - When the last listener detaches before the work finishes, the work's
//!   [`CancellationToken`] is cancelled and the in-flight future is dropped.
//!   Attaching again starts a fresh attempt.
//! - When the work finishes, every listener is told once, with property
//!   `None`, and then released. The result never changes afterwards.
//!
//! Computed properties that read [`Task::HAS_VALUE`] or [`Task::VALUE`]
//! depend on the task like on any other object, so the work runs exactly
//! while something is watching a property that needs it.
//!
//! Work runs on any [`LocalSpawn`](futures::task::LocalSpawn) executor, for
//! example `futures::executor::LocalPool`.
//!
//! ## Request identity
//!
//! [`Task::with_identity`] ties a task to the arguments and the function
//! that serve it. Two tasks for the same request compare equal, so a cached
//! computed property that re-derives the same request keeps the task that
//! is already running instead of starting a new one.

mod identity;
mod task;

pub use task::{Task, TaskStatus};
pub use tokio_util::sync::CancellationToken;
