// src/uow.rs

//! Rollback register for multi-step provisioning.
//!
//! Every step that changes the outside world registers a compensating
//! action with [`UnitOfWork::defer`]. On success the actions are dropped
//! ([`UnitOfWork::commit`]); on failure they run newest-first
//! ([`UnitOfWork::rollback`]). A panicking action is logged and skipped so
//! the remaining actions still run.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

type RollbackAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
pub struct UnitOfWork {
    actions: Vec<RollbackAction>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("pending_actions", &self.actions.len())
            .finish()
    }
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rollback action.
    pub fn defer<F, Fut>(&mut self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.actions.push(Box::new(move || action().boxed()));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Forget all registered actions.
    pub fn commit(&mut self) {
        debug!(dropped = self.actions.len(), "unit of work committed");
        self.actions.clear();
    }

    /// Run every registered action in reverse registration order.
    pub async fn rollback(&mut self) {
        debug!(actions = self.actions.len(), "rolling back unit of work");

        while let Some(action) = self.actions.pop() {
            let fut = match std::panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(fut) => fut,
                Err(_) => {
                    warn!("rollback action panicked; continuing with the rest");
                    continue;
                }
            };

            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                warn!("rollback action panicked; continuing with the rest");
            }
        }
    }

    /// Commit on `Ok`, roll back on `Err`, and hand the result back.
    pub async fn settle<T, E>(mut self, result: Result<T, E>) -> Result<T, E> {
        match result {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(err) => {
                self.rollback().await;
                Err(err)
            }
        }
    }
}

/// Run `f` with a fresh unit of work and settle it by `f`'s result.
pub async fn with<T, E, F>(f: F) -> Result<T, E>
where
    F: AsyncFnOnce(&mut UnitOfWork) -> Result<T, E>,
{
    let mut uow = UnitOfWork::new();
    let result = f(&mut uow).await;
    uow.settle(result).await
}
