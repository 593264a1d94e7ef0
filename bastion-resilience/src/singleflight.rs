//! Shared, detached execution of a single future
//!
//! The future handed to [`spawn_shared`] runs on its own tokio task. Every
//! clone of the returned handle observes the same outcome, and dropping any
//! clone (or every clone) never cancels the underlying work. Use
//! [`spawn_shared_abortable`] when the owner needs to stop it explicitly.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use tokio::task::AbortHandle;

/// Shared handle to the outcome of a spawned operation
pub type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// The spawned task panicked or was aborted before producing a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation aborted before completion: {0}")]
pub struct OperationAborted(pub String);

/// Spawn `fut` onto the runtime and return a cloneable handle to its outcome.
///
/// Must be called from within a tokio runtime.
pub fn spawn_shared<F, T, E>(fut: F) -> SharedOutcome<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<OperationAborted> + 'static,
{
    spawn_shared_abortable(fut).0
}

/// Like [`spawn_shared`], also returning a handle that cancels the task.
///
/// Waiters on an aborted task resolve to [`OperationAborted`].
pub fn spawn_shared_abortable<F, T, E>(fut: F) -> (SharedOutcome<T, E>, AbortHandle)
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<OperationAborted> + 'static,
{
    let handle = tokio::spawn(fut);
    let abort = handle.abort_handle();

    let outcome = async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(E::from(OperationAborted(join_error.to_string()))),
        }
    }
    .boxed()
    .shared();

    (outcome, abort)
}
