use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};

use crate::Error;

/// A spawned task owned by one bridge invocation. Dropping it aborts the task.
pub(crate) struct PumpTask<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> PumpTask<T> {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }
}

impl<T> Future for PumpTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().handle).poll(cx)
    }
}

impl<T> Drop for PumpTask<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Unwraps a joined task: panics resume on the awaiting side, a cancelled task
/// reads as a disconnect.
pub(crate) fn join_result<T>(joined: Result<Result<T, Error>, JoinError>) -> Result<T, Error> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(Error::Disconnect),
    }
}
