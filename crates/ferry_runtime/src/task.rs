use std::future::Future;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};

pub(crate) enum Polled<R> {
    Pending,
    Ready(R),
    /// The task was dropped before it produced a result.
    Lost,
}

/// A future running on the tokio runtime whose result the scheduling
/// thread picks up without blocking.
pub(crate) struct BackgroundTask<R> {
    receiver: oneshot::Receiver<R>,
}

impl<R: Send + 'static> BackgroundTask<R> {
    pub fn spawn<F>(runtime: &Handle, future: F) -> Self
    where
        F: Future<Output = R> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        runtime.spawn(async move {
            let _ = sender.send(future.await);
        });
        Self { receiver }
    }

    pub fn poll(&mut self) -> Polled<R> {
        match self.receiver.try_recv() {
            Ok(result) => Polled::Ready(result),
            Err(TryRecvError::Empty) => Polled::Pending,
            Err(TryRecvError::Closed) => Polled::Lost,
        }
    }
}
