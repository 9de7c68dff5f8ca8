//! One-shot completion of asynchronous capability calls.
//!
//! Every async operation hands out a [`Resolver`] to whoever performs the
//! native work. `resolve` consumes the resolver, so a result is delivered at
//! most once; dropping an unresolved resolver delivers [`BridgeError::Shutdown`],
//! so it is also delivered at least once.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{BridgeError, Result};

type Completion<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Completion side of an async call.
pub struct Resolver<T> {
    complete: Option<Completion<T>>,
}

impl<T> Resolver<T> {
    /// Build a resolver that runs `f` with the outcome.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Self {
            complete: Some(Box::new(f)),
        }
    }

    pub fn resolve(mut self, result: Result<T>) {
        if let Some(complete) = self.complete.take() {
            complete(result);
        }
    }

    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, err: BridgeError) {
        self.resolve(Err(err));
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if let Some(complete) = self.complete.take() {
            complete(Err(BridgeError::Shutdown));
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.complete.is_none())
            .finish()
    }
}

/// Caller side of an async call made from native code.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<Result<T>>,
}

/// Create a connected resolver/pending pair.
pub fn pending<T: Send + 'static>() -> (Resolver<T>, Pending<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let resolver = Resolver::from_fn(move |result| {
        // The caller may have given up on the result.
        let _ = tx.send(result);
    });
    (resolver, Pending { rx })
}

impl<T> Pending<T> {
    /// The outcome, if the call has completed.
    pub fn try_take(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BridgeError::Shutdown)),
        }
    }

    /// Block until the call completes.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().unwrap_or(Err(BridgeError::Shutdown))
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(BridgeError::Shutdown)),
        }
    }
}
