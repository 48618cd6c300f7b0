//! Receivers of finalized summaries
//!
//! The processor publishes every finalized [`Summary`] to each registered
//! [`Observer`], in registration order. An observer that fails does not stop
//! the others from receiving the summary, nor later summaries from being
//! published to it.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::registry::Summary;

/// Errors produced by [`Observer`] implementations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The receiving end has gone away.
    #[error("Observer closed")]
    Closed,
    /// Catch-all for observer specific failures.
    #[error("Observer failed: {0}")]
    Failed(String),
}

/// Trait for receiving finalized summaries
///
/// This trait abstracts where summaries go once a window closes, allowing for
/// channel-based delivery in a running program and in-memory collection for
/// testing.
pub trait Observer: Send {
    /// Receive one finalized summary
    ///
    /// # Errors
    ///
    /// Returns an error if the summary could not be delivered.
    fn observe(&mut self, summary: &Summary) -> Result<(), Error>;
}

impl Observer for mpsc::UnboundedSender<Summary> {
    fn observe(&mut self, summary: &Summary) -> Result<(), Error> {
        self.send(summary.clone()).map_err(|_| Error::Closed)
    }
}

impl Observer for Box<dyn Observer> {
    fn observe(&mut self, summary: &Summary) -> Result<(), Error> {
        (**self).observe(summary)
    }
}

/// Observer built from a closure, see [`from_fn`].
pub struct FromFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Create an [`Observer`] that calls `f` with every summary.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut(&Summary) -> Result<(), Error> + Send,
{
    FromFn { f }
}

impl<F> Observer for FromFn<F>
where
    F: FnMut(&Summary) -> Result<(), Error> + Send,
{
    fn observe(&mut self, summary: &Summary) -> Result<(), Error> {
        (self.f)(summary)
    }
}

#[derive(Debug, Clone, Default)]
/// In-memory observer
///
/// Collects every summary into a shared buffer. Clones share the buffer, so
/// one clone may be registered while another is inspected.
pub struct Collect {
    buffer: Arc<Mutex<Vec<Summary>>>,
}

impl Collect {
    /// Create a new, empty, collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    #[must_use]
    pub fn take(&self) -> Vec<Summary> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Observer for Collect {
    fn observe(&mut self, summary: &Summary) -> Result<(), Error> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(summary.clone());
        Ok(())
    }
}
