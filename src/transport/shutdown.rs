//! One-shot, idempotent shutdown broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::protocol::{Error, Result};

/// Cloneable handle to a one-shot shutdown broadcast.
///
/// The broadcast is a channel that never carries a message; closing drops its
/// only sender, which disconnects every receiver at once. A `select!` arm on
/// [`ShutdownSignal::receiver`] therefore fires for every task parked on it.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug)]
struct SignalInner {
    closed: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    /// Create an open signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(SignalInner {
                closed: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Fire the signal.
    ///
    /// The first call returns `Ok(())`; every later call returns
    /// [`Error::AlreadyClosed`] without side effects.
    pub fn close(&self) -> Result<()> {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyClosed);
        }

        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    /// Whether the signal has fired (non-blocking).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Receiver that becomes disconnected once the signal fires.
    ///
    /// Intended for `crossbeam_channel::select!`; it never yields a value.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Block until the signal fires.
    pub fn wait(&self) {
        // Only ever returns Err(Disconnected) since nothing is sent.
        let _ = self.inner.receiver.recv();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
