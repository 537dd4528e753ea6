//! Cancellation
//!
//! A [`CancelSource`] owns the only sender of a zero-traffic channel;
//! dropping or cancelling it disconnects every [`CancelToken`]. Waits are
//! `recv_timeout` calls, so a sleeping backoff wakes immediately.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Mutex;
use std::time::Duration;

/// Owner side of a cancellation signal
#[derive(Debug)]
pub struct CancelSource {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Observer side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    receiver: Receiver<()>,
    // Only set for `never()` tokens, which keep their own channel open
    _keepalive: Option<Sender<()>>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Token observing this source
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.receiver.clone(),
            _keepalive: None,
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token().is_cancelled()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            receiver,
            _keepalive: Some(sender),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `duration` or until cancelled.
    ///
    /// Returns `true` when cancellation ended the wait.
    pub fn wait(&self, duration: Duration) -> bool {
        match self.receiver.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
            // Nothing sends on this channel
            Ok(()) => false,
        }
    }
}
