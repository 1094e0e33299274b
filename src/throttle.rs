//! Coalescing of bursts of notifications.
//!
//! The playback client may push several notifications in quick succession,
//! for example a seek immediately followed by a resume. A [`Throttle`] keeps
//! only the latest submission and releases it once no newer submission has
//! arrived for a full window. Intermediate submissions are dropped, not
//! batched.
//!
//! # Example
//!
//! ```ignore
//! let mut throttle = Throttle::new(Duration::from_millis(500));
//! throttle.submit(1);
//! throttle.submit(2);
//!
//! // Resolves 500 ms after the last submission.
//! assert_eq!(throttle.fire().await, Some(2));
//! ```

use std::{future, pin::Pin, time::Duration};

use tokio::time::{self, Instant, Sleep};

/// A single re-armable delayed action carrying the latest submission.
#[derive(Debug)]
pub struct Throttle<T> {
    window: Duration,
    pending: Option<T>,

    // Created on first use so that a throttle can be constructed outside of
    // a runtime.
    timer: Option<Pin<Box<Sleep>>>,
}

impl<T> Throttle<T> {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            timer: None,
        }
    }

    /// Queues `item`, replacing any pending one, and re-arms the window.
    pub fn submit(&mut self, item: T) {
        if self.pending.replace(item).is_some() {
            trace!("coalescing pending update");
        }

        let deadline = Instant::now() + self.window;
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().reset(deadline),
            None => self.timer = Some(Box::pin(time::sleep_until(deadline))),
        }
    }

    /// Whether a submission is waiting for its window to elapse.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Drops the pending submission, if any.
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take()
    }

    /// Waits for the window to elapse and takes the pending submission.
    ///
    /// Cancel safe: when dropped before completion, the pending submission
    /// stays queued. Never resolves while nothing is pending, so callers
    /// should guard on [`is_armed`](Self::is_armed).
    pub async fn fire(&mut self) -> Option<T> {
        if self.pending.is_none() {
            return future::pending().await;
        }

        if let Some(timer) = self.timer.as_mut() {
            timer.as_mut().await;
        }

        self.pending.take()
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}
