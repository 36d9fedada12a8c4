//! Event queue shared by publishers and the worker.
//!
//! A `Mutex` guards both the buffered events and the run flag, so the
//! worker's wake-up predicate sees them consistently. A `Condvar` wakes
//! the worker on new events and on halt.

use std::sync::{Condvar, Mutex};

use crate::config::IdlePolicy;
use crate::error::{ChannelError, Result};
use crate::event::Event;

struct QueueState {
    /// Events waiting for the worker, in send order.
    events: Vec<Event>,
    /// Whether a worker is (or is about to be) draining the queue.
    processing: bool,
}

/// Ordered buffer of events awaiting dispatch.
pub(crate) struct EventQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: Vec::new(),
                processing: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends `event` unless the queue is halted and `idle` drops events.
    ///
    /// Returns false if the event was discarded.
    pub(crate) fn push(&self, event: Event, idle: IdlePolicy) -> Result<bool> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

            if !state.processing && idle == IdlePolicy::DropEvents {
                return Ok(false);
            }
            state.events.push(event);
        }

        self.ready.notify_one();
        Ok(true)
    }

    /// Marks the queue as processing.
    ///
    /// Returns false if it already was.
    pub(crate) fn begin(&self) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

        if state.processing {
            return Ok(false);
        }
        state.processing = true;
        Ok(true)
    }

    /// Clears the processing flag and wakes the worker so it can exit.
    ///
    /// Under [`IdlePolicy::DropEvents`] the buffered events are discarded;
    /// returns how many.
    pub(crate) fn halt(&self, idle: IdlePolicy) -> Result<usize> {
        let dropped = {
            let mut state = self
                .state
                .lock()
                .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

            state.processing = false;
            match idle {
                IdlePolicy::DropEvents => {
                    let dropped = state.events.len();
                    state.events.clear();
                    dropped
                }
                IdlePolicy::KeepEvents => 0,
            }
        };

        self.ready.notify_all();
        Ok(dropped)
    }

    /// Blocks until events are available or the queue is halted.
    ///
    /// Returns `None` once halted, otherwise takes the whole buffer, leaving
    /// it empty for publishers. Spurious wake-ups re-check the predicate.
    pub(crate) fn next_batch(&self) -> Result<Option<Vec<Event>>> {
        let state = self
            .state
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

        let mut state = self
            .ready
            .wait_while(state, |s| s.processing && s.events.is_empty())
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

        if !state.processing {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut state.events)))
    }

    /// Number of buffered events.
    pub(crate) fn len(&self) -> Result<usize> {
        self.state
            .lock()
            .map(|s| s.events.len())
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))
    }

    /// Returns true while the queue is marked as processing.
    pub(crate) fn is_processing(&self) -> Result<bool> {
        self.state
            .lock()
            .map(|s| s.processing)
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))
    }
}
