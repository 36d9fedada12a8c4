//! Channel configuration.

use serde::{Deserialize, Serialize};

/// Default name given to the worker thread.
pub const DEFAULT_THREAD_NAME: &str = "event-channel";

/// How handlers registered for one event are invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One handler after the other, on the worker thread.
    #[default]
    Sequential,
    /// All handlers of an event at once, joined before the next event.
    Parallel,
}

/// What happens to events sent while the channel is stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Retain them and deliver once the channel is started again.
    #[default]
    KeepEvents,
    /// Discard them, along with anything still queued at `stop()`.
    DropEvents,
}

/// Configuration for an event channel.
///
/// Fixed for the lifetime of the channel it was given to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Built-in dispatch policy.
    pub dispatch: DispatchMode,
    /// Idle policy.
    pub idle_policy: IdlePolicy,
    /// Start the worker as part of construction.
    pub autostart: bool,
    /// Catch handler panics so one faulty handler cannot kill dispatch.
    ///
    /// Off by default: a panicking handler takes the worker down and the
    /// next `stop()` reports [`crate::ChannelError::WorkerPanicked`].
    pub isolate_panics: bool,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Sequential,
            idle_policy: IdlePolicy::KeepEvents,
            autostart: true,
            isolate_panics: false,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ChannelConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dispatch mode.
    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the idle policy.
    pub fn with_idle_policy(mut self, idle_policy: IdlePolicy) -> Self {
        self.idle_policy = idle_policy;
        self
    }

    /// Sets whether construction starts the worker.
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Sets whether handler panics are caught and logged.
    pub fn with_isolate_panics(mut self, isolate: bool) -> Self {
        self.isolate_panics = isolate;
        self
    }

    /// Sets the worker thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
