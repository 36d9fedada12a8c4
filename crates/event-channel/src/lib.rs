//! Thread-safe in-process publish/subscribe event channel.
//!
//! Publishers send plain values; subscribers are plain functions, methods
//! or closures. Neither side wraps anything in framework types.
//!
//! - `EventChannel` - subscriptions, publishing and the background worker
//! - `DispatchPolicy` - serial (`Sequential`) or concurrent (`Parallel`)
//!   handler invocation, or a custom strategy
//! - `IdlePolicy` - keep or drop events sent while the channel is stopped
//! - `Token` - unsubscribes when dropped
//!
//! # Example
//!
//! ```
//! use event_channel::{send, ChannelConfig, EventChannel};
//! use std::sync::{mpsc, Arc, Mutex};
//!
//! struct Thermometer {
//!     readings: Mutex<Vec<f64>>,
//! }
//!
//! impl Thermometer {
//!     fn on_reading(&self, celsius: &f64) {
//!         self.readings.lock().unwrap().push(*celsius);
//!     }
//! }
//!
//! fn log_reading(_celsius: &f64) {}
//!
//! let channel = EventChannel::new(ChannelConfig::default()).unwrap();
//!
//! // Free function.
//! channel.subscribe_fn(log_reading).unwrap();
//!
//! // Method on an object the channel only observes.
//! let thermometer = Arc::new(Thermometer { readings: Mutex::new(Vec::new()) });
//! channel.subscribe_weak(&thermometer, Thermometer::on_reading).unwrap();
//!
//! // Closure, removed again through its tag.
//! let (tx, rx) = mpsc::channel();
//! let tag = channel.subscribe(move |c: &f64| tx.send(*c).unwrap()).unwrap();
//!
//! send!(channel, 21.5).unwrap();
//! assert_eq!(rx.recv().unwrap(), 21.5);
//!
//! channel.unsubscribe(tag).unwrap();
//! channel.stop().unwrap();
//! assert_eq!(*thermometer.readings.lock().unwrap(), vec![21.5]);
//! ```
//!
//! # Key Concepts
//!
//! ## Event identity
//!
//! An event is the tuple of arguments given to `send`. Its type, in order,
//! is the event's key: `send((1, "a".to_string()))` reaches handlers taking
//! `(&i32, &String)` and nothing else. No conversion between argument lists
//! is attempted.
//!
//! ## Staged subscriptions
//!
//! New subscriptions go to a pending map and are merged into the live map by
//! the worker before each batch, so subscribing never waits for dispatch.
//!
//! ## Failure policy
//!
//! Expected races are silent: a weakly held target that has died is simply
//! skipped. A panicking handler is not caught by default: it ends the
//! worker, and the next `stop()` returns `ChannelError::WorkerPanicked`.
//! Turn on `ChannelConfig::isolate_panics` to catch and log handler panics
//! instead.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
mod queue;
mod registry;
pub mod tag;
pub mod token;

pub use channel::EventChannel;
pub use config::{ChannelConfig, DispatchMode, IdlePolicy};
pub use dispatch::{Batch, Delivery, DispatchPolicy, Parallel, Sequential};
pub use error::{ChannelError, Result};
pub use event::{Args, Event, EventTypeKey};
pub use handler::{FreeFn, Handler, Method, Subscriber};
pub use tag::HandlerTag;
pub use token::Token;

/// Sends the given arguments as one event.
///
/// `send!(channel, a, b)` is `channel.send((a, b))`.
#[macro_export]
macro_rules! send {
    ($channel:expr $(, $arg:expr)* $(,)?) => {
        $channel.send(($($arg,)*))
    };
}
