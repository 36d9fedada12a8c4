//! Dispatch policies.
//!
//! The worker hands each policy a [`Batch`]: the events it took from the
//! queue, each paired with a snapshot of the subscribers registered for its
//! argument list. No registry lock is held while a policy runs.
//!
//! Order among the subscribers of one event is unspecified.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};

use tracing::{error, trace, warn};

use crate::config::DispatchMode;
use crate::event::Event;
use crate::handler::Subscriber;

/// Strategy for invoking the subscribers of a batch.
///
/// Implement this to plug a custom strategy (a thread pool, say) into
/// [`crate::EventChannel::with_policy`]. Policies should deliver through
/// [`Batch::invoke`] so the channel's panic isolation applies.
pub trait DispatchPolicy: Send + Sync + 'static {
    /// Delivers every event of `batch` to its subscribers.
    fn dispatch(&self, batch: &Batch);
}

/// One event and the subscribers it goes to.
pub struct Delivery {
    event: Event,
    subscribers: Vec<Subscriber>,
}

impl Delivery {
    pub(crate) fn new(event: Event, subscribers: Vec<Subscriber>) -> Self {
        Self { event, subscribers }
    }

    /// The event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Subscribers registered for the event's key; may be empty.
    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }
}

/// Events taken from the queue in one go, in send order.
pub struct Batch {
    deliveries: Vec<Delivery>,
    isolate_panics: bool,
}

impl Batch {
    pub(crate) fn new(deliveries: Vec<Delivery>, isolate_panics: bool) -> Self {
        Self {
            deliveries,
            isolate_panics,
        }
    }

    /// Deliveries in send order.
    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    /// Returns true if the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Runs one subscriber on one event.
    ///
    /// With panic isolation on, a panicking handler is logged and
    /// swallowed. Decode failures are always logged, never raised.
    pub fn invoke(&self, subscriber: &Subscriber, event: &Event) {
        let outcome = if self.isolate_panics {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.call(event))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    error!(
                        event = %event.key(),
                        tag = %subscriber.tag(),
                        panic = %panic_message(payload.as_ref()),
                        "handler panicked"
                    );
                    return;
                }
            }
        } else {
            subscriber.call(event)
        };

        if let Err(e) = outcome {
            error!(
                event = %event.key(),
                tag = %subscriber.tag(),
                error = %e,
                "handler rejected event"
            );
        }
    }
}

/// Invokes the subscribers of each event one after the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl DispatchPolicy for Sequential {
    fn dispatch(&self, batch: &Batch) {
        for delivery in batch.deliveries() {
            for subscriber in delivery.subscribers() {
                batch.invoke(subscriber, delivery.event());
            }
        }
    }
}

/// Invokes the subscribers of each event concurrently, one thread each.
///
/// All of an event's handlers finish before the next event starts. Without
/// panic isolation, a handler panic is re-raised once its siblings are done.
/// A handler whose thread cannot be spawned runs on the worker instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

impl DispatchPolicy for Parallel {
    fn dispatch(&self, batch: &Batch) {
        for delivery in batch.deliveries() {
            let event = delivery.event();
            match delivery.subscribers() {
                [] => {}
                [only] => batch.invoke(only, event),
                subscribers => {
                    trace!(event = %event.key(), tasks = subscribers.len(), "fanning out");
                    let failure = thread::scope(|scope| {
                        fan_out(scope, batch, event, subscribers, spawn_task)
                            .into_iter()
                            .filter_map(|task| task.join().err())
                            .last()
                    });

                    if let Some(payload) = failure {
                        panic::resume_unwind(payload);
                    }
                }
            }
        }
    }
}

type Task<'env> = Box<dyn FnOnce() + Send + 'env>;

type Spawn<'scope, 'env> =
    fn(&'scope Scope<'scope, 'env>, Task<'env>) -> io::Result<ScopedJoinHandle<'scope, ()>>;

fn spawn_task<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    task: Task<'env>,
) -> io::Result<ScopedJoinHandle<'scope, ()>> {
    thread::Builder::new().spawn_scoped(scope, task)
}

/// Starts one task per subscriber. A subscriber whose task cannot be
/// spawned is invoked on the calling thread before moving on.
fn fan_out<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    batch: &'env Batch,
    event: &'env Event,
    subscribers: &'env [Subscriber],
    spawn: Spawn<'scope, 'env>,
) -> Vec<ScopedJoinHandle<'scope, ()>> {
    let mut tasks = Vec::with_capacity(subscribers.len());
    for subscriber in subscribers {
        match spawn(scope, Box::new(move || batch.invoke(subscriber, event))) {
            Ok(task) => tasks.push(task),
            Err(e) => {
                warn!(
                    event = %event.key(),
                    tag = %subscriber.tag(),
                    error = %e,
                    "could not spawn handler thread; running inline"
                );
                batch.invoke(subscriber, event);
            }
        }
    }
    tasks
}

impl DispatchMode {
    /// The built-in policy for this mode.
    pub fn policy(self) -> Arc<dyn DispatchPolicy> {
        match self {
            DispatchMode::Sequential => Arc::new(Sequential),
            DispatchMode::Parallel => Arc::new(Parallel),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
