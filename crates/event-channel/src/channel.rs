//! The event channel: subscriptions, publishing and the worker thread.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, trace, warn};

use crate::config::{ChannelConfig, IdlePolicy};
use crate::dispatch::DispatchPolicy;
use crate::error::{ChannelError, Result};
use crate::event::{Args, Event, EventTypeKey};
use crate::handler::{FreeFn, Handler, Method, Subscriber};
use crate::queue::EventQueue;
use crate::registry::Registry;
use crate::tag::HandlerTag;
use crate::token::Token;

thread_local! {
    /// Address of the channel state whose worker runs on this thread, or 0.
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

/// State shared between the channel handle and its worker.
struct Shared {
    config: ChannelConfig,
    policy: Arc<dyn DispatchPolicy>,
    registry: Arc<Registry>,
    queue: EventQueue,
}

impl Shared {
    fn on_worker_thread(self: &Arc<Self>) -> bool {
        let me = Arc::as_ptr(self) as usize;
        WORKER_OF.with(|w| w.get() == me)
    }
}

/// Thread-safe publish/subscribe channel.
///
/// Publishers call [`send`](Self::send) with a tuple of arguments; a single
/// background worker delivers it to every subscriber registered for exactly
/// that argument list. Subscribers may be free functions, methods bound to
/// an object held strongly or weakly, or arbitrary closures.
///
/// # Concurrency
///
/// - Any number of threads may subscribe, unsubscribe and send at once.
/// - Subscribing never waits for dispatch: new subscribers are staged and
///   picked up by the worker before its next batch.
/// - Events from one publishing thread are delivered in send order.
/// - [`stop`](Self::stop) blocks until the worker has finished its current
///   batch. A handler that never returns therefore blocks `stop` too.
///
/// # Example
///
/// ```
/// use event_channel::{ChannelConfig, EventChannel};
/// use std::sync::mpsc;
///
/// let channel = EventChannel::new(ChannelConfig::default()).unwrap();
/// let (tx, rx) = mpsc::channel();
///
/// channel
///     .subscribe(move |n: &i32, s: &String| {
///         tx.send(format!("{n} {s}")).unwrap();
///     })
///     .unwrap();
///
/// event_channel::send!(channel, 3, "apples".to_string()).unwrap();
///
/// assert_eq!(rx.recv().unwrap(), "3 apples");
/// ```
pub struct EventChannel {
    shared: Arc<Shared>,
    /// Worker handle; the lock also serializes `start` against `stop`.
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Source of tags for opaque callables, private to this channel.
    next_tag: AtomicU64,
}

impl EventChannel {
    /// Creates a channel using the dispatch policy named in `config`.
    ///
    /// Starts the worker unless `config.autostart` is false.
    pub fn new(config: ChannelConfig) -> Result<Self> {
        let policy = config.dispatch.policy();
        Self::build(config, policy)
    }

    /// Creates a channel with a custom dispatch policy.
    ///
    /// `config.dispatch` is ignored.
    pub fn with_policy<P: DispatchPolicy>(config: ChannelConfig, policy: P) -> Result<Self> {
        Self::build(config, Arc::new(policy))
    }

    fn build(config: ChannelConfig, policy: Arc<dyn DispatchPolicy>) -> Result<Self> {
        let autostart = config.autostart;
        let channel = Self {
            shared: Arc::new(Shared {
                config,
                policy,
                registry: Arc::new(Registry::new()),
                queue: EventQueue::new(),
            }),
            worker: Mutex::new(None),
            next_tag: AtomicU64::new(0),
        };

        if autostart {
            channel.start()?;
        }
        Ok(channel)
    }

    /// Starts dispatching events.
    ///
    /// Does nothing if the worker is already running.
    pub fn start(&self) -> Result<()> {
        if self.shared.on_worker_thread() {
            return Ok(());
        }

        let mut worker = self
            .worker
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

        if !self.shared.queue.begin()? {
            trace!("event channel already running");
            return Ok(());
        }

        // A worker that exited on its own (a handler panic without
        // isolation) leaves its handle behind.
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                warn!("previous worker had panicked; restarting");
            }
        }

        info!(thread = %self.shared.config.thread_name, "starting event channel");

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || run(shared));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                debug!("event channel started");
                Ok(())
            }
            Err(e) => {
                self.shared.queue.halt(IdlePolicy::KeepEvents)?;
                Err(ChannelError::Spawn(e))
            }
        }
    }

    /// Stops dispatching events and waits for the worker to exit.
    ///
    /// The batch being dispatched is finished first. Events still queued are
    /// kept or dropped according to the idle policy. Resume with
    /// [`start`](Self::start).
    ///
    /// Fails with [`ChannelError::StopFromWorker`] when called from a
    /// handler of this channel.
    pub fn stop(&self) -> Result<()> {
        if self.shared.on_worker_thread() {
            return Err(ChannelError::StopFromWorker);
        }

        let mut worker = self
            .worker
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

        let dropped = self.shared.queue.halt(self.shared.config.idle_policy)?;
        if dropped > 0 {
            debug!(dropped, "dropped queued events on stop");
        }

        let Some(handle) = worker.take() else {
            return Ok(());
        };

        info!("stopping event channel");
        handle.join().map_err(|_| ChannelError::WorkerPanicked)?;
        info!("event channel stopped");

        Ok(())
    }

    /// Returns true while the worker is accepting events for dispatch.
    pub fn is_running(&self) -> Result<bool> {
        self.shared.queue.is_processing()
    }

    /// Number of events waiting for the worker.
    pub fn queued_events(&self) -> Result<usize> {
        self.shared.queue.len()
    }

    /// Number of subscriptions, staged or live.
    pub fn subscriber_count(&self) -> Result<usize> {
        self.shared.registry.len()
    }

    /// Number of subscriptions for the argument list `A`, staged or live.
    pub fn subscriber_count_for<A: Args>(&self) -> Result<usize> {
        self.shared.registry.len_for(&A::key())
    }

    /// The configuration this channel was built with.
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Publishes `args` to every subscriber of its argument list.
    ///
    /// Never blocks on dispatch. While the channel is stopped, the event is
    /// kept or silently dropped according to the idle policy. Use the
    /// [`send!`](crate::send) macro to avoid spelling out the tuple.
    pub fn send<A: Args>(&self, args: A) -> Result<()> {
        let event = Event::encode(args);
        let key = event.key();

        if self.shared.queue.push(event, self.shared.config.idle_policy)? {
            trace!(event = %key, "event queued");
        } else {
            debug!(event = %key, "channel stopped; event dropped");
        }
        Ok(())
    }

    /// Subscribes a free function: a fn item or a fn pointer.
    ///
    /// Fn items are identified by their type and fn pointers by their
    /// address (see [`FreeFn`]). Subscribing the same function again
    /// replaces the earlier subscription, and
    /// [`unsubscribe_fn`](Self::unsubscribe_fn) removes it. Closures that
    /// capture state belong in [`subscribe`](Self::subscribe).
    pub fn subscribe_fn<A, F>(&self, function: F) -> Result<()>
    where
        A: Args,
        F: FreeFn<A>,
    {
        let tag = function.tag()?;
        self.shared
            .registry
            .register(A::key(), Subscriber::handler(tag, function))
    }

    /// Subscribes `method` bound to `target`.
    ///
    /// The channel keeps `target` alive until the subscription is removed.
    pub fn subscribe_method<T, A, M>(&self, target: &Arc<T>, method: M) -> Result<()>
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        let tag = HandlerTag::of_method::<T, M>(Arc::as_ptr(target));
        self.shared.registry.register(
            A::key(),
            Subscriber::method(tag, Arc::clone(target), method),
        )
    }

    /// Subscribes `method` bound to `target` without owning `target`.
    ///
    /// Once every strong reference to `target` is gone the subscription
    /// stops firing. It stays registered until unsubscribed.
    pub fn subscribe_weak<T, A, M>(&self, target: &Arc<T>, method: M) -> Result<()>
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        let tag = HandlerTag::of_method::<T, M>(Arc::as_ptr(target));
        self.shared.registry.register(
            A::key(),
            Subscriber::weak_method(tag, Arc::downgrade(target), method),
        )
    }

    /// Subscribes an arbitrary callable.
    ///
    /// Returns the tag to pass to [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<A, H>(&self, handler: H) -> Result<HandlerTag>
    where
        A: Args,
        H: Handler<A>,
    {
        let tag = HandlerTag::from_counter(self.next_tag.fetch_add(1, Ordering::Relaxed));
        self.shared
            .registry
            .register(A::key(), Subscriber::handler(tag, handler))?;
        Ok(tag)
    }

    /// Like [`subscribe_fn`](Self::subscribe_fn), unsubscribing when the
    /// returned token is dropped.
    pub fn subscribe_fn_scoped<A, F>(&self, function: F) -> Result<Token>
    where
        A: Args,
        F: FreeFn<A>,
    {
        let tag = function.tag()?;
        self.subscribe_fn(function)?;
        Ok(self.token(Some(A::key()), tag))
    }

    /// Like [`subscribe_method`](Self::subscribe_method), unsubscribing when
    /// the returned token is dropped.
    pub fn subscribe_method_scoped<T, A, M>(&self, target: &Arc<T>, method: M) -> Result<Token>
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        self.subscribe_method(target, method)?;
        let tag = HandlerTag::of_method::<T, M>(Arc::as_ptr(target));
        Ok(self.token(Some(A::key()), tag))
    }

    /// Like [`subscribe_weak`](Self::subscribe_weak), unsubscribing when the
    /// returned token is dropped.
    pub fn subscribe_weak_scoped<T, A, M>(&self, target: &Arc<T>, method: M) -> Result<Token>
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        self.subscribe_weak(target, method)?;
        let tag = HandlerTag::of_method::<T, M>(Arc::as_ptr(target));
        Ok(self.token(Some(A::key()), tag))
    }

    /// Like [`subscribe`](Self::subscribe), unsubscribing when the returned
    /// token is dropped.
    pub fn subscribe_scoped<A, H>(&self, handler: H) -> Result<Token>
    where
        A: Args,
        H: Handler<A>,
    {
        let tag = self.subscribe(handler)?;
        Ok(self.token(None, tag))
    }

    /// Removes a free function subscribed with
    /// [`subscribe_fn`](Self::subscribe_fn).
    ///
    /// Returns true if it was subscribed.
    pub fn unsubscribe_fn<A, F>(&self, function: F) -> Result<bool>
    where
        A: Args,
        F: FreeFn<A>,
    {
        self.shared.registry.remove(&A::key(), function.tag()?)
    }

    /// Removes `method` bound to `target`, whether it was subscribed
    /// strongly or weakly.
    ///
    /// Returns true if it was subscribed.
    pub fn unsubscribe_method<T, A, M>(&self, target: &Arc<T>, _method: M) -> Result<bool>
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        let tag = HandlerTag::of_method::<T, M>(Arc::as_ptr(target));
        self.shared.registry.remove(&A::key(), tag)
    }

    /// Removes a weak subscription made with
    /// [`subscribe_weak`](Self::subscribe_weak).
    pub fn unsubscribe_weak<T, A, M>(&self, target: &Arc<T>, method: M) -> Result<bool>
    where
        T: Send + Sync + 'static,
        A: Args,
        M: Method<T, A>,
    {
        self.unsubscribe_method(target, method)
    }

    /// Removes the callable subscribed under `tag`.
    ///
    /// Scans every argument list, so it costs one lookup per bucket.
    pub fn unsubscribe(&self, tag: HandlerTag) -> Result<bool> {
        self.shared.registry.remove_tag(tag)
    }

    fn token(&self, key: Option<EventTypeKey>, tag: HandlerTag) -> Token {
        let registry = Arc::downgrade(&self.shared.registry);

        Token::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let removed = match key {
                Some(key) => registry.remove(&key, tag),
                None => registry.remove_tag(tag),
            };
            if let Err(e) = removed {
                warn!(tag = %tag, error = %e, "token failed to unsubscribe");
            }
        })
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        match self.stop() {
            Ok(()) => {}
            Err(ChannelError::StopFromWorker) => {
                // Dropped by one of its own handlers: let the worker finish
                // the batch and exit on its own.
                if let Err(e) = self.shared.queue.halt(self.shared.config.idle_policy) {
                    warn!(error = %e, "failed to halt event channel on drop");
                }
                debug!("event channel dropped from its worker; detaching");
            }
            Err(e) => warn!(error = %e, "failed to stop event channel on drop"),
        }
    }
}

/// Marks the worker's thread while it runs and halts the queue when the
/// loop ends, including by a handler panic unwinding through it.
struct WorkerGuard<'a> {
    shared: &'a Shared,
}

impl<'a> WorkerGuard<'a> {
    fn enter(shared: &'a Arc<Shared>) -> Self {
        WORKER_OF.with(|w| w.set(Arc::as_ptr(shared) as usize));
        Self { shared }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        WORKER_OF.with(|w| w.set(0));
        if thread::panicking() {
            error!("handler panicked; worker exiting");
        }
        if let Err(e) = self.shared.queue.halt(self.shared.config.idle_policy) {
            warn!(error = %e, "failed to halt event queue on worker exit");
        }
    }
}

/// Worker loop: wait for events, fold in new subscribers, dispatch.
fn run(shared: Arc<Shared>) {
    let _guard = WorkerGuard::enter(&shared);
    debug!("worker running");

    loop {
        let events = match shared.queue.next_batch() {
            Ok(Some(events)) => events,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "event queue unavailable; worker exiting");
                break;
            }
        };

        if let Err(e) = shared.registry.merge() {
            error!(error = %e, "failed to merge subscribers; worker exiting");
            break;
        }

        let batch = match shared
            .registry
            .collect(events, shared.config.isolate_panics)
        {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "failed to collect subscribers; worker exiting");
                break;
            }
        };

        trace!(events = batch.len(), "dispatching batch");
        shared.policy.dispatch(&batch);
    }

    debug!("worker exited");
}
