//! End-to-end delivery scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use event_channel::{
    send, Batch, ChannelConfig, ChannelError, DispatchMode, DispatchPolicy, EventChannel,
    IdlePolicy,
};

const WAIT: Duration = Duration::from_secs(2);

/// Records every value it receives and reports each one on a channel.
struct Receiver32 {
    values: Mutex<Vec<i32>>,
    ack: Mutex<Option<Sender<i32>>>,
}

impl Receiver32 {
    fn new(ack: Sender<i32>) -> Self {
        Self {
            values: Mutex::new(Vec::new()),
            ack: Mutex::new(Some(ack)),
        }
    }

    fn receive(&self, v: &i32) {
        self.values.lock().unwrap().push(*v);
        if let Some(ack) = self.ack.lock().unwrap().as_ref() {
            let _ = ack.send(*v);
        }
    }

    fn values(&self) -> Vec<i32> {
        self.values.lock().unwrap().clone()
    }
}

static FREE_FN_SINK: Mutex<Option<Sender<i32>>> = Mutex::new(None);

fn free_fn(v: &i32) {
    if let Some(tx) = FREE_FN_SINK.lock().unwrap().as_ref() {
        let _ = tx.send(*v);
    }
}

fn channel_with(dispatch: DispatchMode) -> EventChannel {
    EventChannel::new(ChannelConfig::new().with_dispatch(dispatch)).unwrap()
}

/// Sends a marker of a private type and waits for it; every event sent
/// earlier from this thread has been dispatched when this returns.
fn flush(channel: &EventChannel) {
    struct Marker;

    let (tx, rx) = mpsc::channel();
    let _token = channel
        .subscribe_scoped(move |_: &Marker| {
            let _ = tx.send(());
        })
        .unwrap();
    channel.send((Marker,)).unwrap();
    rx.recv_timeout(WAIT).unwrap();
}

fn drain(rx: &Receiver<i32>) -> Vec<i32> {
    rx.try_iter().collect()
}

#[test]
fn test_function_then_method_then_unsubscribe() {
    let channel = channel_with(DispatchMode::Sequential);
    let (fn_tx, fn_rx) = mpsc::channel();
    *FREE_FN_SINK.lock().unwrap() = Some(fn_tx);

    channel.subscribe_fn(free_fn).unwrap();
    channel.send((1,)).unwrap();
    assert_eq!(fn_rx.recv_timeout(WAIT).unwrap(), 1);

    let (obj_tx, obj_rx) = mpsc::channel();
    let object = Arc::new(Receiver32::new(obj_tx));
    channel.subscribe_method(&object, Receiver32::receive).unwrap();
    channel.send((2,)).unwrap();
    assert_eq!(fn_rx.recv_timeout(WAIT).unwrap(), 2);
    assert_eq!(obj_rx.recv_timeout(WAIT).unwrap(), 2);

    assert!(channel
        .unsubscribe_method(&object, Receiver32::receive)
        .unwrap());
    channel.send((4,)).unwrap();
    assert_eq!(fn_rx.recv_timeout(WAIT).unwrap(), 4);
    flush(&channel);
    assert!(drain(&obj_rx).is_empty());
    assert_eq!(object.values(), vec![2]);

    assert!(channel.unsubscribe_fn(free_fn).unwrap());
    *FREE_FN_SINK.lock().unwrap() = None;
}

static POINTER_LOG: Mutex<Vec<&str>> = Mutex::new(Vec::new());

fn first_pointer_target(v: &i32) {
    POINTER_LOG.lock().unwrap().push(if *v > 0 { "first" } else { "first:neg" });
}

fn second_pointer_target(v: &i32) {
    POINTER_LOG.lock().unwrap().push(if *v > 0 { "second" } else { "second:neg" });
}

#[test]
fn test_distinct_fn_pointers_are_separate_subscriptions() {
    let channel = channel_with(DispatchMode::Sequential);
    let pointers: Vec<fn(&i32)> = vec![first_pointer_target, second_pointer_target];

    for pointer in &pointers {
        channel.subscribe_fn(*pointer).unwrap();
    }
    assert_eq!(channel.subscriber_count_for::<(i32,)>().unwrap(), 2);

    channel.send((1,)).unwrap();
    flush(&channel);
    let mut seen = std::mem::take(&mut *POINTER_LOG.lock().unwrap());
    seen.sort();
    assert_eq!(seen, vec!["first", "second"]);

    assert!(channel.unsubscribe_fn(pointers[0]).unwrap());
    channel.send((1,)).unwrap();
    flush(&channel);
    assert_eq!(*POINTER_LOG.lock().unwrap(), vec!["second"]);
}

#[test]
fn test_capturing_closure_needs_subscribe() {
    static THRESHOLD: i32 = 3;
    let channel = channel_with(DispatchMode::Sequential);
    let threshold: &'static i32 = &THRESHOLD;

    let result = channel.subscribe_fn(move |v: &i32| {
        let _ = *v > *threshold;
    });

    assert!(matches!(result, Err(ChannelError::NotAFunction(_))));
    assert_eq!(channel.subscriber_count().unwrap(), 0);
}

#[test]
fn test_three_receivers_each_get_one_copy() {
    for mode in [DispatchMode::Sequential, DispatchMode::Parallel] {
        let channel = channel_with(mode);
        let (tx, rx) = mpsc::channel();
        let receivers: Vec<_> = (0..3)
            .map(|_| Arc::new(Receiver32::new(tx.clone())))
            .collect();
        for r in &receivers {
            channel.subscribe_method(r, Receiver32::receive).unwrap();
        }

        channel.send((22,)).unwrap();
        for _ in 0..3 {
            assert_eq!(rx.recv_timeout(WAIT).unwrap(), 22);
        }
        channel.stop().unwrap();

        for r in &receivers {
            assert_eq!(r.values(), vec![22]);
        }
    }
}

#[test]
fn test_many_messages_many_receivers() {
    for mode in [DispatchMode::Sequential, DispatchMode::Parallel] {
        let channel = channel_with(mode);
        let (tx, rx) = mpsc::channel();
        let receivers: Vec<_> = (0..3)
            .map(|_| Arc::new(Receiver32::new(tx.clone())))
            .collect();
        for r in &receivers {
            channel.subscribe_weak(r, Receiver32::receive).unwrap();
        }

        for _ in 0..3 {
            send!(channel, 22).unwrap();
        }
        for _ in 0..9 {
            assert_eq!(rx.recv_timeout(WAIT).unwrap(), 22);
        }

        for r in &receivers {
            assert_eq!(r.values(), vec![22, 22, 22]);
        }
    }
}

#[test]
fn test_closures_receive_strings() {
    let channel = channel_with(DispatchMode::Sequential);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut tags = Vec::new();
    for i in 0..3 {
        let seen = seen.clone();
        let tag = channel
            .subscribe(move |s: &String| seen.lock().unwrap().push(format!("{i}:{s}")))
            .unwrap();
        tags.push(tag);
    }

    send!(channel, "orange".to_string()).unwrap();
    flush(&channel);

    let mut seen_now = seen.lock().unwrap().clone();
    seen_now.sort();
    assert_eq!(seen_now, vec!["0:orange", "1:orange", "2:orange"]);

    for tag in tags {
        assert!(channel.unsubscribe(tag).unwrap());
    }
    assert_eq!(channel.subscriber_count_for::<(String,)>().unwrap(), 0);
}

#[test]
fn test_parallel_handlers_finish_before_next_event() {
    let channel = channel_with(DispatchMode::Parallel);
    let barrier = Arc::new(Barrier::new(3));
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let barrier = barrier.clone();
        let log = log.clone();
        channel
            .subscribe(move |v: &i32| {
                // Only passes if all three run together.
                barrier.wait();
                thread::sleep(Duration::from_millis(5 * i));
                log.lock().unwrap().push(*v);
            })
            .unwrap();
    }

    channel.send((1,)).unwrap();
    channel.send((2,)).unwrap();
    flush(&channel);

    let log = log.lock().unwrap();
    assert_eq!(*log, vec![1, 1, 1, 2, 2, 2]);
}

#[test]
fn test_weak_subscriber_stops_when_target_dies() {
    let channel = channel_with(DispatchMode::Sequential);
    let (tx, rx) = mpsc::channel();
    let target = Arc::new(Receiver32::new(tx));
    let observer = Arc::downgrade(&target);

    channel.subscribe_weak(&target, Receiver32::receive).unwrap();
    channel.send((1,)).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);

    drop(target);
    assert!(observer.upgrade().is_none());

    channel.send((2,)).unwrap();
    flush(&channel);
    assert!(drain(&rx).is_empty());

    // Still registered until removed explicitly.
    assert_eq!(channel.subscriber_count_for::<(i32,)>().unwrap(), 1);
}

#[test]
fn test_strong_subscriber_keeps_target_alive() {
    let channel = channel_with(DispatchMode::Sequential);
    let (tx, _rx) = mpsc::channel();
    let target = Arc::new(Receiver32::new(tx));

    channel.subscribe_method(&target, Receiver32::receive).unwrap();
    assert_eq!(Arc::strong_count(&target), 2);

    channel
        .unsubscribe_method(&target, Receiver32::receive)
        .unwrap();
    assert_eq!(Arc::strong_count(&target), 1);
}

#[test]
fn test_keep_events_resumes_delivery() {
    let channel = EventChannel::new(
        ChannelConfig::new()
            .with_autostart(false)
            .with_idle_policy(IdlePolicy::KeepEvents),
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();
    channel.subscribe(move |v: &i32| tx.send(*v).unwrap()).unwrap();

    for v in [1, 2, 3] {
        channel.send((v,)).unwrap();
    }
    thread::sleep(Duration::from_millis(20));
    assert!(drain(&rx).is_empty());

    channel.start().unwrap();
    let got: Vec<i32> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(got, vec![1, 2, 3]);
}

#[test]
fn test_drop_events_never_delivered() {
    let channel = EventChannel::new(
        ChannelConfig::new().with_idle_policy(IdlePolicy::DropEvents),
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();
    channel.subscribe(move |v: &i32| tx.send(*v).unwrap()).unwrap();

    channel.stop().unwrap();
    channel.send((1,)).unwrap();
    channel.start().unwrap();
    channel.send((2,)).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
    flush(&channel);
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_token_drop_unsubscribes_once() {
    let channel = channel_with(DispatchMode::Sequential);
    let hits = Arc::new(AtomicUsize::new(0));

    let h = hits.clone();
    let token = channel
        .subscribe_scoped(move |_: &i32| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(channel.subscriber_count().unwrap(), 1);

    channel.send((1,)).unwrap();
    flush(&channel);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    drop(token);
    assert_eq!(channel.subscriber_count().unwrap(), 0);

    channel.send((2,)).unwrap();
    flush(&channel);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_moved_token_unsubscribes_only_from_new_owner() {
    let channel = channel_with(DispatchMode::Sequential);
    let (tx, _rx) = mpsc::channel();
    let target = Arc::new(Receiver32::new(tx));

    let mut token = channel
        .subscribe_method_scoped(&target, Receiver32::receive)
        .unwrap();
    let moved = std::mem::take(&mut token);

    drop(token);
    assert_eq!(channel.subscriber_count().unwrap(), 1);

    moved.release();
    assert_eq!(channel.subscriber_count().unwrap(), 0);
}

#[test]
fn test_scoped_function_and_weak_tokens() {
    let channel = channel_with(DispatchMode::Sequential);
    let (tx, _rx) = mpsc::channel();
    let target = Arc::new(Receiver32::new(tx));

    let fn_token = channel.subscribe_fn_scoped(free_fn).unwrap();
    let weak_token = channel
        .subscribe_weak_scoped(&target, Receiver32::receive)
        .unwrap();
    assert_eq!(channel.subscriber_count_for::<(i32,)>().unwrap(), 2);

    drop(weak_token);
    assert_eq!(channel.subscriber_count_for::<(i32,)>().unwrap(), 1);
    drop(fn_token);
    assert_eq!(channel.subscriber_count_for::<(i32,)>().unwrap(), 0);
}

#[test]
fn test_token_outliving_channel_is_harmless() {
    let channel = channel_with(DispatchMode::Sequential);
    let token = channel.subscribe_scoped(|_: &i32| {}).unwrap();

    drop(channel);
    drop(token);
}

#[test]
fn test_argument_lists_do_not_mix() {
    let channel = channel_with(DispatchMode::Sequential);
    let (tx, rx) = mpsc::channel();

    channel.subscribe(move |v: &i32| tx.send(*v).unwrap()).unwrap();

    channel.send((1u32,)).unwrap();
    channel.send((1i64,)).unwrap();
    channel.send((1, 2)).unwrap();
    channel.send((3,)).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 3);
    flush(&channel);
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_send_without_subscribers_is_noop() {
    let channel = channel_with(DispatchMode::Parallel);
    let (tx, rx) = mpsc::channel();

    channel.send(("nobody listens",)).unwrap();
    let tag = channel.subscribe(move |v: &u8| tx.send(*v).unwrap()).unwrap();
    channel.unsubscribe(tag).unwrap();
    channel.send((9u8,)).unwrap();

    flush(&channel);
    assert!(rx.try_recv().is_err());
    assert!(channel.is_running().unwrap());
}

#[test]
fn test_concurrent_publishers_deliver_everything() {
    let channel = Arc::new(channel_with(DispatchMode::Sequential));
    let per_thread: Arc<Mutex<Vec<Vec<i32>>>> = Arc::new(Mutex::new(vec![Vec::new(); 4]));

    let sink = per_thread.clone();
    channel
        .subscribe(move |thread_id: &usize, v: &i32| {
            sink.lock().unwrap()[*thread_id].push(*v);
        })
        .unwrap();

    let publishers: Vec<_> = (0..4usize)
        .map(|t| {
            let channel = channel.clone();
            thread::spawn(move || {
                for v in 0..50 {
                    channel.send((t, v)).unwrap();
                }
            })
        })
        .collect();
    for p in publishers {
        p.join().unwrap();
    }
    flush(&channel);

    let per_thread = per_thread.lock().unwrap();
    for values in per_thread.iter() {
        assert_eq!(*values, (0..50).collect::<Vec<_>>());
    }
}

#[test]
fn test_subscribe_while_dispatching_does_not_block() {
    let channel = Arc::new(channel_with(DispatchMode::Sequential));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    channel
        .subscribe(move || {
            entered_tx.send(()).unwrap();
            let _ = release_rx.lock().unwrap().recv_timeout(WAIT);
        })
        .unwrap();
    channel.send(()).unwrap();
    entered_rx.recv_timeout(WAIT).unwrap();

    // The worker is parked inside the handler; subscribing must still work.
    let (tx, rx) = mpsc::channel();
    channel.subscribe(move |v: &i32| tx.send(*v).unwrap()).unwrap();
    channel.send((5,)).unwrap();

    release_tx.send(()).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 5);
}

#[test]
fn test_panicking_handler_is_isolated_when_enabled() {
    for mode in [DispatchMode::Sequential, DispatchMode::Parallel] {
        let channel = EventChannel::new(
            ChannelConfig::new()
                .with_dispatch(mode)
                .with_isolate_panics(true),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel();

        channel.subscribe(|_: &i32| panic!("faulty handler")).unwrap();
        channel.subscribe(move |v: &i32| tx.send(*v).unwrap()).unwrap();

        channel.send((1,)).unwrap();
        channel.send((2,)).unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 1);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
        channel.stop().unwrap();
    }
}

/// Polls until the worker has gone idle.
fn wait_until_idle(channel: &EventChannel) {
    for _ in 0..200 {
        if !channel.is_running().unwrap() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("worker still running");
}

#[test]
fn test_handler_panic_ends_worker_by_default() {
    for mode in [DispatchMode::Sequential, DispatchMode::Parallel] {
        let channel = EventChannel::new(
            ChannelConfig::new()
                .with_dispatch(mode)
                .with_idle_policy(IdlePolicy::DropEvents),
        )
        .unwrap();
        let seen = Arc::new(AtomicUsize::new(0));

        channel.subscribe(|_: &i32| panic!("faulty handler")).unwrap();
        let s = seen.clone();
        channel
            .subscribe(move |_: &i32| {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        channel.send((1,)).unwrap();
        wait_until_idle(&channel);

        // A dead worker counts as stopped, so the idle policy applies.
        channel.send((2,)).unwrap();
        assert_eq!(channel.queued_events().unwrap(), 0);

        assert!(matches!(
            channel.stop(),
            Err(ChannelError::WorkerPanicked)
        ));
        assert!(seen.load(Ordering::SeqCst) <= 1);
    }
}

/// Counts batches and runs everything inline.
struct CountingPolicy {
    batches: Arc<AtomicUsize>,
}

impl DispatchPolicy for CountingPolicy {
    fn dispatch(&self, batch: &Batch) {
        self.batches.fetch_add(1, Ordering::SeqCst);
        for delivery in batch.deliveries() {
            for subscriber in delivery.subscribers() {
                batch.invoke(subscriber, delivery.event());
            }
        }
    }
}

#[test]
fn test_custom_policy() {
    let batches = Arc::new(AtomicUsize::new(0));
    let channel = EventChannel::with_policy(
        ChannelConfig::new().with_autostart(false),
        CountingPolicy {
            batches: batches.clone(),
        },
    )
    .unwrap();
    let (tx, rx) = mpsc::channel();
    channel.subscribe(move |v: &i32| tx.send(*v).unwrap()).unwrap();

    for v in 0..5 {
        channel.send((v,)).unwrap();
    }
    channel.start().unwrap();

    let got: Vec<i32> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(got, vec![0, 1, 2, 3, 4]);
    // All five were queued before the worker started, so one batch.
    assert_eq!(batches.load(Ordering::SeqCst), 1);
}
