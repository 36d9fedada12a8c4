//! Subscriber registry.
//!
//! Two maps of the same shape, `pending` and `active`, each behind its own
//! lock. Subscribing only touches `pending`, so it never waits for the
//! worker. The worker folds `pending` into `active` once per batch.
//!
//! # Lock order
//!
//! Every operation that needs both maps takes `active` first, then
//! `pending`, through [`Registry::lock_both`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::dispatch::{Batch, Delivery};
use crate::error::{ChannelError, Result};
use crate::event::{Event, EventTypeKey};
use crate::handler::Subscriber;
use crate::tag::HandlerTag;

type Bucket = HashMap<HandlerTag, Subscriber>;
type Buckets = HashMap<EventTypeKey, Bucket>;

/// Pending and active subscriber maps.
#[derive(Default)]
pub(crate) struct Registry {
    active: Mutex<Buckets>,
    pending: Mutex<Buckets>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stages `subscriber` under `key`, replacing any entry with its tag.
    pub(crate) fn register(&self, key: EventTypeKey, subscriber: Subscriber) -> Result<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

        let tag = subscriber.tag();
        pending.entry(key).or_default().insert(tag, subscriber);

        debug!(event = %key, tag = %tag, "subscriber registered");
        Ok(())
    }

    /// Removes `tag` from the `key` bucket of both maps.
    ///
    /// Returns true if an entry was removed.
    pub(crate) fn remove(&self, key: &EventTypeKey, tag: HandlerTag) -> Result<bool> {
        let (mut active, mut pending) = self.lock_both()?;

        let removed_active = remove_from(&mut active, key, tag);
        let removed_pending = remove_from(&mut pending, key, tag);
        let removed = removed_active || removed_pending;

        debug!(event = %key, tag = %tag, removed, "subscriber removed");
        Ok(removed)
    }

    /// Removes `tag` from every bucket of both maps.
    ///
    /// Used when only the tag is known; costs a scan of every bucket.
    pub(crate) fn remove_tag(&self, tag: HandlerTag) -> Result<bool> {
        let (mut active, mut pending) = self.lock_both()?;

        let mut removed = false;
        for buckets in [&mut *active, &mut *pending] {
            for bucket in buckets.values_mut() {
                removed |= bucket.remove(&tag).is_some();
            }
            buckets.retain(|_, bucket| !bucket.is_empty());
        }

        debug!(tag = %tag, removed, "subscriber removed by tag");
        Ok(removed)
    }

    /// Moves every pending entry into the active map and empties `pending`.
    ///
    /// Returns the number of entries moved.
    pub(crate) fn merge(&self) -> Result<usize> {
        let (mut active, mut pending) = self.lock_both()?;

        let mut moved = 0;
        for (key, bucket) in pending.drain() {
            moved += bucket.len();
            active.entry(key).or_default().extend(bucket);
        }

        if moved > 0 {
            debug!(moved, "merged pending subscribers");
        }
        Ok(moved)
    }

    /// Pairs each event with a snapshot of its active subscribers.
    ///
    /// An event whose key has no bucket gets an empty delivery.
    pub(crate) fn collect(&self, events: Vec<Event>, isolate_panics: bool) -> Result<Batch> {
        let active = self
            .active
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;

        let deliveries = events
            .into_iter()
            .map(|event| {
                let subscribers = active
                    .get(&event.key())
                    .map(|bucket| bucket.values().cloned().collect())
                    .unwrap_or_default();
                Delivery::new(event, subscribers)
            })
            .collect::<Vec<_>>();

        trace!(events = deliveries.len(), "collected batch");
        Ok(Batch::new(deliveries, isolate_panics))
    }

    /// Number of subscribers across both maps.
    pub(crate) fn len(&self) -> Result<usize> {
        let (active, pending) = self.lock_both()?;
        Ok(count(&active) + count(&pending))
    }

    /// Number of subscribers for `key` across both maps.
    pub(crate) fn len_for(&self, key: &EventTypeKey) -> Result<usize> {
        let (active, pending) = self.lock_both()?;
        let in_map = |buckets: &Buckets| buckets.get(key).map(Bucket::len).unwrap_or(0);
        Ok(in_map(&*active) + in_map(&*pending))
    }

    fn lock_both(&self) -> Result<(MutexGuard<'_, Buckets>, MutexGuard<'_, Buckets>)> {
        let active = self
            .active
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;
        let pending = self
            .pending
            .lock()
            .map_err(|e| ChannelError::LockPoisoned(e.to_string()))?;
        Ok((active, pending))
    }
}

fn remove_from(buckets: &mut Buckets, key: &EventTypeKey, tag: HandlerTag) -> bool {
    let Some(bucket) = buckets.get_mut(key) else {
        return false;
    };
    let removed = bucket.remove(&tag).is_some();
    if bucket.is_empty() {
        buckets.remove(key);
    }
    removed
}

fn count(buckets: &Buckets) -> usize {
    buckets.values().map(Bucket::len).sum()
}
