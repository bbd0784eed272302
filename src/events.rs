//! In-process cache invalidation bus.
//!
//! When one part of the app invalidates a story's cached copy, every
//! observer for that story id (typically an open reader screen) gets
//! notified so it can re-check cache status instead of trusting an in-flight
//! result. Delivery is synchronous within the emitting call; ordering across
//! subscribers is unspecified.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<HashMap<String, Vec<(u64, Callback)>>>,
    next_id: Mutex<u64>,
}

impl BusInner {
    fn remove(&self, story_id: &str, id: u64) {
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(list) = subs.get_mut(story_id) {
            list.retain(|(sub_id, _)| *sub_id != id);
            // Free the bucket when the last listener leaves
            if list.is_empty() {
                subs.remove(story_id);
            }
        }
    }
}

#[derive(Default)]
pub struct InvalidationBus {
    inner: Arc<BusInner>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one story id. The returned subscription
    /// unsubscribes when dropped (or explicitly via [`Subscription::unsubscribe`]).
    pub fn subscribe(
        &self,
        story_id: &str,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut next = self.inner.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .entry(story_id.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            story_id: story_id.to_string(),
            id,
        }
    }

    /// Notify every subscriber for `story_id`. No subscribers is a no-op.
    pub fn emit(&self, story_id: &str) {
        // Clone the callbacks out so a callback that re-enters the bus
        // (subscribing or unsubscribing) doesn't deadlock.
        let callbacks: Vec<Callback> = {
            let subs = self.inner.subscribers.lock().unwrap();
            match subs.get(story_id) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        for cb in callbacks {
            cb(story_id);
        }
    }

    /// Number of story ids with at least one live subscriber.
    pub fn bucket_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }
}

/// Handle for one bus registration; dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<BusInner>,
    story_id: String,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.story_id, self.id);
        }
    }
}
