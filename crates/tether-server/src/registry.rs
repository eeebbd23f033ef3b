//! Session lookup with heap-ordered expiry.
//!
//! Every registered item with a TTL has one heap entry keyed by its expiry
//! time. Keep-alives never touch the heap: [`SessionRegistry::promote`]
//! only records a later deadline on the map entry, and the sweep
//! reschedules such entries lazily when their stale root comes up.
//!
//! Heap entries may outlive their map entry (after `remove`) or be
//! superseded by a newer one (after a reschedule or re-add). The sweep
//! recognises both by comparing the popped time with the map entry's
//! current expiry and drops the mismatches.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::SessionId;
use tokio::time::Instant;
use tracing::debug;

/// Verdict of an item's expiry hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Still in use; reschedule for another TTL.
    Keep,
    /// Gone; drop it from the registry.
    Release,
}

/// Something the registry can expire.
pub trait Expirable: Send + Sync + 'static {
    /// Registry key.
    fn key(&self) -> &SessionId;

    /// Called when the item expires (`forced == false`) or is removed
    /// explicitly (`forced == true`). Forced removal ignores the verdict.
    ///
    /// Runs without the registry lock held.
    fn on_delete(self: &Arc<Self>, forced: bool) -> Retention;
}

struct Entry<T> {
    item: Arc<T>,
    ttl: Option<Duration>,
    expiry: Option<Instant>,
    promoted: Option<Instant>,
}

struct Inner<T> {
    by_id: HashMap<SessionId, Entry<T>>,
    heap: BinaryHeap<Reverse<(Instant, SessionId)>>,
}

impl<T> Inner<T> {
    fn schedule(&mut self, id: &SessionId, at: Instant) {
        if let Some(entry) = self.by_id.get_mut(id) {
            entry.expiry = Some(at);
            entry.promoted = None;
            self.heap.push(Reverse((at, id.clone())));
        }
    }
}

/// Keyed collection of live sessions with TTL-based expiry.
pub struct SessionRegistry<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Expirable> SessionRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                heap: BinaryHeap::new(),
            }),
        }
    }

    /// Register `item`. With a TTL it expires `ttl` from now unless
    /// promoted; without one it lives until removed.
    ///
    /// Replaces (without notifying) any item registered under the same key.
    pub fn add(&self, item: Arc<T>, ttl: Option<Duration>) -> Option<Arc<T>> {
        let id = item.key().clone();
        let mut inner = self.inner.lock();
        let previous = inner.by_id.insert(
            id.clone(),
            Entry {
                item,
                ttl,
                expiry: None,
                promoted: None,
            },
        );
        if let Some(ttl) = ttl {
            inner.schedule(&id, Instant::now() + ttl);
        }
        previous.map(|entry| entry.item)
    }

    /// Return the item registered under `id`, creating and registering it
    /// with `make` if there is none. The flag is `true` when it was created.
    pub fn get_or_insert_with(
        &self,
        id: &SessionId,
        ttl: Option<Duration>,
        make: impl FnOnce() -> Arc<T>,
    ) -> (Arc<T>, bool) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.by_id.get(id) {
            return (entry.item.clone(), false);
        }
        let item = make();
        let _ = inner.by_id.insert(
            id.clone(),
            Entry {
                item: item.clone(),
                ttl,
                expiry: None,
                promoted: None,
            },
        );
        if let Some(ttl) = ttl {
            inner.schedule(id, Instant::now() + ttl);
        }
        (item, true)
    }

    /// Look up an item.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.inner.lock().by_id.get(id).map(|e| e.item.clone())
    }

    /// Push the item's deadline to a full TTL from now. O(1).
    ///
    /// Returns `false` for unknown IDs.
    pub fn promote(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.get_mut(id) {
            Some(entry) => {
                if let Some(ttl) = entry.ttl {
                    entry.promoted = Some(Instant::now() + ttl);
                }
                true
            }
            None => false,
        }
    }

    /// Remove an item and run its forced delete hook.
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        let item = self.inner.lock().by_id.remove(id).map(|e| e.item)?;
        let _ = item.on_delete(true);
        Some(item)
    }

    /// Remove the item under `id` only if `pred` holds for it. No hook runs.
    pub fn remove_where(&self, id: &str, pred: impl FnOnce(&T) -> bool) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        if !inner.by_id.get(id).is_some_and(|e| pred(&e.item)) {
            return None;
        }
        inner.by_id.remove(id).map(|e| e.item)
    }

    /// Remove every item, running each forced delete hook.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<T>> = {
            let mut inner = self.inner.lock();
            inner.heap.clear();
            inner.by_id.drain().map(|(_, e)| e.item).collect()
        };
        for item in &drained {
            let _ = item.on_delete(true);
        }
        drained.len()
    }

    /// Number of registered items.
    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all registered items.
    pub fn items(&self) -> Vec<Arc<T>> {
        self.inner
            .lock()
            .by_id
            .values()
            .map(|e| e.item.clone())
            .collect()
    }

    /// Expire everything whose effective deadline is at or before `now`.
    ///
    /// Returns the IDs that were released.
    pub fn sweep(&self, now: Instant) -> Vec<SessionId> {
        let candidates = self.collect_expired(now);
        if candidates.is_empty() {
            return Vec::new();
        }

        let verdicts: Vec<(Arc<T>, Retention)> = candidates
            .into_iter()
            .map(|item| {
                let verdict = item.on_delete(false);
                (item, verdict)
            })
            .collect();

        let mut released = Vec::new();
        let mut inner = self.inner.lock();
        for (item, verdict) in verdicts {
            let id = item.key();
            // replaced while the hook ran
            if !inner.by_id.get(id).is_some_and(|e| Arc::ptr_eq(&e.item, &item)) {
                continue;
            }
            match verdict {
                Retention::Keep => {
                    let Some(entry) = inner.by_id.get(id) else {
                        continue;
                    };
                    let fallback = now + entry.ttl.unwrap_or_default();
                    let at = entry.promoted.map_or(fallback, |p| p.max(fallback));
                    inner.schedule(id, at);
                }
                Retention::Release => {
                    let _ = inner.by_id.remove(id);
                    released.push(id.clone());
                }
            }
        }
        if !released.is_empty() {
            debug!(released = released.len(), remaining = inner.by_id.len(), "sweep");
        }
        released
    }

    /// Pop expired heap roots, rescheduling promoted ones, and return the
    /// items whose deadline genuinely passed.
    fn collect_expired(&self, now: Instant) -> Vec<Arc<T>> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();

        while let Some(Reverse((at, _))) = inner.heap.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((at, id))) = inner.heap.pop() else {
                break;
            };
            let Some(entry) = inner.by_id.get_mut(&id) else {
                continue;
            };
            if entry.expiry != Some(at) {
                continue;
            }
            match entry.promoted {
                Some(promoted) if promoted > now => inner.schedule(&id, promoted),
                _ => {
                    // unscheduled until the verdict is in
                    entry.expiry = None;
                    expired.push(entry.item.clone());
                }
            }
        }
        expired
    }
}

impl<T: Expirable> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use proptest::prelude::*;

    struct Item {
        id: SessionId,
        busy: AtomicBool,
        deletes: AtomicUsize,
        forced: AtomicUsize,
    }

    impl Item {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: SessionId::from(id),
                busy: AtomicBool::new(false),
                deletes: AtomicUsize::new(0),
                forced: AtomicUsize::new(0),
            })
        }
    }

    impl Expirable for Item {
        fn key(&self) -> &SessionId {
            &self.id
        }

        fn on_delete(self: &Arc<Self>, forced: bool) -> Retention {
            let _ = self.deletes.fetch_add(1, Ordering::SeqCst);
            if forced {
                let _ = self.forced.fetch_add(1, Ordering::SeqCst);
                return Retention::Release;
            }
            if self.busy.load(Ordering::SeqCst) {
                Retention::Keep
            } else {
                Retention::Release
            }
        }
    }

    const TTL: Duration = Duration::from_secs(5);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_ttl() {
        let reg = SessionRegistry::new();
        let item = Item::new("a");
        let _ = reg.add(item.clone(), Some(TTL));

        let start = Instant::now();
        assert!(reg.sweep(start + secs(4)).is_empty());
        let released = reg.sweep(start + secs(5));
        assert_eq!(released, vec![SessionId::from("a")]);
        assert!(reg.get("a").is_none());
        assert_eq!(item.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_ttl_never_expires() {
        let reg = SessionRegistry::new();
        let _ = reg.add(Item::new("a"), None);
        assert!(reg.sweep(Instant::now() + secs(3600)).is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn promote_defers_expiry() {
        let reg = SessionRegistry::new();
        let _ = reg.add(Item::new("a"), Some(TTL));

        tokio::time::advance(secs(3)).await;
        assert!(reg.promote("a"));
        tokio::time::advance(secs(3)).await;
        assert!(reg.sweep(Instant::now()).is_empty());
        assert!(reg.get("a").is_some());

        tokio::time::advance(secs(2)).await;
        assert_eq!(reg.sweep(Instant::now()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_promotion_survives_many_sweeps() {
        let reg = SessionRegistry::new();
        let _ = reg.add(Item::new("s1"), Some(TTL));

        for _ in 0..10 {
            tokio::time::advance(secs(2)).await;
            assert!(reg.promote("s1"));
            assert!(reg.sweep(Instant::now()).is_empty());
        }
        assert!(reg.get("s1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_verdict_reschedules() {
        let reg = SessionRegistry::new();
        let item = Item::new("a");
        item.busy.store(true, Ordering::SeqCst);
        let _ = reg.add(item.clone(), Some(TTL));

        let start = Instant::now();
        assert!(reg.sweep(start + secs(5)).is_empty());
        assert!(reg.get("a").is_some());
        // rescheduled a full TTL after the sweep
        assert!(reg.sweep(start + secs(9)).is_empty());

        item.busy.store(false, Ordering::SeqCst);
        assert_eq!(reg.sweep(start + secs(10)).len(), 1);
        assert_eq!(item.deletes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_items_leave_dangling_heap_entries() {
        let reg = SessionRegistry::new();
        let item = Item::new("a");
        let _ = reg.add(item.clone(), Some(TTL));
        assert!(reg.remove("a").is_some());
        assert_eq!(item.forced.load(Ordering::SeqCst), 1);

        assert!(reg.sweep(Instant::now() + secs(10)).is_empty());
        assert_eq!(item.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn re_added_id_ignores_stale_heap_entry() {
        let reg = SessionRegistry::new();
        let _ = reg.add(Item::new("a"), Some(TTL));
        tokio::time::advance(secs(3)).await;
        let fresh = Item::new("a");
        let _ = reg.add(fresh.clone(), Some(TTL));

        // the first entry's deadline passes, the fresh one's has not
        tokio::time::advance(secs(3)).await;
        assert!(reg.sweep(Instant::now()).is_empty());
        assert_eq!(fresh.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_insert_with_reuses_existing() {
        let reg = SessionRegistry::new();
        let id = SessionId::from("a");
        let (first, created) = reg.get_or_insert_with(&id, Some(TTL), || Item::new("a"));
        assert!(created);
        let (second, created) = reg.get_or_insert_with(&id, Some(TTL), || Item::new("a"));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_where_checks_predicate() {
        let reg = SessionRegistry::new();
        let item = Item::new("a");
        let _ = reg.add(item.clone(), None);
        assert!(reg.remove_where("a", |i| i.busy.load(Ordering::SeqCst)).is_none());
        assert!(reg.remove_where("a", |_| true).is_some());
        assert!(reg.is_empty());
        assert_eq!(item.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_forces_every_item() {
        let reg = SessionRegistry::new();
        let a = Item::new("a");
        let b = Item::new("b");
        let _ = reg.add(a.clone(), Some(TTL));
        let _ = reg.add(b.clone(), None);
        assert_eq!(reg.clear(), 2);
        assert_eq!(a.forced.load(Ordering::SeqCst), 1);
        assert_eq!(b.forced.load(Ordering::SeqCst), 1);
        assert!(reg.sweep(Instant::now() + secs(60)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_releases_in_deadline_order() {
        let reg = SessionRegistry::new();
        let _ = reg.add(Item::new("late"), Some(secs(3)));
        let _ = reg.add(Item::new("early"), Some(secs(1)));
        let _ = reg.add(Item::new("never"), Some(secs(30)));

        let released = reg.sweep(Instant::now() + secs(10));
        assert_eq!(released, vec![SessionId::from("early"), SessionId::from("late")]);
        assert_eq!(reg.len(), 1);
    }

    proptest! {
        #[test]
        fn promoted_before_each_sweep_is_never_released(steps in prop::collection::vec(1u64..5, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let reg = SessionRegistry::new();
                let _ = reg.add(Item::new("p"), Some(TTL));
                for step in steps {
                    tokio::time::advance(secs(step)).await;
                    let _ = reg.promote("p");
                    assert!(reg.sweep(Instant::now()).is_empty());
                }
                assert!(reg.get("p").is_some());
            });
        }
    }
}
