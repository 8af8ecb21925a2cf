/*
 * This file is a part of a Skytable-derived project.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

use crate::store::{Keyspace, Store, StoreResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

/// One pending `BLPOP` caller. Registered under every key it is watching;
/// whichever `RPUSH`/`LPUSH` reaches it first fills `result` and notifies.
#[derive(Default)]
struct Waiter {
    result: Mutex<Option<(Bytes, Bytes)>>,
    notify: Notify,
}

#[derive(Default)]
pub struct ListWaitRegistry {
    queues: Mutex<HashMap<Bytes, VecDeque<Arc<Waiter>>>>,
}

impl ListWaitRegistry {
    fn register(&self, keys: &[Bytes], waiter: &Arc<Waiter>) {
        let mut queues = self.queues.lock();
        for key in keys {
            queues
                .entry(key.clone())
                .or_default()
                .push_back(waiter.clone());
        }
    }

    fn unregister(&self, keys: &[Bytes], waiter: &Arc<Waiter>) {
        let mut queues = self.queues.lock();
        for key in keys {
            if let Some(q) = queues.get_mut(key) {
                q.retain(|w| !Arc::ptr_eq(w, waiter));
                if q.is_empty() {
                    queues.remove(key);
                }
            }
        }
    }

    /// Hands as many of `items` as possible directly to waiters queued on
    /// `key`, in FIFO order, and returns the items that found no waiter
    /// (to be pushed onto the stored list). Must be called with the store
    /// write lock held by the caller.
    pub fn handoff(&self, key: &Bytes, items: Vec<Bytes>) -> (Vec<Bytes>, usize) {
        let mut queues = self.queues.lock();
        let Some(q) = queues.get_mut(key) else {
            return (items, 0);
        };
        let mut handed = 0;
        let mut remaining = Vec::with_capacity(items.len());
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            match q.pop_front() {
                Some(waiter) => {
                    *waiter.result.lock() = Some((key.clone(), item));
                    waiter.notify.notify_one();
                    handed += 1;
                }
                None => {
                    remaining.push(item);
                    remaining.extend(items);
                    break;
                }
            }
        }
        if q.is_empty() {
            queues.remove(key);
        }
        (remaining, handed)
    }
}

/// Pushes `items` onto `key`'s list under an already-held guard, handing
/// as many as possible directly to waiting `BLPOP` callers first. Returns
/// the resulting reported length (stored length plus items handed off).
/// Safe to call while the store's write lock is held by an `EXEC` batch,
/// since the registry's mutex is independent of it.
pub fn push_locked(
    ks: &mut Keyspace,
    registry: &ListWaitRegistry,
    key: &Bytes,
    items: Vec<Bytes>,
    front: bool,
) -> StoreResult<i64> {
    ks.ensure_list_type(key)?;
    let (remaining, handed) = registry.handoff(key, items);
    if !remaining.is_empty() {
        let list = ks.list_mut(key)?;
        for item in remaining {
            if front {
                list.push_front(item);
            } else {
                list.push_back(item);
            }
        }
    }
    let len = ks.llen(key)?;
    Ok(len + handed as i64)
}

/// Top-level `RPUSH`/`LPUSH`: acquires the store lock itself.
pub fn push(store: &Store, registry: &ListWaitRegistry, key: &Bytes, items: Vec<Bytes>, front: bool) -> StoreResult<i64> {
    push_locked(&mut store.write(), registry, key, items, front)
}

/// The non-blocking half of `BLPOP`: pops the first available item across
/// `keys` in order, without registering a waiter. Used both as `BLPOP`'s
/// first attempt and as the whole of its behavior when queued inside
/// `EXEC` (transactions never actually block).
pub fn try_pop_locked(ks: &mut Keyspace, keys: &[Bytes]) -> StoreResult<Option<(Bytes, Bytes)>> {
    for key in keys {
        let popped = ks.lpop(key, 1)?;
        if let Some(item) = popped.into_iter().next() {
            return Ok(Some((key.clone(), item)));
        }
    }
    Ok(None)
}

/// Blocks the caller until one of `keys` yields an item or `timeout`
/// elapses. `timeout = None` waits forever. Only used at the top level —
/// never while a store guard is already held, since it acquires the lock
/// itself both for the initial attempt and implicitly via `push_locked`
/// callers elsewhere.
pub async fn blpop(
    store: &Store,
    registry: &ListWaitRegistry,
    keys: &[Bytes],
    timeout: Option<Duration>,
) -> StoreResult<Option<(Bytes, Bytes)>> {
    let waiter = Arc::new(Waiter::default());
    {
        // Probe and register under the same guard acquisition: a
        // concurrent RPUSH/LPUSH needs this same write lock to land an
        // item, so it can never slip in between the probe finding nothing
        // and the waiter being registered.
        let mut guard = store.write();
        if let Some(found) = try_pop_locked(&mut guard, keys)? {
            return Ok(Some(found));
        }
        registry.register(keys, &waiter);
    }
    match timeout {
        Some(d) => {
            let _ = tokio_timeout(d, waiter.notify.notified()).await;
        }
        None => waiter.notify.notified().await,
    }
    registry.unregister(keys, &waiter);
    let result = waiter.result.lock().take();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn blpop_returns_immediately_when_data_present() {
        let store = Store::new();
        let registry = ListWaitRegistry::default();
        push(&store, &registry, &Bytes::from_static(b"q"), vec![Bytes::from_static(b"x")], false).unwrap();
        let got = blpop(&store, &registry, &[Bytes::from_static(b"q")], None)
            .await
            .unwrap();
        assert_eq!(got, Some((Bytes::from_static(b"q"), Bytes::from_static(b"x"))));
    }

    #[tokio::test]
    async fn blpop_wakes_on_push_without_touching_the_list() {
        let store = Arc::new(Store::new());
        let registry = Arc::new(ListWaitRegistry::default());
        let s2 = store.clone();
        let r2 = registry.clone();
        let handle = tokio::spawn(async move {
            blpop(&s2, &r2, &[Bytes::from_static(b"q")], None).await.unwrap()
        });
        // give the waiter time to register
        tokio::time::sleep(Duration::from_millis(20)).await;
        push(&store, &registry, &Bytes::from_static(b"q"), vec![Bytes::from_static(b"hello")], false).unwrap();
        let got = handle.await.unwrap();
        assert_eq!(got, Some((Bytes::from_static(b"q"), Bytes::from_static(b"hello"))));
        assert_eq!(store.write().llen(b"q").unwrap(), 0);
    }

    #[tokio::test]
    async fn blpop_times_out() {
        let store = Store::new();
        let registry = ListWaitRegistry::default();
        let got = blpop(
            &store,
            &registry,
            &[Bytes::from_static(b"nope")],
            Some(Duration::from_millis(30)),
        )
        .await
        .unwrap();
        assert_eq!(got, None);
    }
}
