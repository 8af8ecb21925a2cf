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

use crate::store::stream::StreamId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

/// A single `XREAD ... BLOCK` caller's wake signal, shared across every
/// key it is watching — `xadd` on any one of them wakes it exactly once.
#[derive(Default)]
pub struct StreamController {
    fulfilled: Mutex<bool>,
    notify: Notify,
}

struct Registration {
    threshold: StreamId,
    controller: Arc<StreamController>,
}

#[derive(Default)]
pub struct StreamWaitRegistry {
    waiters: Mutex<HashMap<Bytes, Vec<Registration>>>,
}

impl StreamWaitRegistry {
    pub fn register(&self, keys_and_thresholds: &[(Bytes, StreamId)], controller: &Arc<StreamController>) {
        let mut waiters = self.waiters.lock();
        for (key, threshold) in keys_and_thresholds {
            waiters.entry(key.clone()).or_default().push(Registration {
                threshold: *threshold,
                controller: controller.clone(),
            });
        }
    }

    pub fn unregister(&self, keys: &[Bytes], controller: &Arc<StreamController>) {
        let mut waiters = self.waiters.lock();
        for key in keys {
            if let Some(v) = waiters.get_mut(key) {
                v.retain(|r| !Arc::ptr_eq(&r.controller, controller));
                if v.is_empty() {
                    waiters.remove(key);
                }
            }
        }
    }

    /// Called after `xadd` commits `new_id` to `key`; wakes every waiter
    /// whose threshold is now strictly behind the stream.
    pub fn notify_added(&self, key: &Bytes, new_id: StreamId) {
        let waiters = self.waiters.lock();
        let Some(v) = waiters.get(key) else {
            return;
        };
        for reg in v {
            if reg.threshold < new_id {
                let mut fulfilled = reg.controller.fulfilled.lock();
                if !*fulfilled {
                    *fulfilled = true;
                    reg.controller.notify.notify_one();
                }
            }
        }
    }
}

/// Suspends the caller until `notify_added` wakes it or `timeout` elapses.
/// `timeout = None` waits forever.
pub async fn wait(controller: &StreamController, timeout: Option<Duration>) {
    match timeout {
        Some(d) => {
            let _ = tokio_timeout(d, controller.notify.notified()).await;
        }
        None => controller.notify.notified().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wakes_when_threshold_exceeded() {
        let registry = StreamWaitRegistry::default();
        let controller = Arc::new(StreamController::default());
        let key = Bytes::from_static(b"s");
        registry.register(&[(key.clone(), StreamId { ms: 1, seq: 0 })], &controller);
        registry.notify_added(&key, StreamId { ms: 2, seq: 0 });
        wait(&controller, Some(Duration::from_millis(50))).await;
        registry.unregister(&[key], &controller);
    }

    #[tokio::test]
    async fn does_not_wake_below_threshold() {
        let registry = StreamWaitRegistry::default();
        let controller = Arc::new(StreamController::default());
        let key = Bytes::from_static(b"s");
        registry.register(&[(key.clone(), StreamId { ms: 5, seq: 0 })], &controller);
        registry.notify_added(&key, StreamId { ms: 3, seq: 0 });
        assert!(!*controller.fulfilled.lock());
        registry.unregister(&[key], &controller);
    }
}
