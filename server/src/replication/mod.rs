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

//! Primary-side replica bookkeeping and write propagation, plus the
//! replica-side handshake and command-stream consumer.

pub mod primary;
pub mod replica;

use crate::config::Role;
use crate::protocol::encode_command;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;

/// A connected replica, as seen from the primary. `write_half` is shared
/// with that connection's `Session` rather than owned here, so the
/// session's own replies (there are none, once it's a replica, besides
/// `REPLCONF ACK`) and propagated writes serialize through one mutex.
pub struct ReplicaHandle {
    pub write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
    pub ack_offset: AtomicU64,
}

/// Process-wide replication bookkeeping. One instance lives in `Shared`
/// regardless of role; the fields that matter depend on `role`.
pub struct ReplicationState {
    pub role: Role,
    pub master_replid: String,
    pub primary_repl_offset: AtomicU64,
    pub replicas: Mutex<Vec<Arc<ReplicaHandle>>>,
    pub ack_notify: Notify,
    /// Ordered propagation queue: `enqueue_propagation`/`send_getack` push
    /// onto it synchronously (no `.await`, no spawned task per write), and
    /// a single background task (`run_propagation_loop`, started once from
    /// `main::run`) drains it and writes frames to every replica in the
    /// order they were enqueued.
    queue: mpsc::UnboundedSender<Bytes>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl ReplicationState {
    pub fn new(role: Role) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            role,
            master_replid: generate_replid(),
            primary_repl_offset: AtomicU64::new(0),
            replicas: Mutex::new(Vec::new()),
            ack_notify: Notify::new(),
            queue,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn offset(&self) -> u64 {
        self.primary_repl_offset.load(Ordering::SeqCst)
    }

    pub fn add_replica(&self, handle: Arc<ReplicaHandle>) {
        self.replicas.lock().push(handle);
    }

    pub fn remove_replica(&self, handle: &Arc<ReplicaHandle>) {
        self.replicas.lock().retain(|h| !Arc::ptr_eq(h, handle));
    }

    pub fn record_ack(&self, handle: &Arc<ReplicaHandle>, offset: u64) {
        handle.ack_offset.store(offset, Ordering::SeqCst);
        self.ack_notify.notify_waiters();
    }

    /// Takes the receiving half of the propagation queue. Only ever
    /// returns `Some` once — called by `main::run` to hand the queue off
    /// to the single background drain task.
    pub fn take_propagation_receiver(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.receiver.lock().take()
    }

    fn enqueue_frame(&self, frame: Bytes) {
        let _ = self.queue.send(frame);
    }

    /// Advances the offset and queues a write command's original raw
    /// frame bytes for delivery to every connected replica. A no-op on a
    /// replica, which never propagates what it applies from its own
    /// primary. Both the offset bump and the enqueue happen synchronously
    /// here, at the call site that still has the write just applied in
    /// hand — not inside the draining task — so a `WAIT` issued right
    /// after sees the new offset immediately, and two writes from the
    /// same client can never reorder racing for a replica's socket.
    pub fn enqueue_propagation(&self, frame: Bytes) {
        if self.role != Role::Primary {
            return;
        }
        self.primary_repl_offset
            .fetch_add(frame.len() as u64, Ordering::SeqCst);
        self.enqueue_frame(frame);
    }

    /// Queues a `REPLCONF GETACK *` behind whatever writes are already
    /// queued, so it reaches each replica only after everything enqueued
    /// before it.
    fn send_getack(&self) {
        self.enqueue_frame(encode_command(&[b"REPLCONF", b"GETACK", b"*"]));
    }

    /// Drains the propagation queue forever, writing each frame to every
    /// connected replica in the order it was enqueued. Replicas whose
    /// write fails are dropped (best-effort). Runs as a single background
    /// task for the process's lifetime.
    pub async fn run_propagation_loop(&self, mut rx: mpsc::UnboundedReceiver<Bytes>) {
        while let Some(frame) = rx.recv().await {
            let replicas: Vec<Arc<ReplicaHandle>> = self.replicas.lock().clone();
            let mut dead = Vec::new();
            for r in &replicas {
                let mut w = r.write_half.lock().await;
                if w.write_all(&frame).await.is_err() {
                    dead.push(r.clone());
                }
            }
            if !dead.is_empty() {
                let mut replicas = self.replicas.lock();
                replicas.retain(|h| !dead.iter().any(|d| Arc::ptr_eq(d, h)));
            }
        }
    }

    /// Implements `WAIT`: solicits an ACK from every replica via
    /// `REPLCONF GETACK *`, then waits until at least `num_replicas` have
    /// acknowledged `required` bytes, or `timeout` elapses, returning the
    /// count actually reached.
    pub async fn wait_for_acks(&self, required: u64, num_replicas: usize, timeout: Duration) -> usize {
        self.send_getack();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let reached = self
                .replicas
                .lock()
                .iter()
                .filter(|h| h.ack_offset.load(Ordering::SeqCst) >= required)
                .count();
            if reached >= num_replicas {
                return reached;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return reached;
            }
            let _ = tokio::time::timeout(deadline - now, self.ack_notify.notified()).await;
        }
    }
}

fn generate_replid() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replid_is_40_hex_chars() {
        let id = generate_replid();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
