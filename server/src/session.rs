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

//! Per-connection state, mirroring the teacher's `ConnectionHandler`: a
//! transaction buffer, subscribe bookkeeping, and the write-half mutex
//! the Pub/Sub hub and this connection's own replies share.

use crate::replication::ReplicaHandle;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct Session {
    pub id: u64,
    pub write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
    pub in_transaction: bool,
    /// Queued `(args)` for a `MULTI` block, executed atomically by `EXEC`.
    pub queued: Vec<Vec<Bytes>>,
    pub subscribed: HashSet<Bytes>,
    /// Set once this connection has issued a successful `PSYNC`; from
    /// then on it is a replica link, not an ordinary client.
    pub replica_handle: Option<Arc<ReplicaHandle>>,
}

impl Session {
    pub fn new(write_half: Arc<AsyncMutex<OwnedWriteHalf>>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            write_half,
            in_transaction: false,
            queued: Vec::new(),
            subscribed: HashSet::new(),
            replica_handle: None,
        }
    }

    pub fn is_replica(&self) -> bool {
        self.replica_handle.is_some()
    }
}
