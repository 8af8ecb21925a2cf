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

//! Primary-side handling of `PSYNC`: the handshake completes in the
//! connection's normal command loop (`PING`/`REPLCONF` are ordinary
//! commands), but `PSYNC` hands control here for the `FULLRESYNC` reply
//! and the raw RDB blob transfer, and registers the session as a replica.

use super::{ReplicaHandle, ReplicationState};
use crate::rdb;
use crate::store::Store;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

/// Writes `+FULLRESYNC <replid> <offset>\r\n` followed by the RDB
/// snapshot framed as a bulk string with no trailing CRLF, then registers
/// `write_half` as a replica. Returns the handle so the caller (the
/// connection's session loop) can keep it alive and remove it on
/// disconnect.
pub async fn handle_psync(
    repl: &ReplicationState,
    store: &Store,
    write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
) -> std::io::Result<Arc<ReplicaHandle>> {
    let offset = repl.offset();
    let snapshot = rdb::dump(store);
    {
        let mut w = write_half.lock().await;
        let header = format!("+FULLRESYNC {} {}\r\n", repl.master_replid, offset);
        w.write_all(header.as_bytes()).await?;
        let blob_header = format!("${}\r\n", snapshot.len());
        w.write_all(blob_header.as_bytes()).await?;
        w.write_all(&snapshot).await?;
    }
    let handle = Arc::new(ReplicaHandle {
        write_half,
        ack_offset: AtomicU64::new(0),
    });
    repl.add_replica(handle.clone());
    Ok(handle)
}
