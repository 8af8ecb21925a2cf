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

//! The accept loop: one semaphore-bounded `tokio::spawn`ed task per
//! connection, each driving its own `Session` through the protocol
//! `FrameReader` and `dispatch::dispatch` until the socket closes.

use crate::db::Db;
use crate::dispatch;
use crate::protocol::FrameReader;
use crate::session::Session;
use crate::util::error::{Error, SkyResult};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Semaphore};

/// Caps the number of simultaneously open connections, mirroring the
/// teacher's listener — a fixed, generous ceiling rather than a tunable,
/// since this crate has no broader connection-limit configuration story.
const MAX_CONNECTIONS: usize = 10_000;

pub struct Server {
    db: Db,
    listener: TcpListener,
    climit: Arc<Semaphore>,
    signal: broadcast::Sender<()>,
}

impl Server {
    pub async fn bind(db: Db) -> SkyResult<Self> {
        let port = db.shared.config.port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| Error::bind(e, format!("0.0.0.0:{port}")))?;
        let (signal, _) = broadcast::channel(1);
        Ok(Self {
            db,
            listener,
            climit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            signal,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// A sender the caller can use to broadcast a shutdown signal; pair
    /// with a receiver future passed to `run`.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.signal.clone()
    }

    /// Runs the accept loop until `shutdown` resolves. Errors accepting a
    /// single connection are logged and retried with a short backoff
    /// rather than bringing the whole server down.
    pub async fn run(&self, mut shutdown: impl std::future::Future<Output = ()> + Unpin) {
        loop {
            let permit = match self.climit.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return, // semaphore closed: shutting down
            };
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting connections");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let db = self.db.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(db, stream).await {
                                    warn!("connection {addr} ended with error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept failed: {e}");
                            drop(permit);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }
    }
}

/// One connection's command loop: read a frame (feeding the socket as
/// needed), dispatch it, write the reply, repeat until the socket closes
/// or a protocol error forces the connection shut.
async fn handle_connection(db: Db, stream: TcpStream) -> SkyResult<()> {
    stream.set_nodelay(true).ok();
    let (mut read_half, write_half) = stream.into_split();
    let write_half = Arc::new(AsyncMutex::new(write_half));
    let mut session = Session::new(write_half.clone());
    let mut reader = FrameReader::new();
    let mut buf = vec![0u8; libsky::BUF_CAP];

    loop {
        let value = match next_frame(&mut reader, &mut read_half, &mut buf).await? {
            Some(v) => v,
            None => break, // peer closed the connection
        };
        let Some(args) = value.into_command_args() else {
            let _ = write_half
                .lock()
                .await
                .write_all(b"-ERR protocol error: expected a command array\r\n")
                .await;
            break;
        };
        if args.is_empty() {
            continue;
        }
        let (reply, _wrote) = dispatch::dispatch(&db, &mut session, args).await;
        // Once PSYNC succeeds this link only ever carries REPLCONF ACK
        // from the replica, written by the propagation path directly;
        // the ordinary reply path is silenced for the rest of its life.
        if !session.is_replica() && !reply.is_none() {
            let bytes = reply.to_bytes();
            if write_half.lock().await.write_all(&bytes).await.is_err() {
                break;
            }
        }
    }

    db.shared.pubsub.unsubscribe_all(session.id);
    if let Some(handle) = &session.replica_handle {
        db.shared.repl.remove_replica(handle);
    }
    Ok(())
}

/// Pulls one complete frame off the wire, reading more bytes from
/// `read_half` as needed. Returns `Ok(None)` once the peer has closed the
/// connection with no partial frame left pending.
async fn next_frame(
    reader: &mut FrameReader,
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
    buf: &mut [u8],
) -> SkyResult<Option<crate::protocol::Value>> {
    loop {
        match reader.next_value() {
            Ok(Some(v)) => return Ok(Some(v)),
            Ok(None) => {}
            Err(e) => return Err(Error::Protocol(e.to_string())),
        }
        let n = read_half.read(buf).await?;
        if n == 0 {
            return Ok(None);
        }
        reader.feed(&buf[..n]);
    }
}
