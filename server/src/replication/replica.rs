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

//! Replica-side handshake and command-stream consumer. Runs as a single
//! background task for the lifetime of the process when started with
//! `--replicaof`; never accepts ordinary client traffic on this link.

use crate::db::Db;
use crate::dispatch;
use crate::protocol::{encode_command, FrameReader, Value};
use crate::rdb;
use crate::session::Session;
use crate::util::error::{Error, SkyResult};
use bytes::Bytes;
use log::{error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Connects to `(host, port)`, performs the `PING`/`REPLCONF`/`PSYNC`
/// handshake, loads the returned RDB snapshot, and then consumes the
/// primary's command stream forever. Returns only on a fatal I/O error;
/// the caller is expected to log and let the process exit or retry.
pub async fn run(db: Db, host: String, port: u16) -> SkyResult<()> {
    let addr = format!("{host}:{port}");
    info!("connecting to primary at {addr}");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| Error::io_extra(e, format!("connecting to primary {addr}")))?;
    let (mut read_half, write_half) = stream.into_split();
    let write_half = Arc::new(AsyncMutex::new(write_half));

    let mut reader = FrameReader::new();
    handshake_roundtrip(&mut reader, &mut read_half, &write_half, b"PING", &[]).await?;
    handshake_roundtrip(
        &mut reader,
        &mut read_half,
        &write_half,
        b"REPLCONF",
        &[b"listening-port", db.shared.config.port.to_string().as_bytes()],
    )
    .await?;
    handshake_roundtrip(&mut reader, &mut read_half, &write_half, b"REPLCONF", &[b"capa", b"psync2"]).await?;

    {
        let mut w = write_half.lock().await;
        w.write_all(&encode_command(&[b"PSYNC", b"?", b"-1"])).await?;
    }
    let fullresync = read_line(&mut reader, &mut read_half).await?;
    if !fullresync.starts_with("+FULLRESYNC") {
        return Err(Error::Replication(format!("unexpected PSYNC reply: {fullresync}")));
    }
    info!("received {fullresync}");

    let rdb_bytes = loop {
        if let Some(blob) = reader.next_raw_blob().map_err(|e| Error::Protocol(e.to_string()))? {
            break blob;
        }
        read_more(&mut reader, &mut read_half).await?;
    };
    rdb::load_bytes(&db.shared.store, &rdb_bytes);
    info!("loaded {} bytes of snapshot from primary", rdb_bytes.len());

    let offset = Arc::new(AtomicU64::new(0));
    let mut session = Session::new(write_half.clone());
    loop {
        let (value, consumed) = loop {
            match reader.next_value_with_len().map_err(|e| Error::Protocol(e.to_string()))? {
                Some(v) => break v,
                None => read_more(&mut reader, &mut read_half).await?,
            }
        };
        offset.fetch_add(consumed as u64, Ordering::SeqCst);
        let Some(args) = value.into_command_args() else {
            warn!("ignoring malformed frame from primary");
            continue;
        };
        if args.is_empty() {
            continue;
        }
        if is_getack(&args) {
            let mut w = write_half.lock().await;
            let ack = offset.load(Ordering::SeqCst).to_string();
            let _ = w
                .write_all(&encode_command(&[b"REPLCONF", b"ACK", ack.as_bytes()]))
                .await;
            continue;
        }
        // The primary's command stream carries no replies besides GETACK;
        // whatever a command would normally answer with is discarded.
        let _ = dispatch::dispatch(&db, &mut session, args).await;
    }
}

fn is_getack(args: &[Bytes]) -> bool {
    args.len() >= 2
        && args[0].eq_ignore_ascii_case(b"REPLCONF")
        && args[1].eq_ignore_ascii_case(b"GETACK")
}

async fn handshake_roundtrip(
    reader: &mut FrameReader,
    read_half: &mut (impl AsyncReadExt + Unpin),
    write_half: &Arc<AsyncMutex<tokio::net::tcp::OwnedWriteHalf>>,
    name: &[u8],
    extra: &[&[u8]],
) -> SkyResult<()> {
    let mut parts: Vec<&[u8]> = vec![name];
    parts.extend_from_slice(extra);
    {
        let mut w = write_half.lock().await;
        w.write_all(&encode_command(&parts)).await?;
    }
    let line = read_line(reader, read_half).await?;
    if !line.starts_with('+') {
        return Err(Error::Replication(format!(
            "unexpected reply to {}: {line}",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

/// Reads one `+...\r\n`-style line, feeding more bytes in as needed. Used
/// only during the handshake, before the general frame loop starts.
async fn read_line(reader: &mut FrameReader, read_half: &mut (impl AsyncReadExt + Unpin)) -> SkyResult<String> {
    loop {
        match reader.next_value().map_err(|e| Error::Protocol(e.to_string()))? {
            Some(Value::Simple(s)) => return Ok(format!("+{s}")),
            Some(Value::Error(s)) => return Err(Error::Replication(s)),
            Some(_) => return Err(Error::Protocol("unexpected frame during handshake".into())),
            None => read_more(reader, read_half).await?,
        }
    }
}

async fn read_more(reader: &mut FrameReader, read_half: &mut (impl AsyncReadExt + Unpin)) -> SkyResult<()> {
    let mut buf = [0u8; 8192];
    let n = read_half.read(&mut buf).await?;
    if n == 0 {
        error!("primary closed the replication link");
        return Err(Error::Replication("connection to primary closed".into()));
    }
    reader.feed(&buf[..n]);
    Ok(())
}
