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

//! The on-disk (and over-the-wire, for `FULLRESYNC`) snapshot format.
//! Only string values are persisted — lists, streams and sorted sets are
//! rebuilt from traffic, never from a snapshot, matching the format this
//! was grounded on, which defines no opcode for them.

use crate::store::{now_ms, Store};
use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;

const MAGIC: &[u8] = b"REDIS0011";
const OP_EXPIRY_SEC: u8 = 0xFD;
const OP_EXPIRY_MS: u8 = 0xFC;
const OP_SELECTDB: u8 = 0xFE;
const OP_RESIZEDB: u8 = 0xFB;
const OP_AUX: u8 = 0xFA;
const OP_EOF: u8 = 0xFF;
const TYPE_STRING: u8 = 0x00;

/// Serializes the store's string keys into a snapshot blob.
pub fn dump(store: &Store) -> Bytes {
    let mut ks = store.write();
    let mut out = BytesMut::new();
    out.extend_from_slice(MAGIC);
    out.put_u8(OP_SELECTDB);
    write_length(&mut out, 0);
    for key in ks.keys("*") {
        if let Ok(Some(value)) = ks.get(&key) {
            out.put_u8(TYPE_STRING);
            write_string(&mut out, &key);
            write_string(&mut out, &value);
        }
    }
    out.put_u8(OP_EOF);
    out.freeze()
}

/// Loads a snapshot file at `path` into `store`. A missing file is not an
/// error — the server just starts empty. A malformed file is logged and
/// treated as if it were absent; no partial state is applied.
pub fn load_file(store: &Store, path: &Path) {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no snapshot at {}; starting with an empty keyspace", path.display());
            return;
        }
        Err(e) => {
            log::error!("failed to read snapshot {}: {e}", path.display());
            return;
        }
    };
    match parse(&bytes) {
        Ok(entries) => {
            let mut ks = store.write();
            let now = now_ms();
            for (key, value, expires_at) in entries {
                if matches!(expires_at, Some(t) if t <= now) {
                    continue;
                }
                ks.set_absolute(key, value, expires_at);
            }
            log::info!("loaded snapshot {}", path.display());
        }
        Err(msg) => {
            log::error!("malformed snapshot {}: {msg}; starting with an empty keyspace", path.display());
        }
    }
}

type Entry = (Bytes, Bytes, Option<u64>);

fn parse(buf: &[u8]) -> Result<Vec<Entry>, String> {
    if buf.len() < 9 || &buf[0..5] != b"REDIS" {
        return Err("missing REDIS header".into());
    }
    let mut pos = 9;
    let mut out = Vec::new();
    let mut pending_expiry: Option<u64> = None;
    loop {
        let op = *buf.get(pos).ok_or("unexpected eof before FF")?;
        pos += 1;
        match op {
            OP_EOF => break,
            OP_AUX => {
                read_string(buf, &mut pos)?;
                read_string(buf, &mut pos)?;
            }
            OP_SELECTDB => {
                read_length(buf, &mut pos)?;
            }
            OP_RESIZEDB => {
                read_length(buf, &mut pos)?;
                read_length(buf, &mut pos)?;
            }
            OP_EXPIRY_SEC => {
                let secs = read_u32_le(buf, &mut pos)?;
                pending_expiry = Some(secs as u64 * 1000);
            }
            OP_EXPIRY_MS => {
                let ms = read_u64_le(buf, &mut pos)?;
                pending_expiry = Some(ms);
            }
            TYPE_STRING => {
                let key = read_string(buf, &mut pos)?;
                let value = read_string(buf, &mut pos)?;
                out.push((key, value, pending_expiry.take()));
            }
            other => return Err(format!("unknown opcode {other:#x}")),
        }
    }
    Ok(out)
}

fn write_length(out: &mut BytesMut, len: u64) {
    if len < 64 {
        out.put_u8(len as u8);
    } else if len < 16384 {
        out.put_u8(0x40 | ((len >> 8) as u8));
        out.put_u8((len & 0xFF) as u8);
    } else {
        out.put_u8(0x80);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

fn write_string(out: &mut BytesMut, s: &[u8]) {
    write_length(out, s.len() as u64);
    out.extend_from_slice(s);
}

enum Length {
    Len(u64),
    Int8,
    Int16,
    Int32,
}

fn read_length(buf: &[u8], pos: &mut usize) -> Result<u64, String> {
    match read_length_or_special(buf, pos)? {
        Length::Len(n) => Ok(n),
        _ => Err("expected a plain length, found a special integer encoding".into()),
    }
}

fn read_length_or_special(buf: &[u8], pos: &mut usize) -> Result<Length, String> {
    let b0 = *buf.get(*pos).ok_or("truncated length")?;
    *pos += 1;
    match b0 >> 6 {
        0b00 => Ok(Length::Len((b0 & 0x3F) as u64)),
        0b01 => {
            let b1 = *buf.get(*pos).ok_or("truncated 14-bit length")?;
            *pos += 1;
            Ok(Length::Len((((b0 & 0x3F) as u64) << 8) | b1 as u64))
        }
        0b10 => {
            let bytes = buf.get(*pos..*pos + 4).ok_or("truncated 32-bit length")?;
            *pos += 4;
            Ok(Length::Len(u32::from_be_bytes(bytes.try_into().unwrap()) as u64))
        }
        _ => match b0 & 0x3F {
            0 => {
                *pos += 1;
                Ok(Length::Int8)
            }
            1 => {
                *pos += 2;
                Ok(Length::Int16)
            }
            2 => {
                *pos += 4;
                Ok(Length::Int32)
            }
            other => Err(format!("unsupported special length encoding {other}")),
        },
    }
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<Bytes, String> {
    let start = *pos;
    match read_length_or_special(buf, pos)? {
        Length::Len(n) => {
            let n = n as usize;
            let data = buf.get(*pos..*pos + n).ok_or("truncated string")?;
            *pos += n;
            Ok(Bytes::copy_from_slice(data))
        }
        Length::Int8 => {
            let v = buf[start + 1] as i8;
            Ok(Bytes::from(v.to_string()))
        }
        Length::Int16 => {
            let bytes: [u8; 2] = buf[start + 1..start + 3].try_into().unwrap();
            Ok(Bytes::from(i16::from_le_bytes(bytes).to_string()))
        }
        Length::Int32 => {
            let bytes: [u8; 4] = buf[start + 1..start + 5].try_into().unwrap();
            Ok(Bytes::from(i32::from_le_bytes(bytes).to_string()))
        }
    }
}

fn read_u32_le(buf: &[u8], pos: &mut usize) -> Result<u32, String> {
    let bytes: [u8; 4] = buf.get(*pos..*pos + 4).ok_or("truncated u32")?.try_into().unwrap();
    *pos += 4;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64_le(buf: &[u8], pos: &mut usize) -> Result<u64, String> {
    let bytes: [u8; 8] = buf.get(*pos..*pos + 8).ok_or("truncated u64")?.try_into().unwrap();
    *pos += 8;
    Ok(u64::from_le_bytes(bytes))
}

/// Loads a raw snapshot blob (received over the replication link after
/// `FULLRESYNC`) directly into `store`, the same way `load_file` loads
/// one from disk.
pub fn load_bytes(store: &Store, bytes: &[u8]) {
    match parse(bytes) {
        Ok(entries) => {
            let mut ks = store.write();
            let now = now_ms();
            for (key, value, expires_at) in entries {
                if matches!(expires_at, Some(t) if t <= now) {
                    continue;
                }
                ks.set_absolute(key, value, expires_at);
            }
        }
        Err(msg) => log::error!("malformed snapshot from primary: {msg}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes as B;

    #[test]
    fn dump_then_load_roundtrips_strings() {
        let store = Store::new();
        {
            let mut ks = store.write();
            ks.set(B::from_static(b"a"), B::from_static(b"1"), None);
            ks.set(B::from_static(b"b"), B::from_static(b"2"), Some(60_000));
        }
        let blob = dump(&store);
        let store2 = Store::new();
        load_bytes(&store2, &blob);
        let mut ks2 = store2.write();
        assert_eq!(ks2.get(b"a").unwrap(), Some(B::from_static(b"1")));
        assert_eq!(ks2.get(b"b").unwrap(), Some(B::from_static(b"2")));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let store = Store::new();
        load_file(&store, Path::new("/nonexistent/path/dump.rdb"));
        assert_eq!(store.write().keys("*").len(), 0);
    }
}
