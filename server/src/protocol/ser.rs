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

use bytes::{BufMut, Bytes, BytesMut};

/// A reply frame, built up by command handlers and serialized once at the
/// session's write point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    NullBulk,
    Array(Vec<Reply>),
    NullArray,
    /// No frame at all. Used by commands that write their reply directly
    /// to the socket themselves (`PSYNC`'s `FULLRESYNC` + RDB blob) and by
    /// `REPLCONF ACK`, which Redis-family protocols never answer.
    None,
}

impl Reply {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    pub fn wrong_type() -> Self {
        Self::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into())
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self::Error(format!("ERR {}", msg.into()))
    }

    pub fn encode_into(&self, out: &mut BytesMut) {
        match self {
            Reply::Ok => out.extend_from_slice(b"+OK\r\n"),
            Reply::Simple(s) => {
                out.put_u8(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.put_u8(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(i) => {
                out.put_u8(b':');
                out.extend_from_slice(i.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                out.put_u8(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.put_u8(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_into(out);
                }
            }
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::None => {}
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Reply::None)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode_into(&mut out);
        out.freeze()
    }
}

/// Encodes a command as a RESP array of bulk strings — the shape used
/// both by clients sending requests and by the replica link issuing
/// handshake commands to a primary.
pub fn encode_command(args: &[&[u8]]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u8(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.put_u8(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out.freeze()
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::bulk(Bytes::from(s))
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::bulk(Bytes::from(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_integer_and_bulk() {
        assert_eq!(Reply::Integer(42).to_bytes(), Bytes::from_static(b":42\r\n"));
        assert_eq!(
            Reply::bulk("hi").to_bytes(),
            Bytes::from_static(b"$2\r\nhi\r\n")
        );
    }

    #[test]
    fn encodes_null_sentinels() {
        assert_eq!(Reply::NullBulk.to_bytes(), Bytes::from_static(b"$-1\r\n"));
        assert_eq!(Reply::NullArray.to_bytes(), Bytes::from_static(b"*-1\r\n"));
    }

    #[test]
    fn encodes_nested_array() {
        let r = Reply::Array(vec![Reply::Ok, Reply::Integer(2)]);
        assert_eq!(r.to_bytes(), Bytes::from_static(b"*2\r\n+OK\r\n:2\r\n"));
    }
}
