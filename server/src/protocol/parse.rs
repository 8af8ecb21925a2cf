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

use super::Value;
use bytes::{Buf, Bytes, BytesMut};
use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The type byte or a length prefix is not well-formed.
    Bad(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bad(msg) => write!(f, "{msg}"),
        }
    }
}

pub enum ParseOutcome<T> {
    /// A full value was parsed; `usize` is the number of bytes consumed
    /// from the front of the buffer.
    Ready(T, usize),
    /// The buffer does not yet hold a complete frame.
    Incomplete,
}

/// Incremental reader over a growing byte buffer. Owns no socket; callers
/// feed bytes in via `feed` and pull parsed frames out via `next_value`
/// or `next_raw_blob`.
#[derive(Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(libsky::BUF_CAP),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Parses one complete frame from the front of the buffer, if present,
    /// and advances past it.
    pub fn next_value(&mut self) -> Result<Option<Value>, ParseError> {
        Ok(self.next_value_with_len()?.map(|(v, _)| v))
    }

    /// As `next_value`, but also reports how many raw bytes the frame
    /// occupied — used by the replica link to track its read offset.
    pub fn next_value_with_len(&mut self) -> Result<Option<(Value, usize)>, ParseError> {
        match parse_value(&self.buf)? {
            ParseOutcome::Ready(v, consumed) => {
                self.buf.advance(consumed);
                Ok(Some((v, consumed)))
            }
            ParseOutcome::Incomplete => Ok(None),
        }
    }

    /// Reads the raw-blob exception used to transfer an RDB snapshot:
    /// `$<n>\r\n` followed by exactly `n` raw bytes with no trailing CRLF.
    pub fn next_raw_blob(&mut self) -> Result<Option<Bytes>, ParseError> {
        let Some(nl) = find_crlf(&self.buf) else {
            return Ok(None);
        };
        if self.buf.first() != Some(&b'$') {
            return Err(ParseError::Bad("expected raw blob frame".into()));
        }
        let len: i64 = std::str::from_utf8(&self.buf[1..nl])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ParseError::Bad("invalid raw blob length".into()))?;
        if len < 0 {
            return Err(ParseError::Bad("negative raw blob length".into()));
        }
        let len = len as usize;
        let header_len = nl + 2;
        if self.buf.len() < header_len + len {
            return Ok(None);
        }
        self.buf.advance(header_len);
        let blob = self.buf.split_to(len).freeze();
        Ok(Some(blob))
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_value(buf: &[u8]) -> Result<ParseOutcome<Value>, ParseError> {
    if buf.is_empty() {
        return Ok(ParseOutcome::Incomplete);
    }
    match buf[0] {
        b'+' => match parse_line(buf, 1)? {
            Some((s, n)) => Ok(ParseOutcome::Ready(Value::Simple(s), n)),
            None => Ok(ParseOutcome::Incomplete),
        },
        b'-' => match parse_line(buf, 1)? {
            Some((s, n)) => Ok(ParseOutcome::Ready(Value::Error(s), n)),
            None => Ok(ParseOutcome::Incomplete),
        },
        b':' => match parse_line(buf, 1)? {
            Some((s, n)) => {
                let i: i64 = s
                    .parse()
                    .map_err(|_| ParseError::Bad("invalid integer".into()))?;
                Ok(ParseOutcome::Ready(Value::Integer(i), n))
            }
            None => Ok(ParseOutcome::Incomplete),
        },
        b'$' => parse_bulk(buf),
        b'*' => parse_array(buf),
        other => Err(ParseError::Bad(format!("unknown type byte {other:#x}"))),
    }
}

fn parse_line(buf: &[u8], skip: usize) -> Result<Option<(String, usize)>, ParseError> {
    let Some(nl) = find_crlf(buf) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&buf[skip..nl])
        .map_err(|_| ParseError::Bad("non-utf8 line".into()))?
        .to_string();
    Ok(Some((text, nl + 2)))
}

fn parse_bulk(buf: &[u8]) -> Result<ParseOutcome<Value>, ParseError> {
    let Some(nl) = find_crlf(buf) else {
        return Ok(ParseOutcome::Incomplete);
    };
    let len: i64 = std::str::from_utf8(&buf[1..nl])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::Bad("invalid bulk length".into()))?;
    let header_len = nl + 2;
    if len < 0 {
        return Ok(ParseOutcome::Ready(Value::Bulk(None), header_len));
    }
    let len = len as usize;
    let total = header_len + len + 2;
    if buf.len() < total {
        return Ok(ParseOutcome::Incomplete);
    }
    let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
    if &buf[header_len + len..total] != b"\r\n" {
        return Err(ParseError::Bad("bulk string missing terminator".into()));
    }
    Ok(ParseOutcome::Ready(Value::Bulk(Some(data)), total))
}

fn parse_array(buf: &[u8]) -> Result<ParseOutcome<Value>, ParseError> {
    let Some(nl) = find_crlf(buf) else {
        return Ok(ParseOutcome::Incomplete);
    };
    let count: i64 = std::str::from_utf8(&buf[1..nl])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::Bad("invalid array length".into()))?;
    let mut offset = nl + 2;
    if count < 0 {
        return Ok(ParseOutcome::Ready(Value::Array(None), offset));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match parse_value(&buf[offset..])? {
            ParseOutcome::Ready(v, consumed) => {
                offset += consumed;
                items.push(v);
            }
            ParseOutcome::Incomplete => return Ok(ParseOutcome::Incomplete),
        }
    }
    Ok(ParseOutcome::Ready(Value::Array(Some(items)), offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_string() {
        let mut r = FrameReader::new();
        r.feed(b"+OK\r\n");
        assert_eq!(r.next_value().unwrap(), Some(Value::Simple("OK".into())));
    }

    #[test]
    fn parses_incomplete_bulk_then_completes() {
        let mut r = FrameReader::new();
        r.feed(b"$5\r\nhel");
        assert_eq!(r.next_value().unwrap(), None);
        r.feed(b"lo\r\n");
        assert_eq!(
            r.next_value().unwrap(),
            Some(Value::Bulk(Some(Bytes::from_static(b"hello"))))
        );
    }

    #[test]
    fn parses_null_bulk_and_array() {
        let mut r = FrameReader::new();
        r.feed(b"$-1\r\n*-1\r\n");
        assert_eq!(r.next_value().unwrap(), Some(Value::Bulk(None)));
        assert_eq!(r.next_value().unwrap(), Some(Value::Array(None)));
    }

    #[test]
    fn parses_command_array() {
        let mut r = FrameReader::new();
        r.feed(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        let v = r.next_value().unwrap().unwrap();
        let args = v.into_command_args().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(&args[0][..], b"GET");
        assert_eq!(&args[1][..], b"foo");
    }

    #[test]
    fn rejects_unknown_type_byte() {
        let mut r = FrameReader::new();
        r.feed(b"!nope\r\n");
        assert!(matches!(r.next_value(), Err(ParseError::Bad(_))));
    }

    #[test]
    fn raw_blob_has_no_trailing_crlf() {
        let mut r = FrameReader::new();
        r.feed(b"$4\r\nABCD");
        let blob = r.next_raw_blob().unwrap().unwrap();
        assert_eq!(&blob[..], b"ABCD");
        assert!(r.is_empty());
    }

    #[test]
    fn raw_blob_waits_for_full_payload() {
        let mut r = FrameReader::new();
        r.feed(b"$4\r\nAB");
        assert_eq!(r.next_raw_blob().unwrap(), None);
        r.feed(b"CD");
        assert_eq!(r.next_raw_blob().unwrap().unwrap().as_ref(), b"ABCD");
    }
}
