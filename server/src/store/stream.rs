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

//! Stream entries and ID assignment, following the auto-ID and
//! clock-skew-safe rules of the source this system was distilled from.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn is_zero(&self) -> bool {
        self.ms == 0 && self.seq == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Bytes, Bytes)>,
}

/// What the caller asked for when adding an entry.
pub enum IdSpec {
    /// `*`
    Auto,
    /// `<ms>-*`
    AutoSeq(u64),
    /// `<ms>-<seq>`
    Exact(StreamId),
}

#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: BTreeMap<StreamId, Vec<(Bytes, Bytes)>>,
    pub last_id: StreamId,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StreamAddError {
    /// The (0,0) id is reserved and never assignable.
    ZeroId,
    /// The resolved id is not strictly greater than `last_id`.
    NotGreater,
}

impl Stream {
    pub fn add(&mut self, spec: IdSpec, fields: Vec<(Bytes, Bytes)>, now_ms: u64) -> Result<StreamId, StreamAddError> {
        let id = match spec {
            IdSpec::Auto => {
                if now_ms > self.last_id.ms {
                    StreamId { ms: now_ms, seq: 0 }
                } else {
                    StreamId {
                        ms: self.last_id.ms,
                        seq: self.last_id.seq + 1,
                    }
                }
            }
            IdSpec::AutoSeq(ms) => {
                if ms == self.last_id.ms {
                    StreamId {
                        ms,
                        seq: self.last_id.seq + 1,
                    }
                } else if ms > self.last_id.ms {
                    StreamId { ms, seq: 0 }
                } else {
                    return Err(StreamAddError::NotGreater);
                }
            }
            IdSpec::Exact(id) => id,
        };
        if id.is_zero() {
            return Err(StreamAddError::ZeroId);
        }
        if id <= self.last_id {
            return Err(StreamAddError::NotGreater);
        }
        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        self.entries
            .range(start..=end)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    pub fn after(&self, threshold: StreamId) -> Vec<StreamEntry> {
        self.entries
            .range((
                std::ops::Bound::Excluded(threshold),
                std::ops::Bound::Unbounded,
            ))
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Parses a user-supplied stream ID string into an `IdSpec`, per the forms
/// `*`, `<ms>-*`, and `<ms>-<seq>`. Used by `XADD`.
pub fn parse_id_spec(s: &str) -> Option<IdSpec> {
    if s == "*" {
        return Some(IdSpec::Auto);
    }
    let (ms_part, seq_part) = s.split_once('-')?;
    let ms: u64 = ms_part.parse().ok()?;
    if seq_part == "*" {
        return Some(IdSpec::AutoSeq(ms));
    }
    let seq: u64 = seq_part.parse().ok()?;
    Some(IdSpec::Exact(StreamId { ms, seq }))
}

/// Parses a range endpoint for `XRANGE`: `-`, `+`, `<ms>`, or `<ms>-<seq>`.
/// `is_start` controls whether a bare `<ms>` resolves to `(ms,0)` (start)
/// or `(ms, MAX)` (end).
pub fn parse_range_bound(s: &str, is_start: bool) -> Option<StreamId> {
    match s {
        "-" => Some(StreamId::MIN),
        "+" => Some(StreamId::MAX),
        _ => {
            if let Some((ms_part, seq_part)) = s.split_once('-') {
                let ms: u64 = ms_part.parse().ok()?;
                let seq: u64 = seq_part.parse().ok()?;
                Some(StreamId { ms, seq })
            } else {
                let ms: u64 = s.parse().ok()?;
                Some(StreamId {
                    ms,
                    seq: if is_start { 0 } else { u64::MAX },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_id_increments_seq_within_same_ms() {
        let mut s = Stream::default();
        let a = s.add(IdSpec::Auto, vec![], 100).unwrap();
        let b = s.add(IdSpec::Auto, vec![], 100).unwrap();
        assert_eq!(a, StreamId { ms: 100, seq: 0 });
        assert_eq!(b, StreamId { ms: 100, seq: 1 });
    }

    #[test]
    fn auto_id_handles_clock_skew() {
        let mut s = Stream::default();
        s.add(IdSpec::Auto, vec![], 1000).unwrap();
        // wall clock moved backward; must not go backward or repeat
        let b = s.add(IdSpec::Auto, vec![], 500).unwrap();
        assert_eq!(b, StreamId { ms: 1000, seq: 1 });
    }

    #[test]
    fn zero_id_always_rejected() {
        let mut s = Stream::default();
        let r = s.add(IdSpec::Exact(StreamId { ms: 0, seq: 0 }), vec![], 1);
        assert_eq!(r, Err(StreamAddError::ZeroId));
    }

    #[test]
    fn rejects_id_not_greater_than_last() {
        let mut s = Stream::default();
        s.add(IdSpec::Exact(StreamId { ms: 1, seq: 1 }), vec![], 1)
            .unwrap();
        let r = s.add(IdSpec::Exact(StreamId { ms: 1, seq: 1 }), vec![], 1);
        assert_eq!(r, Err(StreamAddError::NotGreater));
    }

    #[test]
    fn autoseq_rules() {
        let mut s = Stream::default();
        s.add(IdSpec::Exact(StreamId { ms: 5, seq: 3 }), vec![], 1)
            .unwrap();
        let same_ms = s.add(IdSpec::AutoSeq(5), vec![], 1).unwrap();
        assert_eq!(same_ms, StreamId { ms: 5, seq: 4 });
        let later_ms = s.add(IdSpec::AutoSeq(9), vec![], 1).unwrap();
        assert_eq!(later_ms, StreamId { ms: 9, seq: 0 });
        let earlier_ms = s.add(IdSpec::AutoSeq(2), vec![], 1);
        assert_eq!(earlier_ms, Err(StreamAddError::NotGreater));
    }
}
