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

//! The typed, lazily-expiring keyspace. `Store` is the single shared
//! handle cloned (as an `Arc`) into every connection task; all mutation
//! goes through its `RwLock<Keyspace>`, held for the duration of a whole
//! command (or a whole `EXEC` batch) to guarantee atomicity.

pub mod stream;
pub mod value;
pub mod zset;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use stream::{IdSpec, Stream, StreamAddError, StreamEntry, StreamId};
use value::{Data, Entry};
use zset::ZSet;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_millis() as u64
}

#[derive(Debug, PartialEq)]
pub enum StoreError {
    WrongType,
    NotInteger,
    Overflow,
    InvalidId(String),
    IdNotGreater,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::WrongType => write!(f, "WRONGTYPE Operation against a key holding the wrong kind of value"),
            StoreError::NotInteger => write!(f, "value is not an integer or out of range"),
            StoreError::Overflow => write!(f, "increment or decrement would overflow"),
            StoreError::InvalidId(msg) => write!(f, "Invalid stream ID specified: {msg}"),
            StoreError::IdNotGreater => write!(
                f,
                "The ID specified in XADD is equal or smaller than the target stream top item"
            ),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The keyspace map. All operations here assume the caller already holds
/// whatever lock is appropriate — `Store` is the thing that owns the
/// lock; `Keyspace` is the thing the lock guards.
#[derive(Default)]
pub struct Keyspace {
    map: HashMap<Bytes, Entry>,
}

impl Keyspace {
    fn purge_if_expired(&mut self, key: &[u8], now: u64) {
        if matches!(self.map.get(key), Some(e) if e.is_expired(now)) {
            self.map.remove(key);
        }
    }

    fn get_live(&mut self, key: &[u8]) -> Option<&Entry> {
        let now = now_ms();
        self.purge_if_expired(key, now);
        self.map.get(key)
    }

    fn get_live_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        let now = now_ms();
        self.purge_if_expired(key, now);
        self.map.get_mut(key)
    }

    pub fn set(&mut self, key: Bytes, value: Bytes, ttl_ms: Option<u64>) {
        let entry = match ttl_ms {
            Some(ttl) => Entry::with_ttl(Data::Str(value), ttl, now_ms()),
            None => Entry::new(Data::Str(value)),
        };
        self.map.insert(key, entry);
    }

    /// Inserts a string entry with an already-absolute expiry timestamp,
    /// as recovered from a snapshot (where expiry is stored absolute,
    /// unlike `set`'s relative `ttl_ms`).
    pub fn set_absolute(&mut self, key: Bytes, value: Bytes, expires_at: Option<u64>) {
        self.map.insert(key, Entry { data: Data::Str(value), expires_at });
    }

    pub fn get(&mut self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        match self.get_live(key) {
            None => Ok(None),
            Some(Entry { data: Data::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn incr(&mut self, key: &[u8]) -> StoreResult<i64> {
        let current: i64 = match self.get_live(key) {
            None => 0,
            Some(Entry { data: Data::Str(s), .. }) => std::str::from_utf8(s)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(StoreError::NotInteger)?,
            Some(_) => return Err(StoreError::WrongType),
        };
        let next = current.checked_add(1).ok_or(StoreError::Overflow)?;
        self.map
            .insert(Bytes::copy_from_slice(key), Entry::new(Data::Str(Bytes::from(next.to_string()))));
        Ok(next)
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.get_live(key);
        self.map.remove(key).is_some()
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.get_live(key).is_some()
    }

    pub fn flushall(&mut self) {
        self.map.clear();
    }

    pub fn type_of(&mut self, key: &[u8]) -> &'static str {
        match self.get_live(key) {
            None => "none",
            Some(e) => match e.data {
                Data::Str(_) => "string",
                Data::List(_) => "list",
                Data::Stream(_) => "stream",
                Data::ZSet(_) => "zset",
            },
        }
    }

    /// Returns the list at `key`, creating an empty one if absent. Errs if
    /// the key holds a different type.
    pub fn list_mut(&mut self, key: &[u8]) -> StoreResult<&mut VecDeque<Bytes>> {
        self.get_live(key);
        let entry = self
            .map
            .entry(Bytes::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Data::List(VecDeque::new())));
        match &mut entry.data {
            Data::List(l) => Ok(l),
            _ => Err(StoreError::WrongType),
        }
    }

    /// Errs if `key` exists and is not a list; absent is fine (the caller
    /// is about to create or hand off into it).
    pub fn ensure_list_type(&mut self, key: &[u8]) -> StoreResult<()> {
        match self.get_live(key) {
            None => Ok(()),
            Some(Entry { data: Data::List(_), .. }) => Ok(()),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    /// Drops `key` if it holds an empty list. A list never persists empty.
    pub fn list_delete_if_empty(&mut self, key: &[u8]) {
        if matches!(&self.map.get(key), Some(Entry { data: Data::List(l), .. }) if l.is_empty()) {
            self.map.remove(key);
        }
    }

    pub fn lrange(&mut self, key: &[u8], start: i64, end: i64) -> StoreResult<Vec<Bytes>> {
        match self.get_live(key) {
            None => Ok(Vec::new()),
            Some(Entry { data: Data::List(l), .. }) => Ok(clamp_range(l, start, end)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn llen(&mut self, key: &[u8]) -> StoreResult<i64> {
        match self.get_live(key) {
            None => Ok(0),
            Some(Entry { data: Data::List(l), .. }) => Ok(l.len() as i64),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn lpop(&mut self, key: &[u8], n: usize) -> StoreResult<Vec<Bytes>> {
        let out = match self.get_live_mut(key) {
            None => return Ok(Vec::new()),
            Some(Entry { data: Data::List(l), .. }) => {
                let n = n.min(l.len());
                l.drain(..n).collect::<Vec<_>>()
            }
            Some(_) => return Err(StoreError::WrongType),
        };
        self.list_delete_if_empty(key);
        Ok(out)
    }

    pub fn keys(&mut self, pattern: &str) -> Vec<Bytes> {
        let now = now_ms();
        let to_purge: Vec<Bytes> = self
            .map
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in to_purge {
            self.map.remove(&k);
        }
        self.map
            .keys()
            .filter(|k| pattern_matches(pattern, k))
            .cloned()
            .collect()
    }

    pub fn xadd(&mut self, key: &[u8], spec: IdSpec, fields: Vec<(Bytes, Bytes)>) -> StoreResult<StreamId> {
        self.get_live(key);
        let entry = self
            .map
            .entry(Bytes::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Data::Stream(Stream::default())));
        let stream = match &mut entry.data {
            Data::Stream(s) => s,
            _ => return Err(StoreError::WrongType),
        };
        stream.add(spec, fields, now_ms()).map_err(|e| match e {
            StreamAddError::ZeroId => {
                StoreError::InvalidId("The ID specified in XADD must be greater than 0-0".into())
            }
            StreamAddError::NotGreater => StoreError::IdNotGreater,
        })
    }

    pub fn xrange(&mut self, key: &[u8], start: StreamId, end: StreamId) -> StoreResult<Vec<StreamEntry>> {
        match self.get_live(key) {
            None => Ok(Vec::new()),
            Some(Entry { data: Data::Stream(s), .. }) => Ok(s.range(start, end)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    /// Resolves `$` to the stream's current `last_id` (or `(0,0)` if the
    /// stream is absent), and returns entries strictly after `threshold`.
    /// Used both for the initial `XREAD` probe and for re-checking after a
    /// blocked wake.
    pub fn xread_last_id(&mut self, key: &[u8]) -> StreamId {
        match self.get_live(key) {
            Some(Entry { data: Data::Stream(s), .. }) => s.last_id,
            _ => StreamId::MIN,
        }
    }

    pub fn xread_after(&mut self, key: &[u8], threshold: StreamId) -> StoreResult<Vec<StreamEntry>> {
        match self.get_live(key) {
            None => Ok(Vec::new()),
            Some(Entry { data: Data::Stream(s), .. }) => Ok(s.after(threshold)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn zadd(&mut self, key: &[u8], member: Bytes, score: f64) -> StoreResult<bool> {
        self.get_live(key);
        let entry = self
            .map
            .entry(Bytes::copy_from_slice(key))
            .or_insert_with(|| Entry::new(Data::ZSet(ZSet::default())));
        match &mut entry.data {
            Data::ZSet(z) => Ok(z.add(member, score)),
            _ => Err(StoreError::WrongType),
        }
    }

    pub fn zrank(&mut self, key: &[u8], member: &[u8]) -> StoreResult<Option<usize>> {
        match self.get_live(key) {
            None => Ok(None),
            Some(Entry { data: Data::ZSet(z), .. }) => Ok(z.rank(member)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn zrange(&mut self, key: &[u8], start: i64, end: i64) -> StoreResult<Vec<(Bytes, f64)>> {
        match self.get_live(key) {
            None => Ok(Vec::new()),
            Some(Entry { data: Data::ZSet(z), .. }) => Ok(z.range(start, end)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn zcard(&mut self, key: &[u8]) -> StoreResult<i64> {
        match self.get_live(key) {
            None => Ok(0),
            Some(Entry { data: Data::ZSet(z), .. }) => Ok(z.len() as i64),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn zscore(&mut self, key: &[u8], member: &[u8]) -> StoreResult<Option<f64>> {
        match self.get_live(key) {
            None => Ok(None),
            Some(Entry { data: Data::ZSet(z), .. }) => Ok(z.score(member)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn zrem(&mut self, key: &[u8], member: &[u8]) -> StoreResult<bool> {
        match self.get_live_mut(key) {
            None => Ok(false),
            Some(Entry { data: Data::ZSet(z), .. }) => Ok(z.remove(member)),
            Some(_) => Err(StoreError::WrongType),
        }
    }
}

fn clamp_range(items: &VecDeque<Bytes>, start: i64, end: i64) -> Vec<Bytes> {
    let len = items.len() as i64;
    if len == 0 {
        return Vec::new();
    }
    let norm = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
    let start = norm(start).min(len - 1).max(0);
    let end = norm(end).min(len - 1);
    if start > end || end < 0 {
        return Vec::new();
    }
    items
        .iter()
        .skip(start as usize)
        .take((end - start + 1) as usize)
        .cloned()
        .collect()
}

/// Supported forms: literal equality, `*` (match everything), and
/// `<prefix>*`. Any other shape is treated as a literal match attempt.
fn pattern_matches(pattern: &str, key: &[u8]) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix.as_bytes());
    }
    key == pattern.as_bytes()
}

/// The shared, lockable keyspace handle. Cloned as an `Arc` into every
/// connection and replication task.
pub struct Store {
    inner: RwLock<Keyspace>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Keyspace::default()),
        }
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.inner.write()
    }

    /// Implements the inner-lock pattern: if `held` already carries a
    /// write guard (an `EXEC` batch holding the lock across all of its
    /// queued commands), reuse it; otherwise take the lock for just this
    /// call.
    pub fn with_write<R>(&self, held: &mut Option<RwLockWriteGuard<'_, Keyspace>>, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        match held {
            Some(guard) => f(guard),
            None => {
                let mut guard = self.inner.write();
                f(&mut guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip_and_missing() {
        let mut ks = Keyspace::default();
        ks.set(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), None);
        assert_eq!(ks.get(b"foo").unwrap(), Some(Bytes::from_static(b"bar")));
        assert_eq!(ks.get(b"missing").unwrap(), None);
    }

    #[test]
    fn ttl_expires_lazily() {
        let mut ks = Keyspace::default();
        ks.set(Bytes::from_static(b"k"), Bytes::from_static(b"v"), Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(ks.get(b"k").unwrap(), None);
    }

    #[test]
    fn incr_creates_and_overflows() {
        let mut ks = Keyspace::default();
        assert_eq!(ks.incr(b"c").unwrap(), 1);
        assert_eq!(ks.incr(b"c").unwrap(), 2);
        ks.set(Bytes::from_static(b"big"), Bytes::from(i64::MAX.to_string()), None);
        assert_eq!(ks.incr(b"big"), Err(StoreError::Overflow));
    }

    #[test]
    fn list_emptied_is_removed() {
        let mut ks = Keyspace::default();
        ks.list_mut(b"xs").unwrap().push_back(Bytes::from_static(b"a"));
        ks.lpop(b"xs", 1).unwrap();
        assert_eq!(ks.type_of(b"xs"), "none");
    }

    #[test]
    fn lrange_clamps_bounds() {
        let mut ks = Keyspace::default();
        let l = ks.list_mut(b"xs").unwrap();
        l.push_back(Bytes::from_static(b"a"));
        l.push_back(Bytes::from_static(b"b"));
        l.push_back(Bytes::from_static(b"c"));
        assert_eq!(
            ks.lrange(b"xs", -1, -1).unwrap(),
            vec![Bytes::from_static(b"c")]
        );
        assert_eq!(ks.lrange(b"xs", 0, -1).unwrap().len(), 3);
        assert_eq!(ks.lrange(b"xs", 5, 10).unwrap().len(), 0);
    }

    #[test]
    fn keys_pattern_forms() {
        let mut ks = Keyspace::default();
        ks.set(Bytes::from_static(b"user:1"), Bytes::from_static(b"a"), None);
        ks.set(Bytes::from_static(b"user:2"), Bytes::from_static(b"b"), None);
        ks.set(Bytes::from_static(b"other"), Bytes::from_static(b"c"), None);
        assert_eq!(ks.keys("user:*").len(), 2);
        assert_eq!(ks.keys("*").len(), 3);
        assert_eq!(ks.keys("other").len(), 1);
    }

    #[test]
    fn wrong_type_errors() {
        let mut ks = Keyspace::default();
        ks.set(Bytes::from_static(b"s"), Bytes::from_static(b"x"), None);
        assert_eq!(ks.llen(b"s"), Err(StoreError::WrongType));
    }
}
