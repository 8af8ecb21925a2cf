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

//! A sorted set: a score map plus a total order of (score, member) pairs,
//! kept in lockstep so both views always agree.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::collections::HashMap;

/// Wraps an `f64` score so it can sit in an ordered collection alongside
/// its member. Scores in this system are never NaN (rejected on `ZADD`),
/// so a total order over the bit pattern is safe.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedScore(f64);

impl Eq for OrderedScore {}
impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZSet {
    scores: HashMap<Bytes, f64>,
    ordered: BTreeSet<(OrderedScore, Bytes)>,
}

impl ZSet {
    /// Inserts or updates `member`'s score, returning `true` if this is a
    /// new member (for the `ZADD` added-count reply).
    pub fn add(&mut self, member: Bytes, score: f64) -> bool {
        let is_new = match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(OrderedScore(old), member.clone()));
                false
            }
            None => true,
        };
        self.ordered.insert((OrderedScore(score), member));
        is_new
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        if let Some(score) = self.scores.remove(member) {
            self.ordered.remove(&(OrderedScore(score), Bytes::copy_from_slice(member)));
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        self.ordered
            .iter()
            .position(|(s, m)| s.0 == score && m.as_ref() == member)
    }

    /// Members in ascending (score, member) order within `[start, end]`,
    /// with the same negative-index and clamping rules as `LRANGE`.
    pub fn range(&self, start: i64, end: i64) -> Vec<(Bytes, f64)> {
        let len = self.ordered.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let start = norm(start).min(len - 1).max(0);
        let end = norm(end).min(len - 1);
        if start > end || end < 0 {
            return Vec::new();
        }
        self.ordered
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .map(|(s, m)| (m.clone(), s.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_update_keeps_indices_in_sync() {
        let mut z = ZSet::default();
        assert!(z.add(Bytes::from_static(b"a"), 1.0));
        assert!(!z.add(Bytes::from_static(b"a"), 2.0));
        assert_eq!(z.score(b"a"), Some(2.0));
        assert_eq!(z.len(), 1);
        assert_eq!(z.ordered.len(), 1);
    }

    #[test]
    fn range_and_rank() {
        let mut z = ZSet::default();
        z.add(Bytes::from_static(b"a"), 3.0);
        z.add(Bytes::from_static(b"b"), 1.0);
        z.add(Bytes::from_static(b"c"), 2.0);
        let r = z.range(0, -1);
        let names: Vec<_> = r.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(
            names,
            vec![
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
                Bytes::from_static(b"a")
            ]
        );
        assert_eq!(z.rank(b"a"), Some(2));
    }

    #[test]
    fn remove_drops_from_both_indices() {
        let mut z = ZSet::default();
        z.add(Bytes::from_static(b"a"), 1.0);
        assert!(z.remove(b"a"));
        assert_eq!(z.len(), 0);
        assert_eq!(z.ordered.len(), 0);
    }
}
