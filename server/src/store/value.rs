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

use super::stream::Stream;
use super::zset::ZSet;
use bytes::Bytes;
use std::collections::VecDeque;

/// The "never expires" sentinel, distinct from any real timestamp.
pub const NEVER: Option<u64> = None;

#[derive(Debug, Clone)]
pub enum Data {
    /// Stored as bytes; may have been produced by an integer mutation, in
    /// which case it still round-trips through `GET` as text.
    Str(Bytes),
    List(VecDeque<Bytes>),
    Stream(Stream),
    ZSet(ZSet),
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub data: Data,
    /// Absolute expiry in milliseconds since epoch; `None` means never.
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: NEVER,
        }
    }

    pub fn with_ttl(data: Data, ttl_ms: u64, now_ms: u64) -> Self {
        Self {
            data,
            expires_at: Some(now_ms + ttl_ms),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(t) if t <= now_ms)
    }
}
