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

//! The wire protocol: a RESP-style framed reader/writer plus the raw-blob
//! exception used for RDB transfer during a replication handshake.

mod parse;
mod ser;

pub use parse::{FrameReader, ParseError, ParseOutcome};
pub use ser::{encode_command, Reply};

/// One parsed request frame: always an array of bulk strings once a
/// client has sent its first byte, but inline simple-string pings are not
/// supported — every command arrives as `*<n>\r\n$<len>\r\n<bytes>\r\n...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<bytes::Bytes>),
    Array(Option<Vec<Value>>),
}

impl Value {
    /// Interprets this value as a command frame: a non-null array of
    /// non-null bulk strings, returning each as owned bytes.
    pub fn into_command_args(self) -> Option<Vec<bytes::Bytes>> {
        match self {
            Value::Array(Some(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::Bulk(Some(b)) => Some(b),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}
