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

use std::{fmt, io::Error as IoError};

/// Result type for process-boundary failures: bind/startup/replication.
/// Per-command failures are never represented here; they are RESP error
/// frames produced by the dispatch layer.
pub type SkyResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(IoError),
    IoExtra(IoError, String),
    Bind(IoError, String),
    Protocol(String),
    Replication(String),
    Other(String),
}

impl Error {
    pub fn io_extra(ioe: IoError, extra: impl ToString) -> Self {
        Self::IoExtra(ioe, extra.to_string())
    }
    pub fn bind(ioe: IoError, addr: impl ToString) -> Self {
        Self::Bind(ioe, addr.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::IoExtra(e, extra) => write!(f, "I/O error while {extra}: {e}"),
            Self::Bind(e, addr) => write!(f, "failed to bind {addr}: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Replication(msg) => write!(f, "replication error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(ioe: IoError) -> Self {
        Self::Io(ioe)
    }
}
