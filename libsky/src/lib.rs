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

//! The core library shared between the crates in this workspace

pub mod util;

use std::error::Error;

/// A generic result
pub type TResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// The size of the read buffer in bytes
pub const BUF_CAP: usize = 8 * 1024;

/// The server's semantic version, reported in logs and the startup banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// A short description, reported in the startup banner
pub const URL: &str = "a single-node, in-memory key-value server";
