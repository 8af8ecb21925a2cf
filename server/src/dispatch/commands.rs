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

//! The command metadata table: arity, consulted before a command is
//! queued (`MULTI`) or dispatched. Whether a command actually propagates
//! to replicas is decided at runtime by whether it mutated the store
//! (the `wrote` flag each handler returns), not by a static
//! classification here — `LPOP` on an empty list, for instance, counts
//! as a read even though the command is generally write-shaped.

#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    /// Minimum total argument count, command name included.
    pub min_arity: usize,
}

const fn info(min_arity: usize) -> CommandInfo {
    CommandInfo { min_arity }
}

/// Looks up a command by its upper-cased name.
pub fn lookup(name: &str) -> Option<CommandInfo> {
    Some(match name {
        "PING" => info(1),
        "ECHO" => info(2),
        "COMMAND" => info(1),
        "CONFIG" => info(3),
        "SET" => info(3),
        "GET" => info(2),
        "INCR" => info(2),
        "DEL" => info(2),
        "EXISTS" => info(2),
        "FLUSHALL" => info(1),
        "TYPE" => info(2),
        "RPUSH" => info(3),
        "LPUSH" => info(3),
        "LRANGE" => info(4),
        "LLEN" => info(2),
        "LPOP" => info(2),
        "BLPOP" => info(3),
        "XADD" => info(5),
        "XRANGE" => info(4),
        "XREAD" => info(4),
        "ZADD" => info(4),
        "ZRANK" => info(3),
        "ZRANGE" => info(4),
        "ZCARD" => info(2),
        "ZSCORE" => info(3),
        "ZREM" => info(3),
        "KEYS" => info(2),
        "MULTI" => info(1),
        "EXEC" => info(1),
        "DISCARD" => info(1),
        "SUBSCRIBE" => info(2),
        "UNSUBSCRIBE" => info(1),
        "PUBLISH" => info(3),
        "REPLCONF" => info(1),
        "PSYNC" => info(3),
        "WAIT" => info(3),
        _ => return None,
    })
}
