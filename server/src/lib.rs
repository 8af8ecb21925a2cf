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

//! `kvd` as a library: everything `main.rs` wires together, exposed so
//! integration tests can drive a real listener end-to-end.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod listener;
pub mod protocol;
pub mod pubsub;
pub mod rdb;
pub mod replication;
pub mod session;
pub mod store;
pub mod util;
pub mod wait;
