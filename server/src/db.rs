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

//! `Db` bundles every piece of process-wide shared state — the store, the
//! two wait registries, the pub/sub hub, and the replication state — into
//! one handle cloned as an `Arc` into every connection and background
//! task, mirroring the teacher's `CoreDB { shared: Arc<Shared> }` shape.

use crate::config::Config;
use crate::pubsub::PubSubHub;
use crate::replication::ReplicationState;
use crate::store::Store;
use crate::wait::{ListWaitRegistry, StreamWaitRegistry};
use std::sync::Arc;

pub struct Shared {
    pub store: Store,
    pub list_wait: ListWaitRegistry,
    pub stream_wait: StreamWaitRegistry,
    pub pubsub: PubSubHub,
    pub repl: ReplicationState,
    pub config: Config,
}

#[derive(Clone)]
pub struct Db {
    pub shared: Arc<Shared>,
}

impl Db {
    pub fn new(config: Config) -> Self {
        let repl = ReplicationState::new(config.role());
        Self {
            shared: Arc::new(Shared {
                store: Store::new(),
                list_wait: ListWaitRegistry::default(),
                stream_wait: StreamWaitRegistry::default(),
                pubsub: PubSubHub::default(),
                repl,
                config,
            }),
        }
    }
}
