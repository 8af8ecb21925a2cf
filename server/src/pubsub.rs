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

//! Publish/subscribe fan-out. The hub never owns a subscriber's socket —
//! it only borrows the `Session`'s write half for the duration of a send,
//! so a subscriber's own replies and a publisher's fan-out message
//! serialize through the same per-connection mutex without the hub
//! holding the connection alive past its teardown.

use crate::protocol::Reply;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

struct Subscriber {
    id: u64,
    write_half: std::sync::Weak<AsyncMutex<OwnedWriteHalf>>,
}

#[derive(Default)]
pub struct PubSubHub {
    channels: RwLock<HashMap<Bytes, Vec<Subscriber>>>,
}

impl PubSubHub {
    pub fn subscribe(&self, channel: Bytes, id: u64, write_half: &Arc<AsyncMutex<OwnedWriteHalf>>) {
        self.channels
            .write()
            .entry(channel)
            .or_default()
            .push(Subscriber {
                id,
                write_half: Arc::downgrade(write_half),
            });
    }

    pub fn unsubscribe(&self, channel: &[u8], id: u64) {
        let mut channels = self.channels.write();
        if let Some(v) = channels.get_mut(channel) {
            v.retain(|s| s.id != id);
            if v.is_empty() {
                channels.remove(channel);
            }
        }
    }

    pub fn unsubscribe_all(&self, id: u64) {
        let mut channels = self.channels.write();
        channels.retain(|_, v| {
            v.retain(|s| s.id != id);
            !v.is_empty()
        });
    }

    /// Publishes `message` to `channel`'s subscribers and returns the
    /// number that received it.
    pub async fn publish(&self, channel: &[u8], message: &[u8]) -> i64 {
        let recipients: Vec<std::sync::Weak<AsyncMutex<OwnedWriteHalf>>> = {
            let channels = self.channels.read();
            match channels.get(channel) {
                Some(v) => v.iter().map(|s| s.write_half.clone()).collect(),
                None => return 0,
            }
        };
        let frame = Reply::Array(vec![
            Reply::bulk("message"),
            Reply::bulk(Bytes::copy_from_slice(channel)),
            Reply::bulk(Bytes::copy_from_slice(message)),
        ])
        .to_bytes();
        let mut delivered = 0;
        for weak in recipients {
            if let Some(write_half) = weak.upgrade() {
                let mut w = write_half.lock().await;
                if w.write_all(&frame).await.is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_write_half() -> Arc<AsyncMutex<OwnedWriteHalf>> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();
        let (_r, w) = client.into_split();
        Arc::new(AsyncMutex::new(w))
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_delivers_to_nobody() {
        let hub = PubSubHub::default();
        assert_eq!(hub.publish(b"ch", b"msg").await, 0);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_and_unsubscribe_all_clears_it() {
        let hub = PubSubHub::default();
        let w = connected_write_half().await;
        hub.subscribe(Bytes::from_static(b"ch"), 1, &w);
        assert_eq!(hub.publish(b"ch", b"hi").await, 1);
        hub.unsubscribe_all(1);
        assert_eq!(hub.channels.read().len(), 0);
        assert_eq!(hub.publish(b"ch", b"hi").await, 0);
    }
}
