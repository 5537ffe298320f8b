//! Broker engine
//!
//! This module contains the in-process broker used by the local connector
//! and by the crate's tests. It follows MQTT routing semantics closely
//! enough for the RPC transport to behave as it does against a real broker:
//! - topic filters with `+`/`#` wildcards
//! - `$share/<group>/<filter>` shared subscriptions (one member per message)
//! - retained messages, replayed to new subscribers
//! - last-will publication when a session is lost without a clean disconnect
//! - session takeover when a second connection reuses a client id
//!
//! Concurrency and usage notes:
//! - The public API is synchronous and designed to be held behind a lock
//!   (`Arc<Mutex<Broker>>`). Delivery is a non-blocking channel send, so the
//!   lock is never held across I/O.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::message::Message;
use crate::broker::topic::{SubscriberId, Topic};
use crate::transport::message::{LastWill, LinkEvent};

/// Number of routed messages kept in `Broker::history`.
pub const HISTORY_LIMIT: usize = 1024;

/// One connected client session.
#[derive(Debug)]
pub struct Session {
    pub id: SubscriberId,
    /// Distinguishes successive connections that reuse the same client id.
    pub epoch: u64,
    pub sender: UnboundedSender<LinkEvent>,
    pub will: Option<LastWill>,
}

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub clients: HashMap<SubscriberId, Session>,
    pub retained: HashMap<String, Message>,
    /// The most recent routed messages, oldest first, at most
    /// `HISTORY_LIMIT` of them.
    pub history: VecDeque<Message>,
    next_epoch: u64,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. An existing session with the same id is taken
    /// over: it is closed and its will is published.
    pub fn register_client(
        &mut self,
        id: &str,
        sender: UnboundedSender<LinkEvent>,
        will: Option<LastWill>,
    ) -> u64 {
        if self.clients.contains_key(id) {
            self.drop_client(id, "session taken over");
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.clients.insert(
            id.to_string(),
            Session {
                id: id.to_string(),
                epoch,
                sender,
                will,
            },
        );
        epoch
    }

    /// `true` while the session identified by `(id, epoch)` is live.
    pub fn is_live(&self, id: &str, epoch: u64) -> bool {
        self.clients.get(id).is_some_and(|s| s.epoch == epoch)
    }

    pub fn remove_client(&mut self, client_id: &str) {
        self.clients.remove(client_id);
    }

    pub fn subscribe(&mut self, filter: &str, subscriber: &str) {
        let topic = self
            .topics
            .entry(filter.to_string())
            .or_insert_with(|| Topic::new(filter));
        topic.subscribe(subscriber.to_string());

        if topic.shared_group().is_some() {
            return;
        }

        if let Some(client) = self.clients.get(subscriber) {
            let mut replay: Vec<&Message> = self
                .retained
                .values()
                .filter(|m| topic.matches(&m.topic))
                .collect();
            replay.sort_by_key(|m| m.timestamp);
            for msg in replay {
                let _ = client.sender.send(LinkEvent::Message {
                    topic: msg.topic.clone(),
                    payload: msg.payload.clone(),
                });
            }
        }
    }

    pub fn unsubscribe(&mut self, filter: &str, subscriber: &str) {
        if let Some(t) = self.topics.get_mut(filter) {
            t.unsubscribe(&subscriber.to_string());
        }
    }

    pub fn publish(&mut self, mut msg: Message) {
        msg.timestamp = chrono::Utc::now().timestamp_millis();
        if msg.message_id.is_empty() {
            msg.message_id = Uuid::new_v4().to_string();
        }

        if msg.retain {
            if msg.payload.is_empty() {
                self.retained.remove(&msg.topic);
            } else {
                self.retained.insert(msg.topic.clone(), msg.clone());
            }
        }

        let mut recipients: BTreeSet<SubscriberId> = BTreeSet::new();
        for topic in self.topics.values_mut() {
            if !topic.matches(&msg.topic) {
                continue;
            }
            if topic.shared_group().is_some() {
                if let Some(member) = topic.next_shared() {
                    recipients.insert(member);
                }
            } else {
                recipients.extend(topic.subscribers.iter().cloned());
            }
        }

        if recipients.is_empty() {
            debug!(topic = %msg.topic, "no subscribers for topic");
        }

        for sub_id in &recipients {
            match self.clients.get(sub_id) {
                Some(client) => {
                    let event = LinkEvent::Message {
                        topic: msg.topic.clone(),
                        payload: msg.payload.clone(),
                    };
                    if let Err(e) = client.sender.send(event) {
                        warn!("Failed to send to {sub_id}: {e}");
                    }
                }
                None => warn!("No client registered with id: {sub_id}"),
            }
        }

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(msg);
    }

    /// Remove a client and all of its subscriptions (clean disconnect).
    pub fn cleanup_client(&mut self, client_id: &str) {
        self.remove_client(client_id);
        let id = client_id.to_string();
        for topic in self.topics.values_mut() {
            topic.unsubscribe(&id);
        }
        debug!("Cleaned up client {client_id}");
    }

    /// Abnormal loss: notify the session, publish its will, clean up.
    pub fn drop_client(&mut self, client_id: &str, reason: &str) -> bool {
        let Some(session) = self.clients.get(client_id) else {
            return false;
        };
        let _ = session.sender.send(LinkEvent::Closed {
            reason: reason.to_string(),
        });
        let will = session.will.clone();
        self.cleanup_client(client_id);
        if let Some(will) = will {
            self.publish(Message::new(will.topic, will.payload, will.retain));
        }
        true
    }

    /// Messages published on `topic`, oldest first.
    pub fn published_on(&self, topic: &str) -> Vec<Message> {
        self.history
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}
