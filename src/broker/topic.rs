//! Topic filters
//!
//! A `Topic` holds the subscribers of one topic *filter* (which may contain
//! the MQTT wildcards `+` and `#`). Shared subscriptions are stored under
//! their full `$share/<group>/<filter>` key; [`Topic::shared_group`] tells
//! the engine to deliver to one member instead of all.
//!
//! Concurrency note: callers must synchronize access to `Topic` (for example
//! via the broker lock) when modifying subscriptions.

use std::collections::BTreeSet;

pub type SubscriberId = String;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: BTreeSet<SubscriberId>,
    /// Round-robin position for shared subscriptions.
    pub cursor: usize,
}

impl Topic {
    /// Create a new topic with the given filter.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: BTreeSet::new(),
            cursor: 0,
        }
    }

    /// Add a subscriber to the topic. Duplicate adds are ignored.
    pub fn subscribe(&mut self, id: SubscriberId) {
        self.subscribers.insert(id);
    }

    /// Remove a subscriber from the topic.
    pub fn unsubscribe(&mut self, id: &SubscriberId) {
        self.subscribers.remove(id);
    }

    /// `Some(group)` for `$share/<group>/<filter>` subscriptions.
    pub fn shared_group(&self) -> Option<&str> {
        split_shared(&self.name).map(|(group, _)| group)
    }

    /// The filter used for matching, without any `$share/<group>/` prefix.
    pub fn filter(&self) -> &str {
        split_shared(&self.name).map_or(self.name.as_str(), |(_, filter)| filter)
    }

    pub fn matches(&self, topic: &str) -> bool {
        filter_matches(self.filter(), topic)
    }

    /// Next member of a shared subscription, advancing the cursor.
    pub fn next_shared(&mut self) -> Option<SubscriberId> {
        if self.subscribers.is_empty() {
            return None;
        }
        let idx = self.cursor % self.subscribers.len();
        self.cursor = self.cursor.wrapping_add(1);
        self.subscribers.iter().nth(idx).cloned()
    }
}

fn split_shared(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix("$share/")?;
    rest.split_once('/')
}

/// MQTT topic filter matching: `+` matches exactly one level, a trailing
/// `#` matches the parent level and everything below it. Wildcards at the
/// first level never match topics starting with `$`.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
