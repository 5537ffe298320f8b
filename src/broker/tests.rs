use super::Broker;
use super::engine::HISTORY_LIMIT;
use super::message::Message;
use super::topic::{Topic, filter_matches};
use crate::transport::message::{LastWill, LinkEvent};
use tokio::sync::mpsc;

fn received(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LinkEvent::Message { topic, payload } = event {
            out.push((topic, String::from_utf8(payload).unwrap()));
        }
    }
    out
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("test_topic");
    topic.subscribe("client1".to_string());
    assert!(topic.subscribers.contains("client1"));
    topic.unsubscribe(&"client1".to_string());
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_filter_matching() {
    assert!(filter_matches("a/b/c", "a/b/c"));
    assert!(filter_matches("mchat/msg/req/+/+", "mchat/msg/req/c1/seq1"));
    assert!(!filter_matches("mchat/msg/req/+/+", "mchat/msg/req/c1"));
    assert!(!filter_matches("mchat/msg/req/+/+", "mchat/msg/req/c1/seq1/x"));
    assert!(filter_matches("a/#", "a"));
    assert!(filter_matches("a/#", "a/b/c"));
    assert!(filter_matches("#", "a/b"));
    assert!(!filter_matches("#", "$SYS/uptime"));
    assert!(!filter_matches("a/+", "b/c"));
}

#[test]
fn test_shared_topic_parsing() {
    let topic = Topic::new("$share/gw/mchat/msg/req/+/+");
    assert_eq!(topic.shared_group(), Some("gw"));
    assert_eq!(topic.filter(), "mchat/msg/req/+/+");
    assert!(topic.matches("mchat/msg/req/c1/s1"));

    let plain = Topic::new("mchat/inbox/e1");
    assert_eq!(plain.shared_group(), None);
    assert_eq!(plain.filter(), "mchat/inbox/e1");
}

#[test]
fn test_broker_publish_reaches_wildcard_subscriber() {
    let mut broker = Broker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    broker.register_client("c1", tx, None);
    broker.subscribe("mchat/msg/resp/c1/+", "c1");

    broker.publish(Message::new("mchat/msg/resp/c1/seq1", "hello", false));
    broker.publish(Message::new("mchat/msg/resp/c2/seq1", "other", false));

    assert_eq!(
        received(&mut rx),
        vec![("mchat/msg/resp/c1/seq1".to_string(), "hello".to_string())]
    );
    assert_eq!(broker.history.len(), 2);
    assert!(!broker.history[0].message_id.is_empty());
}

#[test]
fn test_history_is_bounded() {
    let mut broker = Broker::new();
    for i in 0..HISTORY_LIMIT + 10 {
        broker.publish(Message::new("mchat/status/e1", format!("m{i}"), false));
    }

    assert_eq!(broker.history.len(), HISTORY_LIMIT);
    assert_eq!(broker.history[0].payload, b"m10".to_vec());
    let recent = broker.published_on("mchat/status/e1");
    assert_eq!(recent.len(), HISTORY_LIMIT);
    assert_eq!(
        recent.last().unwrap().payload,
        format!("m{}", HISTORY_LIMIT + 9).into_bytes()
    );
}

#[test]
fn test_overlapping_filters_deliver_once() {
    let mut broker = Broker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    broker.register_client("c1", tx, None);
    broker.subscribe("a/+", "c1");
    broker.subscribe("a/#", "c1");

    broker.publish(Message::new("a/b", "x", false));
    assert_eq!(received(&mut rx).len(), 1);
}

#[test]
fn test_shared_subscription_round_robin() {
    let mut broker = Broker::new();
    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    broker.register_client("gw1", tx1, None);
    broker.register_client("gw2", tx2, None);
    broker.subscribe("$share/gw/req/+", "gw1");
    broker.subscribe("$share/gw/req/+", "gw2");

    for i in 0..4 {
        broker.publish(Message::new(format!("req/{i}"), "x", false));
    }

    assert_eq!(received(&mut rx1).len(), 2);
    assert_eq!(received(&mut rx2).len(), 2);
}

#[test]
fn test_retained_message_replayed_and_cleared() {
    let mut broker = Broker::new();
    broker.publish(Message::new("mchat/status/e1", "online", true));

    let (tx, mut rx) = mpsc::unbounded_channel();
    broker.register_client("watcher", tx, None);
    broker.subscribe("mchat/status/+", "watcher");
    assert_eq!(
        received(&mut rx),
        vec![("mchat/status/e1".to_string(), "online".to_string())]
    );

    broker.publish(Message::new("mchat/status/e1", Vec::new(), true));
    assert!(broker.retained.is_empty());
}

#[test]
fn test_drop_client_publishes_will_and_closes() {
    let mut broker = Broker::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let will = LastWill {
        topic: "mchat/status/e1".to_string(),
        payload: b"offline".to_vec(),
        retain: true,
    };
    broker.register_client("c1", tx, Some(will));
    broker.subscribe("x", "c1");

    assert!(broker.drop_client("c1", "network down"));
    assert!(!broker.clients.contains_key("c1"));
    assert!(!broker.topics["x"].subscribers.contains("c1"));
    assert_eq!(
        rx.try_recv().unwrap(),
        LinkEvent::Closed {
            reason: "network down".to_string()
        }
    );
    assert_eq!(broker.retained["mchat/status/e1"].payload_str(), "offline");
    assert!(!broker.drop_client("c1", "again"));
}

#[test]
fn test_register_same_id_takes_over_session() {
    let mut broker = Broker::new();
    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, _rx2) = mpsc::unbounded_channel();
    let first = broker.register_client("c1", tx1, None);
    let second = broker.register_client("c1", tx2, None);

    assert_ne!(first, second);
    assert!(!broker.is_live("c1", first));
    assert!(broker.is_live("c1", second));
    assert!(matches!(rx1.try_recv(), Ok(LinkEvent::Closed { .. })));
}

#[test]
fn test_cleanup_client_and_publish_to_closed_channel() {
    let mut broker = Broker::new();
    let (tx, rx) = mpsc::unbounded_channel();
    broker.register_client("c1", tx, None);
    broker.subscribe("t", "c1");
    drop(rx);

    // Closed channel: logged, not a panic
    broker.publish(Message::new("t", "hello", false));

    broker.cleanup_client("c1");
    assert!(!broker.clients.contains_key("c1"));
    assert!(broker.topics["t"].subscribers.is_empty());
    assert_eq!(broker.published_on("t").len(), 1);
}
