use super::*;
use crate::connection::{Backoff, ConnectionManager, Publisher};
use crate::persistence::{
    Department, Employee, Group, MemoryDirectory, SessionDirectory, SessionStore,
};
use crate::protocol::codec::{decode_response, encode_request};
use crate::protocol::envelope::{RequestEnvelope, code};
use crate::protocol::topic::TopicScheme;
use crate::transport::{ConnectOptions, Connector, LinkEvent, LocalConnector, QoS};
use crate::utils::error::{HandlerError, TransportError};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _retain: bool,
    ) -> Result<(), TransportError> {
        let body = serde_json::from_slice(&payload).unwrap();
        self.sent.lock().unwrap().push((topic.to_string(), body));
        Ok(())
    }
}

struct Fixture {
    dispatcher: Dispatcher,
    sessions: Arc<SessionStore>,
    published: Arc<RecordingPublisher>,
}

fn directory() -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    directory.upsert_department(Department {
        department_id: "d1".to_string(),
        name: "Eng".to_string(),
        parent_id: None,
        sort_order: 1,
    });
    let mut e1 = Employee::new("e1", "Ada");
    e1.department_id = Some("d1".to_string());
    directory.upsert_employee(e1);
    directory.upsert_employee(Employee::new("e2", "Grace"));
    let mut off = Employee::new("e3", "Off");
    off.status = "disabled".to_string();
    directory.upsert_employee(off);
    directory.upsert_group(Group {
        group_id: "g1".to_string(),
        name: "core".to_string(),
        creator_employee_id: "e1".to_string(),
        created_at: "2026-01-01T00:00:00.000Z".to_string(),
        members: vec!["e1".to_string(), "e2".to_string()],
    });
    directory.upsert_group(Group {
        group_id: "g2".to_string(),
        name: "ops".to_string(),
        creator_employee_id: "e2".to_string(),
        created_at: "2026-02-01T00:00:00.000Z".to_string(),
        members: vec!["e2".to_string()],
    });
    directory
}

fn fixture_with(directory: MemoryDirectory) -> Fixture {
    let sessions = Arc::new(SessionStore::temporary().unwrap());
    let published = Arc::new(RecordingPublisher::default());
    let services = Services {
        sessions: sessions.clone(),
        directory: Arc::new(directory),
        publisher: published.clone(),
        topics: TopicScheme::default(),
    };
    Fixture {
        dispatcher: Dispatcher::new(services),
        sessions,
        published,
    }
}

fn fixture() -> Fixture {
    let fx = fixture_with(directory());
    fx.sessions.bind("c1", "e1", None).unwrap();
    fx
}

fn request(action: &str, params: Value) -> RequestEnvelope {
    let mut request = RequestEnvelope::new(action);
    if let Value::Object(map) = params {
        request.params = map;
    }
    request
}

#[tokio::test]
async fn test_unbound_caller_is_unauthorized() {
    let fx = fixture_with(directory());
    let reply = fx
        .dispatcher
        .dispatch("c9", "s1", request("org.tree", json!({})))
        .await;
    assert_eq!(reply, crate::protocol::ResponseEnvelope::unauthorized());

    let reply = fx
        .dispatcher
        .dispatch("c9", "s2", request("no.such", json!({})))
        .await;
    assert_eq!(reply.code, code::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_action_names_the_action() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("no.such", json!({"x": 1})))
        .await;
    assert_eq!(reply.code, code::BAD_REQUEST);
    assert_eq!(reply.message, "Unknown action: no.such");
    assert!(reply.data.is_none());
    assert!(fx.published.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bind_validates_and_upserts() {
    let fx = fixture_with(directory());

    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("auth.bind", json!({})))
        .await;
    assert_eq!((reply.code, reply.message.as_str()), (400, "Missing employee_id"));

    let reply = fx
        .dispatcher
        .dispatch("c1", "s2", request("auth.bind", json!({"employee_id": "e3"})))
        .await;
    assert_eq!(reply.code, code::NOT_FOUND);

    let reply = fx
        .dispatcher
        .dispatch(
            "c1",
            "s3",
            request("auth.bind", json!({"employee_id": "e1", "device_info": "cli"})),
        )
        .await;
    assert_eq!(reply.data, Some(json!({})));
    assert_eq!(fx.sessions.lookup("c1").unwrap(), Some("e1".to_string()));

    fx.dispatcher
        .dispatch("c1", "s4", request("auth.bind", json!({"employee_id": "e2"})))
        .await;
    assert_eq!(fx.sessions.lookup("c1").unwrap(), Some("e2".to_string()));
}

#[tokio::test]
async fn test_org_tree_on_empty_directory() {
    let fx = fixture_with(MemoryDirectory::new());
    fx.sessions.bind("c1", "e1", None).unwrap();

    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("org.tree", json!({})))
        .await;
    assert_eq!(reply.code, code::OK);
    assert_eq!(reply.message, "ok");
    assert_eq!(reply.data, Some(json!({"departments": [], "employees": []})));
}

#[tokio::test]
async fn test_org_tree_lists_active_employees() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("org.tree", json!({})))
        .await;
    let data = reply.data.unwrap();
    assert_eq!(data["departments"][0]["department_id"], "d1");
    let ids: Vec<&str> = data["employees"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["employee_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["e1", "e2"]);
    assert_eq!(data["employees"][0]["department_id"], "d1");
}

#[tokio::test]
async fn test_send_private_relays_to_inbox() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .dispatch(
            "c1",
            "s1",
            request("msg.send_private", json!({"to_employee_id": "e2", "content": "hi"})),
        )
        .await;
    assert_eq!(reply.code, code::OK);
    let data = reply.data.unwrap();
    let msg_id = data["msg_id"].as_str().unwrap();
    assert!(msg_id.starts_with("msg_"));
    assert_eq!(msg_id.len(), 16);
    assert_eq!(data["to_employee_id"], "e2");

    let sent = fx.published.sent.lock().unwrap();
    let (topic, body) = &sent[0];
    assert_eq!(topic, "mchat/inbox/e2");
    assert_eq!(body["from_employee_id"], "e1");
    assert_eq!(body["content"], "hi");
    assert_eq!(body["type"], "private");
    assert_eq!(body["msg_id"], data["msg_id"]);
    assert!(body.get("quote_msg_id").is_none());
}

#[tokio::test]
async fn test_send_private_rejects_missing_or_unknown_target() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("msg.send_private", json!({"content": "hi"})))
        .await;
    assert_eq!(reply.message, "Missing to_employee_id");

    let reply = fx
        .dispatcher
        .dispatch(
            "c1",
            "s2",
            request("msg.send_private", json!({"to_employee_id": "e3"})),
        )
        .await;
    assert_eq!(reply.code, code::NOT_FOUND);
    assert!(fx.published.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_send_group_requires_membership() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .dispatch(
            "c1",
            "s1",
            request("msg.send_group", json!({"group_id": "g2", "content": "x"})),
        )
        .await;
    assert_eq!(reply.code, code::FORBIDDEN);

    let reply = fx
        .dispatcher
        .dispatch(
            "c1",
            "s2",
            request(
                "msg.send_group",
                json!({"group_id": "g1", "content": {"text": "hey"}, "quote_msg_id": "msg_1"}),
            ),
        )
        .await;
    assert_eq!(reply.code, code::OK);
    assert_eq!(reply.data.unwrap()["group_id"], "g1");

    let sent = fx.published.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "mchat/group/g1");
    assert_eq!(sent[0].1["content"], json!({"text": "hey"}));
    assert_eq!(sent[0].1["quote_msg_id"], "msg_1");
}

#[tokio::test]
async fn test_read_ack() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("msg.read_ack", json!({})))
        .await;
    assert_eq!(reply.message, "Missing msg_id");

    let reply = fx
        .dispatcher
        .dispatch("c1", "s2", request("msg.read_ack", json!({"msg_id": "msg_1"})))
        .await;
    assert_eq!(reply.data, Some(json!({})));
}

#[tokio::test]
async fn test_group_list_for_caller_and_all() {
    let fx = fixture();
    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("group.list", json!({})))
        .await;
    let groups = reply.data.unwrap()["groups"].clone();
    assert_eq!(groups.as_array().unwrap().len(), 1);
    assert_eq!(groups[0]["group_id"], "g1");
    assert_eq!(groups[0]["member_count"], 2);

    let reply = fx
        .dispatcher
        .dispatch("c1", "s2", request("group.list", json!({"all": true})))
        .await;
    let groups = reply.data.unwrap()["groups"].clone();
    assert_eq!(groups[0]["group_id"], "g2");
    assert_eq!(groups[1]["group_id"], "g1");
}

#[tokio::test]
async fn test_revoked_session_is_unauthorized() {
    let fx = fixture();
    assert!(fx.sessions.revoke("c1").unwrap());
    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("org.tree", json!({})))
        .await;
    assert_eq!(reply.code, code::UNAUTHORIZED);
}

struct Boom;

#[async_trait]
impl Handler for Boom {
    async fn handle(&self, ctx: &RequestContext, _services: &Services) -> Result<Value, HandlerError> {
        if ctx.action == "test.boom" {
            panic!("boom");
        }
        Err(HandlerError::Internal("database on fire".to_string()))
    }
}

#[tokio::test]
async fn test_handler_failures_become_server_errors() {
    let mut fx = fixture();
    fx.dispatcher.register("test.boom", Arc::new(Boom));
    fx.dispatcher.register("test.internal", Arc::new(Boom));

    let reply = fx
        .dispatcher
        .dispatch("c1", "s1", request("test.boom", json!({})))
        .await;
    assert_eq!(reply, crate::protocol::ResponseEnvelope::server_error());

    let reply = fx
        .dispatcher
        .dispatch("c1", "s2", request("test.internal", json!({})))
        .await;
    assert_eq!(reply.code, code::SERVER_ERROR);
    assert_eq!(reply.message, "Server error");

    let reply = fx
        .dispatcher
        .dispatch("c1", "s3", request("msg.read_ack", json!({"msg_id": "m"})))
        .await;
    assert_eq!(reply.code, code::OK);
}

#[tokio::test]
async fn test_undecodable_payloads() {
    let fx = fixture();
    let cases: [(&[u8], &str); 4] = [
        (b"{not json", "Invalid JSON"),
        (b"  \0 ", "Invalid JSON"),
        (br#"{"x": 1}"#, "Missing action"),
        (b"[1, 2]", "Missing action"),
    ];
    for (payload, message) in cases {
        let reply = fx.dispatcher.handle_payload("c1", "s1", payload).await;
        assert_eq!(reply.code, code::BAD_REQUEST);
        assert_eq!(reply.message, message);
    }
}

#[test]
fn test_default_action_table() {
    let fx = fixture_with(MemoryDirectory::new());
    assert_eq!(
        fx.dispatcher.actions(),
        vec![
            "auth.bind",
            "group.list",
            "msg.read_ack",
            "msg.send_group",
            "msg.send_private",
            "org.tree",
        ]
    );
}

fn gateway(connector: &LocalConnector, share_group: Option<&str>) -> (Gateway, Arc<SessionStore>) {
    let conn = ConnectionManager::new(
        Arc::new(connector.clone()),
        ConnectOptions::new("localhost", 1883, "gateway"),
        Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
    );
    let sessions = Arc::new(SessionStore::temporary().unwrap());
    let services = Services {
        sessions: sessions.clone(),
        directory: Arc::new(directory()),
        publisher: Arc::new(conn.clone()),
        topics: TopicScheme::default(),
    };
    let gateway = Gateway::new(
        conn,
        Dispatcher::new(services),
        TopicScheme::default(),
        share_group.map(str::to_string),
    );
    (gateway, sessions)
}

#[test]
fn test_shared_request_filter() {
    let connector = LocalConnector::default();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let (plain, _) = gateway(&connector, None);
        assert_eq!(plain.request_filter(), "mchat/msg/req/+/+");
        let (shared, _) = gateway(&connector, Some("gw"));
        assert_eq!(shared.request_filter(), "$share/gw/mchat/msg/req/+/+");
    });
}

#[tokio::test]
async fn test_gateway_answers_on_mirror_topic() {
    let connector = LocalConnector::default();
    let (mut gw, sessions) = gateway(&connector, Some("gw"));
    sessions.bind("c1", "e1", None).unwrap();
    gw.start().await.unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(gw.serve(async {
        let _ = stopped.await;
    }));

    let (link, mut events) = connector
        .connect(&ConnectOptions::new("localhost", 1883, "raw"))
        .await
        .unwrap();
    link.subscribe("mchat/msg/resp/c1/+", QoS::AtLeastOnce)
        .await
        .unwrap();

    let body = encode_request("org.tree", &Map::new()).unwrap();
    link.publish("mchat/msg/req/c1/seq1", body, QoS::AtLeastOnce, false)
        .await
        .unwrap();
    link.publish("mchat/msg/req/c1/seq2", b"{oops".to_vec(), QoS::AtLeastOnce, false)
        .await
        .unwrap();

    let mut replies = Vec::new();
    while replies.len() < 2 {
        match events.recv().await.unwrap() {
            LinkEvent::Message { topic, payload } => {
                replies.push((topic, decode_response(&payload).unwrap()))
            }
            LinkEvent::Closed { reason } => panic!("link closed: {reason}"),
        }
    }
    replies.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(replies[0].0, "mchat/msg/resp/c1/seq1");
    assert_eq!(replies[0].1.code, code::OK);
    assert_eq!(replies[1].0, "mchat/msg/resp/c1/seq2");
    assert_eq!(replies[1].1.message, "Invalid JSON");

    stop.send(()).unwrap();
    server.await.unwrap();
    assert!(!connector.broker().lock().unwrap().clients.contains_key("gateway"));
}
