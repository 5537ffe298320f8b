use super::codec::{self, RoleFrame};
use super::envelope::{RequestEnvelope, ResponseEnvelope, code};
use super::topic::{self, ConnectionIdentity, RoleTopics, TopicScheme};
use crate::utils::error::CodecError;
use serde_json::{Map, Value, json};
use std::collections::HashSet;

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

#[test]
fn test_request_and_response_topics_share_identity_and_seq() {
    let topics = TopicScheme::default();
    let req = topics.request("c1", "seq1");
    assert_eq!(req, "mchat/msg/req/c1/seq1");
    assert_eq!(topics.response("c1", "seq1"), "mchat/msg/resp/c1/seq1");
    assert_eq!(
        topics.response_for_request(&req).as_deref(),
        Some("mchat/msg/resp/c1/seq1")
    );
}

#[test]
fn test_parse_request_topic() {
    let topics = TopicScheme::new("app/rpc/", "app");
    assert_eq!(
        topics.parse_request("app/rpc/req/c1/seq_1"),
        Some(("c1".to_string(), "seq_1".to_string()))
    );
    assert_eq!(topics.parse_request("app/rpc/req/c1"), None);
    assert_eq!(topics.parse_request("app/rpc/req/c1/a/b"), None);
    assert_eq!(topics.parse_request("app/rpc/resp/c1/seq_1"), None);
    assert_eq!(topics.parse_request("app/rpc/req//seq"), None);
}

#[test]
fn test_parse_response_only_matches_own_identity() {
    let topics = TopicScheme::default();
    assert_eq!(
        topics.parse_response("c1", "mchat/msg/resp/c1/seq9"),
        Some("seq9")
    );
    assert_eq!(topics.parse_response("c1", "mchat/msg/resp/c2/seq9"), None);
    assert_eq!(topics.parse_response("c1", "mchat/msg/resp/c1/"), None);
}

#[test]
fn test_filters_and_push_topics() {
    let topics = TopicScheme::default();
    assert_eq!(topics.response_filter("c1"), "mchat/msg/resp/c1/+");
    assert_eq!(topics.request_filter(), "mchat/msg/req/+/+");
    assert_eq!(
        topics.shared_request_filter(Some("gw")),
        "$share/gw/mchat/msg/req/+/+"
    );
    assert_eq!(topics.shared_request_filter(Some("  ")), "mchat/msg/req/+/+");
    assert_eq!(topics.inbox("e2"), "mchat/inbox/e2");
    assert_eq!(topics.group("g1"), "mchat/group/g1");
    assert_eq!(topics.status("e1"), "mchat/status/e1");
}

#[test]
fn test_role_topics_and_role_extraction() {
    let t = RoleTopics::new("moltbot/gw", "dev1", "operator");
    assert_eq!(t.req, "moltbot/gw/dev1/operator/req");
    assert_eq!(t.res, "moltbot/gw/dev1/operator/res");
    assert_eq!(t.evt, "moltbot/gw/dev1/operator/evt");

    let root = topic::role_root("moltbot/gw", "dev1");
    assert_eq!(topic::role_of(&root, &t.res), Some("operator"));
    assert_eq!(topic::role_of(&root, "moltbot/gw/dev1/node/evt"), Some("node"));
    assert_eq!(topic::role_of(&root, "moltbot/gw/dev1/node/req"), None);
    assert_eq!(topic::role_of(&root, "moltbot/gw/dev2/node/res"), None);
}

#[test]
fn test_generated_identity_shape() {
    let id = ConnectionIdentity::generate("e1", "rs");
    let parts: Vec<&str> = id.as_str().split('_').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "e1");
    assert_eq!(parts[1], "rs");
    assert_eq!(parts[2].len(), 8);
    assert!(ConnectionIdentity::explicit("  ").is_none());
    assert!(ConnectionIdentity::explicit("a/b").is_none());
    assert_eq!(ConnectionIdentity::explicit(" c1 ").unwrap().as_str(), "c1");
}

#[test]
fn test_generated_identity_is_one_topic_level() {
    let id = ConnectionIdentity::generate("team/a+b#", "r/s");
    assert!(id.as_str().starts_with("team-a-b-_r-s_"));
    assert!(ConnectionIdentity::explicit(id.as_str()).is_some());

    let scheme = TopicScheme::default();
    let request = scheme.request(id.as_str(), "seq_1");
    assert_eq!(request.split('/').count(), 5);
    assert_eq!(
        scheme.parse_request(&request),
        Some((id.as_str().to_string(), "seq_1".to_string()))
    );
}

#[test]
fn test_sequence_ids_do_not_collide() {
    let ids: HashSet<String> = (0..10_000).map(|_| topic::generate_sequence_id()).collect();
    assert_eq!(ids.len(), 10_000);
    assert!(ids.iter().all(|id| id.starts_with("seq_")));
}

#[test]
fn test_sanitize_strips_nul_and_trims() {
    assert_eq!(codec::sanitize("  {\"a\":1}\0\n"), "{\"a\":1}");
    assert_eq!(codec::sanitize("\0 \0"), "");
    assert_eq!(codec::sanitize_bytes(b"\0 {} \t\0"), b"{}".to_vec());
    assert!(codec::prepare_outbound(" \0 ").is_none());
}

#[test]
fn test_request_codec_preserves_params() {
    let p = params(json!({
        "to_employee_id": "e2",
        "content": "héllo 世界 \u{1F600}",
        "nested": {"list": [1, 2.5, null, true], "obj": {"k": "v"}},
        "flag": false,
        "none": null,
        "text_with_nul": "a\u{0000}b"
    }));
    let bytes = codec::encode_request("msg.send_private", &p).unwrap();
    let decoded = codec::decode_request(&bytes).unwrap();
    assert_eq!(decoded.action, "msg.send_private");
    assert_eq!(decoded.params, p);
}

#[test]
fn test_action_overrides_param_named_action() {
    let p = params(json!({"action": "spoofed", "x": 1}));
    let bytes = codec::encode_request("org.tree", &p).unwrap();
    let decoded = codec::decode_request(&bytes).unwrap();
    assert_eq!(decoded.action, "org.tree");
    assert_eq!(decoded.params.get("x"), Some(&json!(1)));
}

#[test]
fn test_decode_request_errors() {
    assert!(matches!(
        codec::decode_request(b"not json"),
        Err(CodecError::InvalidJson(_))
    ));
    assert!(matches!(
        codec::decode_request(b"[1,2]"),
        Err(CodecError::NotAnObject)
    ));
    assert!(matches!(
        codec::decode_request(b"{\"x\":1}"),
        Err(CodecError::MissingAction)
    ));
    assert!(matches!(
        codec::decode_request(b"{\"action\":\"\"}"),
        Err(CodecError::MissingAction)
    ));
    assert!(matches!(
        codec::decode_request(b" \0 "),
        Err(CodecError::EmptyPayload)
    ));
}

#[test]
fn test_decode_response_data_handling() {
    let with_data = codec::decode_response(br#"{"code":0,"message":"ok","data":{"a":1}}"#).unwrap();
    assert_eq!(with_data.result(), Some(&json!({"a": 1})));

    let null_data = codec::decode_response(br#"{"code":0,"message":"ok","data":null}"#).unwrap();
    let missing = codec::decode_response(br#"{"code":0,"message":"ok"}"#).unwrap();
    assert_eq!(null_data, missing);
    assert!(missing.data.is_none());

    let scalar = codec::decode_response(br#"{"code":0,"message":"ok","data":"str"}"#).unwrap();
    assert_eq!(scalar.data, Some(json!("str")));

    let failed = codec::decode_response(br#"{"code":404,"message":"nope","data":{"x":1}}"#).unwrap();
    assert!(!failed.is_ok());
    assert!(failed.result().is_none());
}

#[test]
fn test_decode_response_rejects_malformed() {
    assert!(codec::decode_response(b"{oops").is_err());
    assert!(codec::decode_response(br#"{"message":"no code"}"#).is_err());
    assert!(codec::decode_response(br#"{"code":"0"}"#).is_err());
    assert!(codec::decode_response(b"42").is_err());
}

#[test]
fn test_encode_response_omits_missing_data() {
    let bytes = codec::encode_response(&ResponseEnvelope::unauthorized()).unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value, json!({"code": code::UNAUTHORIZED, "message": "Unauthorized"}));
}

#[test]
fn test_role_frames() {
    let req = codec::encode_role_request("node.invoke", "seq_1", &params(json!({"x": 1}))).unwrap();
    let value: Value = serde_json::from_str(&req).unwrap();
    assert_eq!(value["action"], "node.invoke");
    assert_eq!(value["seq_id"], "seq_1");

    let res = codec::encode_role_response("seq_1", &ResponseEnvelope::ok(json!({"y": 2}))).unwrap();
    match codec::decode_role_frame(&res).unwrap() {
        RoleFrame::Response { seq_id, envelope } => {
            assert_eq!(seq_id, "seq_1");
            assert_eq!(envelope.result(), Some(&json!({"y": 2})));
        }
        other => panic!("expected response, got {other:?}"),
    }

    match codec::decode_role_frame(r#"{"event":"tick"}"#).unwrap() {
        RoleFrame::Event(v) => assert_eq!(v["event"], "tick"),
        other => panic!("expected event, got {other:?}"),
    }
}

#[test]
fn test_request_envelope_builder() {
    let req = RequestEnvelope::new("auth.bind").with_param("employee_id", "e1");
    assert_eq!(req.str_param("employee_id"), Some("e1"));
    assert_eq!(req.str_param("missing"), None);
}
