//! Topic scheme
//!
//! Pure functions from (prefix, connection identity, sequence id) to topic
//! strings. Per-call topics:
//!
//! ```text
//! <rpc>/req/<connectionIdentity>/<seqId>
//! <rpc>/resp/<connectionIdentity>/<seqId>
//! ```
//!
//! The response topic is always the request topic with the verb segment
//! swapped, so a caller demultiplexes replies with one prefix match plus a
//! suffix extraction. Push topics live under a separate prefix:
//! `<push>/inbox/<accountId>`, `<push>/group/<groupId>`,
//! `<push>/status/<accountId>`.
//!
//! Per-role topics (multiplexed transports) have no per-call suffix:
//! `<gateway>/<connectionIdentity>/<role>/{req,res,evt}`.

use std::fmt;

use uuid::Uuid;

const REQ: &str = "req";
const RESP: &str = "resp";

/// The identity used in topic paths for one connection object.
///
/// Distinct from the broker-level client id and from the account identity.
/// Fixed for the lifetime of the connection object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity(String);

impl ConnectionIdentity {
    /// Use an explicit identity. Blank values are rejected.
    pub fn explicit(id: &str) -> Option<Self> {
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '+', '#']) {
            None
        } else {
            Some(Self(id.to_string()))
        }
    }

    /// `{accountId}_{platformTag}_{randomSuffix}`. Topic separators and
    /// wildcards in the inputs are replaced with `-`, so the result is
    /// always a single topic level.
    pub fn generate(account_id: &str, platform_tag: &str) -> Self {
        Self(format!(
            "{}_{}_{}",
            topic_level(account_id.trim()),
            topic_level(platform_tag),
            random_suffix(8)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `seq_<10 random chars>_<unix millis>`. Time plus random suffix makes a
/// collision between outstanding calls negligible.
pub fn generate_sequence_id() -> String {
    format!(
        "seq_{}_{}",
        random_suffix(10),
        chrono::Utc::now().timestamp_millis()
    )
}

fn topic_level(value: &str) -> String {
    value.replace(['/', '+', '#'], "-")
}

fn random_suffix(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

/// Topic builder for per-call RPC and push topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    rpc_prefix: String,
    push_prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("mchat/msg", "mchat")
    }
}

impl TopicScheme {
    pub fn new(rpc_prefix: &str, push_prefix: &str) -> Self {
        Self {
            rpc_prefix: rpc_prefix.trim_end_matches('/').to_string(),
            push_prefix: push_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn request(&self, identity: &str, seq_id: &str) -> String {
        format!("{}/{REQ}/{identity}/{seq_id}", self.rpc_prefix)
    }

    pub fn response(&self, identity: &str, seq_id: &str) -> String {
        format!("{}/{RESP}/{identity}/{seq_id}", self.rpc_prefix)
    }

    /// Wildcard a client subscribes to for all of its replies.
    pub fn response_filter(&self, identity: &str) -> String {
        format!("{}/{RESP}/{identity}/+", self.rpc_prefix)
    }

    /// Prefix shared by every reply addressed to `identity`.
    pub fn response_prefix(&self, identity: &str) -> String {
        format!("{}/{RESP}/{identity}/", self.rpc_prefix)
    }

    /// Wildcard the server subscribes to for all requests.
    pub fn request_filter(&self) -> String {
        format!("{}/{REQ}/+/+", self.rpc_prefix)
    }

    /// Request wildcard behind a shared-subscription group, when one is set.
    pub fn shared_request_filter(&self, share_group: Option<&str>) -> String {
        match share_group.map(str::trim).filter(|g| !g.is_empty()) {
            Some(group) => format!("$share/{group}/{}", self.request_filter()),
            None => self.request_filter(),
        }
    }

    pub fn request_prefix(&self) -> String {
        format!("{}/{REQ}/", self.rpc_prefix)
    }

    /// Split a request topic into `(connectionIdentity, seqId)`.
    pub fn parse_request(&self, topic: &str) -> Option<(String, String)> {
        let rest = topic.strip_prefix(&self.request_prefix())?;
        let (identity, seq_id) = rest.split_once('/')?;
        if identity.is_empty() || seq_id.is_empty() || seq_id.contains('/') {
            return None;
        }
        Some((identity.to_string(), seq_id.to_string()))
    }

    /// Extract the sequence id from a reply addressed to `identity`.
    pub fn parse_response<'a>(&self, identity: &str, topic: &'a str) -> Option<&'a str> {
        let seq_id = topic.strip_prefix(&self.response_prefix(identity))?;
        if seq_id.is_empty() || seq_id.contains('/') {
            None
        } else {
            Some(seq_id)
        }
    }

    /// Derive the reply topic from a request topic by swapping the verb.
    pub fn response_for_request(&self, request_topic: &str) -> Option<String> {
        let (identity, seq_id) = self.parse_request(request_topic)?;
        Some(self.response(&identity, &seq_id))
    }

    pub fn inbox(&self, account_id: &str) -> String {
        format!("{}/inbox/{account_id}", self.push_prefix)
    }

    pub fn group(&self, group_id: &str) -> String {
        format!("{}/group/{group_id}", self.push_prefix)
    }

    pub fn group_prefix(&self) -> String {
        format!("{}/group/", self.push_prefix)
    }

    pub fn status(&self, account_id: &str) -> String {
        format!("{}/status/{account_id}", self.push_prefix)
    }
}

/// Topics owned by one role of a multiplexed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTopics {
    pub role: String,
    pub req: String,
    pub res: String,
    pub evt: String,
}

impl RoleTopics {
    pub fn new(gateway_prefix: &str, identity: &str, role: &str) -> Self {
        let root = role_root(gateway_prefix, identity);
        Self {
            role: role.to_string(),
            req: format!("{root}{role}/req"),
            res: format!("{root}{role}/res"),
            evt: format!("{root}{role}/evt"),
        }
    }
}

/// `<gateway>/<identity>/`, the prefix under which every role lives.
pub fn role_root(gateway_prefix: &str, identity: &str) -> String {
    format!("{}/{identity}/", gateway_prefix.trim_end_matches('/'))
}

/// The role segment of a topic under `root`, for inbound `res`/`evt` frames.
pub fn role_of<'a>(root: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(root)?;
    let (role, kind) = rest.split_once('/')?;
    if role.is_empty() || !matches!(kind, "res" | "evt") {
        return None;
    }
    Some(role)
}
