use std::time::Duration;

use serde::Deserialize;

use crate::connection::Backoff;
use crate::protocol::topic::TopicScheme;
use crate::transport::ConnectOptions;
use crate::transport::message::DEFAULT_MAX_PACKET_SIZE;
use crate::utils::error::SettingsError;

/// Top-level configuration for both the gateway and the client side.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub client: ClientSettings,
    pub reconnect: ReconnectSettings,
    pub topics: TopicSettings,
    pub session: SessionSettings,
    pub directory: DirectorySettings,
    pub log: LogSettings,
}

/// Where the MQTT broker lives and how to authenticate against it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Broker-level client id. Defaults to the topic identity.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    /// Largest MQTT packet, in bytes, in either direction.
    pub max_packet_size: usize,
    /// When set the gateway subscribes through `$share/<group>/`.
    pub share_group: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    pub account_id: String,
    pub device_id: Option<String>,
    pub identity: Option<String>,
    pub request_timeout_ms: u64,
    pub skip_auth_bind: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TopicSettings {
    pub rpc_prefix: String,
    pub push_prefix: String,
    pub gateway_prefix: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    /// sled database directory for client bindings.
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DirectorySettings {
    pub seed_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration loaded from files or environment.
///
/// Every field is optional; whatever is missing comes from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
    pub reconnect: Option<PartialReconnectSettings>,
    pub topics: Option<PartialTopicSettings>,
    pub session: Option<PartialSessionSettings>,
    pub directory: Option<PartialDirectorySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub use_tls: Option<bool>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_packet_size: Option<usize>,
    pub share_group: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialClientSettings {
    pub account_id: Option<String>,
    pub device_id: Option<String>,
    pub identity: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub skip_auth_bind: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialReconnectSettings {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTopicSettings {
    pub rpc_prefix: Option<String>,
    pub push_prefix: Option<String>,
    pub gateway_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSessionSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDirectorySettings {
    pub seed_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "127.0.0.1".to_string(),
                port: 1883,
                use_tls: false,
                client_id: None,
                username: None,
                password: None,
                keep_alive_secs: 60,
                connect_timeout_ms: 15_000,
                max_packet_size: DEFAULT_MAX_PACKET_SIZE,
                share_group: None,
            },
            client: ClientSettings {
                account_id: String::new(),
                device_id: None,
                identity: None,
                request_timeout_ms: 30_000,
                skip_auth_bind: false,
            },
            reconnect: ReconnectSettings {
                initial_delay_ms: 1_000,
                max_delay_ms: 30_000,
            },
            topics: TopicSettings {
                rpc_prefix: "mchat/msg".to_string(),
                push_prefix: "mchat".to_string(),
                gateway_prefix: "mchat/gw".to_string(),
            },
            session: SessionSettings {
                path: "data/sessions".to_string(),
            },
            directory: DirectorySettings { seed_path: None },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let broker = self.broker.unwrap_or_default();
        let client = self.client.unwrap_or_default();
        let reconnect = self.reconnect.unwrap_or_default();
        let topics = self.topics.unwrap_or_default();
        let session = self.session.unwrap_or_default();
        let directory = self.directory.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                host: broker.host.unwrap_or(default.broker.host),
                port: broker.port.unwrap_or(default.broker.port),
                use_tls: broker.use_tls.unwrap_or(default.broker.use_tls),
                client_id: broker.client_id.or(default.broker.client_id),
                username: broker.username.or(default.broker.username),
                password: broker.password.or(default.broker.password),
                keep_alive_secs: broker
                    .keep_alive_secs
                    .unwrap_or(default.broker.keep_alive_secs),
                connect_timeout_ms: broker
                    .connect_timeout_ms
                    .unwrap_or(default.broker.connect_timeout_ms),
                max_packet_size: broker
                    .max_packet_size
                    .unwrap_or(default.broker.max_packet_size),
                share_group: broker.share_group.or(default.broker.share_group),
            },
            client: ClientSettings {
                account_id: client.account_id.unwrap_or(default.client.account_id),
                device_id: client.device_id.or(default.client.device_id),
                identity: client.identity.or(default.client.identity),
                request_timeout_ms: client
                    .request_timeout_ms
                    .unwrap_or(default.client.request_timeout_ms),
                skip_auth_bind: client
                    .skip_auth_bind
                    .unwrap_or(default.client.skip_auth_bind),
            },
            reconnect: ReconnectSettings {
                initial_delay_ms: reconnect
                    .initial_delay_ms
                    .unwrap_or(default.reconnect.initial_delay_ms),
                max_delay_ms: reconnect
                    .max_delay_ms
                    .unwrap_or(default.reconnect.max_delay_ms),
            },
            topics: TopicSettings {
                rpc_prefix: topics.rpc_prefix.unwrap_or(default.topics.rpc_prefix),
                push_prefix: topics.push_prefix.unwrap_or(default.topics.push_prefix),
                gateway_prefix: topics
                    .gateway_prefix
                    .unwrap_or(default.topics.gateway_prefix),
            },
            session: SessionSettings {
                path: session.path.unwrap_or(default.session.path),
            },
            directory: DirectorySettings {
                seed_path: directory.seed_path.or(default.directory.seed_path),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

impl Settings {
    /// Reject settings no connection could be made with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.broker.host.trim().is_empty() {
            return Err(SettingsError::Invalid("broker.host"));
        }
        if self.broker.port == 0 {
            return Err(SettingsError::Invalid("broker.port"));
        }
        if self.broker.max_packet_size == 0 {
            return Err(SettingsError::Invalid("broker.max_packet_size"));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(SettingsError::Invalid("client.request_timeout_ms"));
        }
        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms
        {
            return Err(SettingsError::Invalid("reconnect.initial_delay_ms"));
        }
        Ok(())
    }

    /// Handshake options; `client_id` is used unless `broker.client_id` is set.
    pub fn connect_options(&self, client_id: &str) -> ConnectOptions {
        let broker = &self.broker;
        let mut options = ConnectOptions::new(
            broker.host.clone(),
            broker.port,
            broker.client_id.as_deref().unwrap_or(client_id),
        );
        options.use_tls = broker.use_tls;
        options.username = broker.username.clone();
        options.password = broker.password.clone();
        options.keep_alive = Duration::from_secs(broker.keep_alive_secs);
        options.connect_timeout = Duration::from_millis(broker.connect_timeout_ms);
        options.max_packet_size = broker.max_packet_size;
        options
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect.initial_delay_ms),
            Duration::from_millis(self.reconnect.max_delay_ms),
        )
    }

    pub fn topic_scheme(&self) -> TopicScheme {
        TopicScheme::new(&self.topics.rpc_prefix, &self.topics.push_prefix)
    }
}
