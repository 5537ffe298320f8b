use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::debug;

use crate::utils::error::StoreError;

const SESSIONS_TREE: &str = "client_session";

/// Which account a broker connection is bound to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionBinding {
    pub client_id: String,
    pub account_id: String,
    #[serde(default)]
    pub device_info: Option<String>,
    /// Unix milliseconds of the last bind.
    pub bound_at: i64,
}

/// Connection identity to account identity, consulted on every request.
pub trait SessionDirectory: Send + Sync {
    fn lookup(&self, client_id: &str) -> Result<Option<String>, StoreError>;

    /// Upsert: the last bind for a connection wins.
    fn bind(
        &self,
        client_id: &str,
        account_id: &str,
        device_info: Option<&str>,
    ) -> Result<SessionBinding, StoreError>;

    /// Delete a binding. `true` if one existed.
    fn revoke(&self, client_id: &str) -> Result<bool, StoreError>;
}

/// sled-backed [`SessionDirectory`]. One key per connection client id.
#[derive(Clone)]
pub struct SessionStore {
    db: Db,
    sessions: Tree,
}

impl SessionStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// A store that lives only as long as the process.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let sessions = db.open_tree(SESSIONS_TREE)?;
        Ok(Self { db, sessions })
    }

    pub fn binding(&self, client_id: &str) -> Result<Option<SessionBinding>, StoreError> {
        match self.sessions.get(client_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every binding, ordered by client id. Unreadable rows are skipped.
    pub fn bindings(&self) -> Vec<SessionBinding> {
        self.sessions
            .iter()
            .filter_map(|res| res.ok())
            .filter_map(|(_, val)| serde_json::from_slice(&val).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl SessionDirectory for SessionStore {
    fn lookup(&self, client_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.binding(client_id)?.map(|b| b.account_id))
    }

    fn bind(
        &self,
        client_id: &str,
        account_id: &str,
        device_info: Option<&str>,
    ) -> Result<SessionBinding, StoreError> {
        let binding = SessionBinding {
            client_id: client_id.to_string(),
            account_id: account_id.to_string(),
            device_info: device_info.map(str::to_string),
            bound_at: Utc::now().timestamp_millis(),
        };
        let serialized = serde_json::to_vec(&binding)?;
        self.sessions.insert(client_id.as_bytes(), serialized)?;
        debug!(%client_id, %account_id, "session bound");
        Ok(binding)
    }

    fn revoke(&self, client_id: &str) -> Result<bool, StoreError> {
        let removed = self.sessions.remove(client_id.as_bytes())?.is_some();
        if removed {
            debug!(%client_id, "session revoked");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("db", &"sled::Db")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
