//! Session record types and key generation.
//!
//! A session record maps a locally issued session key to the remote portal
//! session it stands for. The record exists exactly as long as this gateway
//! believes the remote session is valid; remote-side expiry is only
//! discovered when a downstream call fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached remote portal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Remote portal host (no scheme).
    pub host: String,
    /// Username the session was established for.
    pub username: String,
    /// The portal-issued session cookie value.
    pub jsessionid: String,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(host: String, username: String, jsessionid: String) -> Self {
        Self {
            host,
            username,
            jsessionid,
            created_at: Utc::now(),
        }
    }
}

/// Redacted listing view of a session: everything but the remote token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_key: String,
    pub host: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn from_record(key: &str, record: &SessionRecord) -> Self {
        Self {
            session_key: key.to_string(),
            host: record.host.clone(),
            username: record.username.clone(),
            created_at: record.created_at,
        }
    }
}

/// Generate a session key: 16 bytes from the OS CSPRNG, hex-encoded.
pub fn generate_session_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
