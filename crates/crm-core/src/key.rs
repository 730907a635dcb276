//! Transition keys and transition magic.
//!
//! A transition key travels with every request the engine sends and comes
//! back with the result, so the engine can tell which transition, action and
//! engine instance a result belongs to:
//!
//! ```text
//! {action}:{transition}:{target_rc}:{engine uuid, padded to 36 columns}
//! ```
//!
//! Transition magic is a key prefixed by the operation status and rc:
//! `{status}:{rc};{key}`.

use crate::error::{CrmError, Result};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

const UUID_WIDTH: usize = 36;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionKey {
    /// `-1` when decoded from a key that predates action ids.
    pub action: i32,
    pub transition: i32,
    /// `-1` when decoded from a key that predates expected return codes.
    pub target_rc: i32,
    pub uuid: String,
}

impl TransitionKey {
    pub fn new(action: i32, transition: i32, target_rc: i32, uuid: impl Into<String>) -> Self {
        Self {
            action,
            transition,
            target_rc,
            uuid: uuid.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{:<width$}",
            self.action,
            self.transition,
            self.target_rc,
            self.uuid,
            width = UUID_WIDTH
        )
    }

    /// Decode the current four-field form, or one of the older
    /// `action:transition:uuid` and `transition:uuid` forms.
    pub fn decode(key: &str) -> Result<Self> {
        let invalid = || CrmError::InvalidTransitionKey(key.to_string());
        let fields: Vec<&str> = key.splitn(4, ':').collect();
        let int = |s: &str| s.trim().parse::<i32>().map_err(|_| invalid());

        let decoded = match fields.as_slice() {
            [action, transition, rc, uuid] => {
                Self::new(int(action)?, int(transition)?, int(rc)?, uuid_field(uuid))
            }
            [action, transition, uuid] => {
                Self::new(int(action)?, int(transition)?, -1, uuid_field(uuid))
            }
            [transition, uuid] => Self::new(-1, int(transition)?, -1, uuid_field(uuid)),
            _ => return Err(invalid()),
        };
        if decoded.uuid.is_empty() {
            return Err(invalid());
        }
        if decoded.uuid.len() != UUID_WIDTH {
            warn!(key, uuid = %decoded.uuid, "transition key carries a malformed uuid");
        }
        Ok(decoded)
    }
}

fn uuid_field(raw: &str) -> String {
    raw.trim_end().chars().take(UUID_WIDTH).collect()
}

impl fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for TransitionKey {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

// ---------------------------------------------------------------------------
// Transition magic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionMagic {
    pub op_status: i32,
    pub op_rc: i32,
    pub key: TransitionKey,
}

impl TransitionMagic {
    pub fn encode(&self) -> String {
        format!("{}:{};{}", self.op_status, self.op_rc, self.key.encode())
    }

    pub fn decode(magic: &str) -> Result<Self> {
        let invalid = || CrmError::InvalidTransitionMagic(magic.to_string());
        let (codes, key) = magic.split_once(';').ok_or_else(invalid)?;
        let (status, rc) = codes.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            op_status: status.trim().parse().map_err(|_| invalid())?,
            op_rc: rc.trim().parse().map_err(|_| invalid())?,
            key: TransitionKey::decode(key)?,
        })
    }
}
