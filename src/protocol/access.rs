//! Access levels and the authorization gate.
//!
//! The gate is a pure decision over the action's required level and the
//! session's current auth state. It runs once per dispatch, strictly before
//! any field of the inbound packet is processed.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Ordered authorization tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AccessLevel {
    Guest = 0,
    AuthorizedUser = 1,
    AuthorizedSystem = 255,
}

impl AccessLevel {
    /// Numeric level used for comparisons
    pub fn lvl(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Guest => "guest",
            AccessLevel::AuthorizedUser => "authorized_user",
            AccessLevel::AuthorizedSystem => "authorized_system",
        }
    }

    /// Parse the wire name of a level
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "guest" => Some(AccessLevel::Guest),
            "authorized_user" => Some(AccessLevel::AuthorizedUser),
            "authorized_system" => Some(AccessLevel::AuthorizedSystem),
            _ => None,
        }
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        AccessLevel::Guest
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity as held by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthItem {
    pub id: Option<String>,
    pub username: Option<String>,
    pub access_level: AccessLevel,
}

impl AuthItem {
    pub fn new(username: impl Into<String>, access_level: AccessLevel) -> Self {
        Self {
            id: None,
            username: Some(username.into()),
            access_level,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Map form carried in `authorize.response`
    pub fn to_map(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "username": self.username,
            "accessLevel": self.access_level.as_str(),
        })
    }

    /// Inverse of [`AuthItem::to_map`]. Unknown levels fall back to guest.
    pub fn from_map(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let access_level = obj
            .get("accessLevel")
            .and_then(Value::as_str)
            .and_then(AccessLevel::from_name)
            .unwrap_or_default();
        Some(Self {
            id: obj.get("id").and_then(scalar_to_string),
            username: obj.get("username").and_then(scalar_to_string),
            access_level,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Authentication state of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    item: Option<AuthItem>,
}

impl AuthState {
    pub fn guest() -> Self {
        Self { item: None }
    }

    pub fn authorized(item: AuthItem) -> Self {
        Self { item: Some(item) }
    }

    pub fn is_authorized(&self) -> bool {
        self.item.is_some()
    }

    pub fn auth_item(&self) -> Option<&AuthItem> {
        self.item.as_ref()
    }

    /// Effective level; guests are level 0.
    pub fn access_level(&self) -> AccessLevel {
        self.item
            .as_ref()
            .map(|item| item.access_level)
            .unwrap_or_default()
    }
}

/// Outcome of the authorization gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    RequiresAuth,
    InsufficientLevel(AccessLevel),
}

impl AuthDecision {
    pub fn into_result(self) -> Result<()> {
        match self {
            AuthDecision::Allowed => Ok(()),
            AuthDecision::RequiresAuth => Err(ProtocolError::AuthorizationRequired),
            AuthDecision::InsufficientLevel(required) => {
                Err(ProtocolError::AuthorizationInsufficient(required))
            }
        }
    }
}

/// Decide whether a session in `auth` may invoke an action requiring `required`.
pub fn authorize(required: Option<AccessLevel>, auth: &AuthState) -> AuthDecision {
    let Some(required) = required else {
        return AuthDecision::Allowed;
    };
    if !auth.is_authorized() {
        return AuthDecision::RequiresAuth;
    }
    if auth.access_level().lvl() < required.lvl() {
        return AuthDecision::InsufficientLevel(required);
    }
    AuthDecision::Allowed
}
