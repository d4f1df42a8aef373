//! Channel and identity lookups
//!
//! The router never touches persistence directly; it asks a
//! [`ChannelRepository`] and an [`IdentityRepository`]. [`Directory`]
//! implements both from a JSON document, which is what the binary loads
//! from `MAIL_GATEWAY_DIRECTORY`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::{AppError, AppResult};

/// User identifier
pub type UserId = u64;
/// Conversation (recipient) identifier
pub type RecipientId = u64;
/// Realm (organization) identifier
pub type RealmId = u64;
/// Channel identifier
pub type ChannelId = u64;

/// Channel (stream) reachable through the gateway
///
/// The email token is a credential, so it is held as a `SecretString` to
/// keep it out of logs.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel identifier
    pub id: ChannelId,
    /// Display name, compared case-insensitively with decoded addresses
    pub name: String,
    /// Owning realm
    pub realm_id: RealmId,
    /// Token embedded in the channel's gateway address
    pub email_token: SecretString,
}

/// Chat user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Delivery email, used in logs and as the sender identity
    pub email: String,
    /// Owning realm
    pub realm_id: RealmId,
}

/// What kind of conversation a recipient is
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecipientKind {
    /// One-on-one conversation with a user
    Personal {
        /// The other participant
        user_id: UserId,
    },
    /// Channel conversation
    Stream {
        /// Target channel
        channel_id: ChannelId,
    },
    /// Group conversation
    Huddle {
        /// All participants
        user_ids: Vec<UserId>,
    },
}

/// Channel lookups
pub trait ChannelRepository: Send + Sync {
    /// Find the channel whose email token equals `token`
    fn lookup_by_token(&self, token: &str) -> Option<Channel>;
    /// Find a channel by identifier
    fn channel(&self, id: ChannelId) -> Option<Channel>;
    /// Find a channel by name within a realm (case-insensitive)
    fn channel_by_name(&self, realm_id: RealmId, name: &str) -> Option<Channel>;
}

/// User and recipient lookups
pub trait IdentityRepository: Send + Sync {
    /// Find a user by identifier
    fn user(&self, id: UserId) -> Option<User>;
    /// Find a user by email (case-insensitive)
    fn user_by_email(&self, email: &str) -> Option<User>;
    /// Find a recipient by identifier
    fn recipient(&self, id: RecipientId) -> Option<RecipientKind>;
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    id: ChannelId,
    name: String,
    realm_id: RealmId,
    email_token: String,
}

#[derive(Debug, Deserialize)]
struct RecipientEntry {
    id: RecipientId,
    #[serde(flatten)]
    kind: RecipientKind,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    channels: Vec<ChannelEntry>,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    recipients: Vec<RecipientEntry>,
}

/// JSON-backed channel and identity directory
///
/// # Format
///
/// ```json
/// {
///   "channels": [{ "id": 1, "name": "general", "realm_id": 1, "email_token": "abc123" }],
///   "users": [{ "id": 7, "email": "iago@example.com", "realm_id": 1 }],
///   "recipients": [
///     { "id": 20, "kind": "personal", "user_id": 7 },
///     { "id": 21, "kind": "stream", "channel_id": 1 },
///     { "id": 22, "kind": "huddle", "user_ids": [7, 8] }
///   ]
/// }
/// ```
#[derive(Debug, Default)]
pub struct Directory {
    channels: BTreeMap<ChannelId, Channel>,
    users: BTreeMap<UserId, User>,
    recipients: BTreeMap<RecipientId, RecipientKind>,
}

impl Directory {
    /// Load a directory from a JSON file
    ///
    /// # Errors
    ///
    /// - `NotFound` if the file cannot be read
    /// - `InvalidInput` if the JSON is malformed
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::NotFound(format!("cannot read directory {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse a directory from a JSON document
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the JSON does not match the format.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let file: DirectoryFile = serde_json::from_str(raw)
            .map_err(|e| AppError::invalid(format!("invalid directory JSON: {e}")))?;

        Ok(Self {
            channels: file
                .channels
                .into_iter()
                .map(|c| {
                    (
                        c.id,
                        Channel {
                            id: c.id,
                            name: c.name,
                            realm_id: c.realm_id,
                            email_token: SecretString::new(c.email_token.into()),
                        },
                    )
                })
                .collect(),
            users: file.users.into_iter().map(|u| (u.id, u)).collect(),
            recipients: file.recipients.into_iter().map(|r| (r.id, r.kind)).collect(),
        })
    }
}

impl ChannelRepository for Directory {
    fn lookup_by_token(&self, token: &str) -> Option<Channel> {
        self.channels
            .values()
            .find(|c| c.email_token.expose_secret() == token)
            .cloned()
    }

    fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).cloned()
    }

    fn channel_by_name(&self, realm_id: RealmId, name: &str) -> Option<Channel> {
        self.channels
            .values()
            .find(|c| c.realm_id == realm_id && c.name.to_lowercase() == name.to_lowercase())
            .cloned()
    }
}

impl IdentityRepository for Directory {
    fn user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).cloned()
    }

    fn user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    fn recipient(&self, id: RecipientId) -> Option<RecipientKind> {
        self.recipients.get(&id).cloned()
    }
}
