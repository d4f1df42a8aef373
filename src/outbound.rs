//! Outbound collaborators: attachment storage, chat delivery, alerting
//!
//! The router only sees the [`Uploader`], [`Delivery`] and [`AlertSink`]
//! traits. The binary wires them to a local upload directory, a JSON-lines
//! outbox file, and an alert sink that posts to the `errors` channel.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::directory::{RealmId, UserId};
use crate::errors::{ForwardError, ForwardResult};
use crate::mime::truncate_chars;

/// Maximum topic length accepted by the chat platform
pub const TOPIC_MAX_CHARS: usize = 60;
/// Maximum message length accepted by the chat platform
pub const BODY_MAX_CHARS: usize = 2_000;

/// Code fence wrapped around alert reports
const ALERT_FENCE: &str = "~~~";

/// Channel that failure reports are posted to
pub const ERROR_CHANNEL: &str = "errors";
/// Topic used for failure reports
pub const ERROR_TOPIC: &str = "email mirror error";

/// Where a chat message lands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingTarget {
    /// Channel message under a topic
    Channel {
        /// Channel name
        name: String,
        /// Realm owning the channel
        realm_id: RealmId,
    },
    /// Direct message to one user
    DirectReply {
        /// Recipient
        user_id: UserId,
    },
    /// Group direct message
    GroupReply {
        /// All recipients
        user_ids: Vec<UserId>,
    },
}

/// Chat message handed to [`Delivery`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    /// Sender identity (email of the user or bot)
    pub sender: String,
    /// Realm the message is sent in
    pub realm_id: RealmId,
    /// Destination
    pub target: RoutingTarget,
    /// Topic; only meaningful for channel messages
    pub topic: String,
    /// Message body
    pub content: String,
}

/// Attachment handed to [`Uploader`]
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    /// Filename declared by the email part
    pub filename: &'a str,
    /// Payload size in bytes
    pub size: usize,
    /// MIME content type of the part
    pub content_type: &'a str,
    /// Decoded payload
    pub bytes: &'a [u8],
    /// Identity the upload is owned by
    pub owner: &'a str,
    /// Realm the upload is scoped to
    pub realm_id: RealmId,
}

/// Attachment storage
pub trait Uploader: Send + Sync {
    /// Store an attachment and return its URL
    fn store(&self, request: &UploadRequest<'_>) -> ForwardResult<String>;
}

/// Chat message delivery
pub trait Delivery: Send + Sync {
    /// Deliver one message
    fn send(&self, message: &OutboundMessage) -> ForwardResult<()>;
}

/// Operator alerting
pub trait AlertSink: Send + Sync {
    /// Report an already-redacted failure message
    fn report(&self, message: &str);
}

/// Uploader writing attachments into a local directory
///
/// Each attachment is stored as `{dir}/{realm_id}/{uuid}/{filename}` and
/// linked as `{base_url}/{realm_id}/{uuid}/{url-encoded filename}`.
#[derive(Debug, Clone)]
pub struct FsUploader {
    dir: PathBuf,
    base_url: String,
}

impl FsUploader {
    /// Create an uploader rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into(),
        }
    }
}

impl Uploader for FsUploader {
    fn store(&self, request: &UploadRequest<'_>) -> ForwardResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        let filename = sanitize_filename(request.filename);
        let folder = self.dir.join(request.realm_id.to_string()).join(&id);

        fs::create_dir_all(&folder).map_err(|e| {
            ForwardError::External(format!("cannot create upload directory: {e}"))
        })?;
        fs::write(folder.join(&filename), request.bytes)
            .map_err(|e| ForwardError::External(format!("cannot write attachment: {e}")))?;

        tracing::debug!(
            filename = %filename,
            size = request.size,
            content_type = %request.content_type,
            owner = %request.owner,
            "stored attachment"
        );
        Ok(format!(
            "{}/{}/{id}/{}",
            self.base_url.trim_end_matches('/'),
            request.realm_id,
            urlencoding::encode(&filename)
        ))
    }
}

/// Reduce a declared filename to a safe single path component
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "attachment".to_owned(),
        other => other.to_owned(),
    }
}

/// One line of the outbox file
#[derive(Debug, Serialize)]
struct OutboxRecord<'a> {
    sent_at: String,
    #[serde(flatten)]
    message: &'a OutboundMessage,
}

/// Delivery appending JSON lines to an outbox file
///
/// The chat backend tails this file; writes are serialized so lines never
/// interleave.
#[derive(Debug)]
pub struct OutboxDelivery {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OutboxDelivery {
    /// Create a delivery writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

impl Delivery for OutboxDelivery {
    fn send(&self, message: &OutboundMessage) -> ForwardResult<()> {
        let mut line = serde_json::to_string(&OutboxRecord {
            sent_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message,
        })
        .map_err(|e| ForwardError::External(format!("serialization failure: {e}")))?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ForwardError::External("outbox lock poisoned".to_owned()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ForwardError::External(format!("cannot open outbox: {e}")))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ForwardError::External(format!("cannot write outbox: {e}")))
    }
}

/// Alert sink posting reports to the `errors` channel
///
/// Without a configured error bot, reports are only logged by the caller.
pub struct ErrorChannelAlerts {
    delivery: Arc<dyn Delivery>,
    error_bot: Option<(String, RealmId)>,
}

impl ErrorChannelAlerts {
    /// Create a sink; `error_bot` is the bot's email and realm
    pub fn new(delivery: Arc<dyn Delivery>, error_bot: Option<(String, RealmId)>) -> Self {
        Self {
            delivery,
            error_bot,
        }
    }
}

impl AlertSink for ErrorChannelAlerts {
    fn report(&self, message: &str) {
        let Some((bot, realm_id)) = &self.error_bot else {
            return;
        };
        let alert = OutboundMessage {
            sender: bot.clone(),
            realm_id: *realm_id,
            target: RoutingTarget::Channel {
                name: ERROR_CHANNEL.to_owned(),
                realm_id: *realm_id,
            },
            topic: ERROR_TOPIC.to_owned(),
            content: fenced_report(message),
        };
        if let Err(e) = self.delivery.send(&alert) {
            tracing::warn!(error = %e, "failed to post gateway alert");
        }
    }
}

/// Fence a report, cutting it so the fenced text fits one chat message
fn fenced_report(message: &str) -> String {
    let fence_chars = 2 * (ALERT_FENCE.len() + 1);
    let message = truncate_chars(message, BODY_MAX_CHARS.saturating_sub(fence_chars));
    format!("{ALERT_FENCE}\n{message}\n{ALERT_FENCE}")
}
