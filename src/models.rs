//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Input: hand one inbound email to the gateway
///
/// Used by `gateway_accept_email`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AcceptEmailInput {
    /// Envelope recipient (the gateway address the email was sent to)
    pub recipient: String,
    /// Raw RFC 822 message source
    pub message: String,
}

/// Outcome of the synchronous accept step
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AcceptEmailResult {
    /// Whether the message was queued for delivery
    pub accepted: bool,
    /// SMTP-style rejection reason when not accepted
    pub reason: Option<String>,
}

/// Input: build a channel address
///
/// Used by `gateway_encode_address`. Either `token` or `realm_id` must be
/// given; with only `realm_id`, the channel's stored token is used.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EncodeAddressInput {
    /// Channel display name
    pub channel_name: String,
    /// Channel email token
    pub token: Option<String>,
    /// Realm to look the channel up in when `token` is omitted
    pub realm_id: Option<u64>,
}

/// Input: a single gateway address
///
/// Used by `gateway_decode_address`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AddressInput {
    /// Full email address
    pub address: String,
}

/// Encoded address result
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddressResult {
    /// Full email address
    pub address: String,
}

/// Decoded gateway address
///
/// `channel_name` and `token` are present for channel addresses only.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DecodedAddressResult {
    /// `missed_message` or `stream`
    pub kind: String,
    /// Unescaped channel name
    pub channel_name: Option<String>,
    /// Channel email token
    pub token: Option<String>,
}

/// Input: create a single-use reply address
///
/// Used by `gateway_create_missed_message_address`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateMissedMessageAddressInput {
    /// User the notification goes to
    pub user_id: u64,
    /// Conversation the reply should land in
    pub recipient_id: u64,
    /// Topic of the original message
    #[serde(default)]
    pub subject: String,
}
