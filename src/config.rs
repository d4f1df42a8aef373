//! Configuration module for the gateway
//!
//! All configuration is loaded from environment variables with the
//! `MAIL_GATEWAY_` prefix. Everything has a default; an empty address
//! template disables the gateway.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use crate::address::{AddressCodec, PLACEHOLDER};
use crate::errors::{AppError, AppResult};

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address template with one `%s` for the local-part (empty disables)
    pub address_pattern: String,
    /// Regex replacing the template's trailing segment when decoding
    pub extra_pattern: Option<String>,
    /// Returned instead of a reply address while the gateway is disabled
    pub noreply_address: String,
    /// Sender identity for channel messages and owner of uploads
    pub gateway_bot: String,
    /// Bot that posts failure reports to the `errors` channel, if any
    pub error_bot: Option<String>,
    /// JSON file with channels, users and recipients
    pub directory_path: PathBuf,
    /// Directory attachments are written into
    pub upload_dir: PathBuf,
    /// URL prefix for attachment links
    pub upload_base_url: String,
    /// JSON-lines file chat messages are appended to
    pub outbox_path: PathBuf,
    /// Capacity of the deferred-processing queue
    pub queue_capacity: usize,
    /// Largest raw message accepted, in bytes
    pub max_message_bytes: usize,
}

impl GatewayConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is malformed, the template does
    /// not contain exactly one `%s`, or the extra pattern is not a regex.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_GATEWAY_PATTERN=%s@streams.example.com
    /// MAIL_GATEWAY_BOT=emailgateway@example.com
    /// MAIL_GATEWAY_ERROR_BOT=errorbot@example.com
    /// MAIL_GATEWAY_DIRECTORY=/etc/mail-chat-gateway/directory.json
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let config = Self {
            address_pattern: optional_env("MAIL_GATEWAY_PATTERN")?.unwrap_or_default(),
            extra_pattern: optional_env("MAIL_GATEWAY_EXTRA_PATTERN")?,
            noreply_address: optional_env("MAIL_GATEWAY_NOREPLY_ADDRESS")?
                .unwrap_or_else(|| "noreply@localhost".to_owned()),
            gateway_bot: optional_env("MAIL_GATEWAY_BOT")?
                .unwrap_or_else(|| "emailgateway@localhost".to_owned()),
            error_bot: optional_env("MAIL_GATEWAY_ERROR_BOT")?,
            directory_path: optional_env("MAIL_GATEWAY_DIRECTORY")?
                .map_or_else(|| PathBuf::from("directory.json"), PathBuf::from),
            upload_dir: optional_env("MAIL_GATEWAY_UPLOAD_DIR")?
                .map_or_else(|| PathBuf::from("uploads"), PathBuf::from),
            upload_base_url: optional_env("MAIL_GATEWAY_UPLOAD_BASE_URL")?
                .unwrap_or_else(|| "/user_uploads".to_owned()),
            outbox_path: optional_env("MAIL_GATEWAY_OUTBOX")?
                .map_or_else(|| PathBuf::from("outbox.jsonl"), PathBuf::from),
            queue_capacity: parse_usize_env("MAIL_GATEWAY_QUEUE_CAPACITY", 256)?,
            max_message_bytes: parse_usize_env("MAIL_GATEWAY_MAX_MESSAGE_BYTES", 25_000_000)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` describing the first violated constraint.
    pub fn validate(&self) -> AppResult<()> {
        if !self.address_pattern.is_empty()
            && self.address_pattern.matches(PLACEHOLDER).count() != 1
        {
            return Err(AppError::invalid(format!(
                "MAIL_GATEWAY_PATTERN must contain exactly one '{PLACEHOLDER}'"
            )));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::invalid(
                "MAIL_GATEWAY_QUEUE_CAPACITY must be at least 1",
            ));
        }
        self.codec().map(|_| ())
    }

    /// Build the address codec for this configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the template or extra pattern is invalid.
    pub fn codec(&self) -> AppResult<AddressCodec> {
        AddressCodec::new(&self.address_pattern, self.extra_pattern.as_deref())
    }
}

/// Read an optional environment variable; empty values count as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `usize` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `usize`.
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match optional_env(key)? {
        Some(v) => v.parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::GatewayConfig;

    fn config(pattern: &str) -> GatewayConfig {
        GatewayConfig {
            address_pattern: pattern.to_owned(),
            extra_pattern: None,
            noreply_address: "noreply@example.com".to_owned(),
            gateway_bot: "emailgateway@example.com".to_owned(),
            error_bot: None,
            directory_path: PathBuf::from("directory.json"),
            upload_dir: PathBuf::from("uploads"),
            upload_base_url: "/user_uploads".to_owned(),
            outbox_path: PathBuf::from("outbox.jsonl"),
            queue_capacity: 16,
            max_message_bytes: 1_000,
        }
    }

    #[test]
    fn accepts_single_placeholder_or_empty_template() {
        config("%s@example.com").validate().expect("valid");
        config("").validate().expect("empty disables the gateway");
    }

    #[test]
    fn rejects_bad_templates_and_patterns() {
        let err = config("gateway@example.com").validate().expect_err("must fail");
        assert!(err.to_string().contains("exactly one"));

        let mut bad_extra = config("%s@example.com");
        bad_extra.extra_pattern = Some("@(".to_owned());
        assert!(bad_extra.validate().is_err());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let mut cfg = config("%s@example.com");
        cfg.queue_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
