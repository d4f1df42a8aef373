//! Reversible gateway address codec
//!
//! Encodes a channel name and its access token into an email-safe
//! local-part and substitutes it into the configured address template.
//! Decoding reverses the process.
//!
//! # Format
//!
//! `{escaped_channel_name}+{token}` substituted for the template's `%s`.
//! Every character of the channel name that is not alphanumeric or `_` is
//! written as `%` followed by its code point in (at least) four zero-padded
//! decimal digits, so `sales/eu` becomes `sales%0047eu`. Decoding also
//! accepts `.` in place of `+`, for mail systems that reject `+` in the
//! envelope recipient.

use regex::Regex;
use serde::Serialize;

use crate::errors::{AppError, AppResult, ForwardError, ForwardResult};

/// Placeholder for the local-part in the address template
pub const PLACEHOLDER: &str = "%s";

/// Decoded channel address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayAddress {
    /// Channel name with escapes reversed
    pub channel_name: String,
    /// Channel access token
    pub token: String,
}

/// Address codec bound to one deployment's template
///
/// An empty template means the gateway is disabled: encoding yields an empty
/// string and nothing decodes.
#[derive(Debug, Clone)]
pub struct AddressCodec {
    template: String,
    matcher: Option<Regex>,
    gateway_redactor: Option<Regex>,
    address_redactor: Regex,
}

impl AddressCodec {
    /// Build a codec from an address template and optional extra pattern
    ///
    /// The extra pattern is a raw regex that replaces the template's trailing
    /// literal segment when decoding, so mail originally addressed to another
    /// deployment's domain is still accepted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a non-empty template does not contain exactly
    /// one `%s`, or if the extra pattern is not a valid regex.
    pub fn new(template: &str, extra_pattern: Option<&str>) -> AppResult<Self> {
        let address_redactor = Regex::new(r#"[^\s<>"'(),;:@\[\]]+@"#)
            .map_err(|e| AppError::Internal(format!("invalid redaction regex: {e}")))?;

        if template.is_empty() {
            return Ok(Self {
                template: String::new(),
                matcher: None,
                gateway_redactor: None,
                address_redactor,
            });
        }

        let segments: Vec<&str> = template.split(PLACEHOLDER).collect();
        if segments.len() != 2 {
            return Err(AppError::invalid(format!(
                "address template must contain exactly one '{PLACEHOLDER}': '{template}'"
            )));
        }

        let prefix = regex::escape(segments[0]);
        let suffix = match extra_pattern {
            Some(extra) => extra.to_owned(),
            None => regex::escape(segments[1]),
        };
        let matcher = Regex::new(&format!("^{prefix}(.*?){suffix}$"))
            .map_err(|e| AppError::invalid(format!("invalid address pattern: {e}")))?;

        let gateway_redactor = match template.rsplit('@').next() {
            Some(domain) if template.contains('@') && !domain.is_empty() => Some(
                Regex::new(&format!(r#"[^\s<>"'(),;:@\[\]]+@{}([\w.-]*)"#, regex::escape(domain)))
                    .map_err(|e| AppError::invalid(format!("invalid gateway domain: {e}")))?,
            ),
            _ => None,
        };

        Ok(Self {
            template: template.to_owned(),
            matcher: Some(matcher),
            gateway_redactor,
            address_redactor,
        })
    }

    /// Whether a template is configured
    pub fn is_enabled(&self) -> bool {
        !self.template.is_empty()
    }

    /// Substitute a local-part into the template
    ///
    /// Returns an empty string if the gateway is disabled.
    pub fn render(&self, local_part: &str) -> String {
        if !self.is_enabled() {
            return String::new();
        }
        self.template.replacen(PLACEHOLDER, local_part, 1)
    }

    /// Encode a channel name and token into a full gateway address
    ///
    /// # Example
    ///
    /// ```text
    /// template "%s@example.com"
    /// encode("sales/eu", "abc123") == "sales%0047eu+abc123@example.com"
    /// ```
    pub fn encode(&self, channel_name: &str, token: &str) -> String {
        if !self.is_enabled() {
            return String::new();
        }
        self.render(&format!("{}+{token}", escape_name(channel_name)))
    }

    /// Whether an address matches the configured template
    pub fn matches(&self, address: &str) -> bool {
        self.matcher
            .as_ref()
            .is_some_and(|re| re.is_match(address))
    }

    /// Extract the raw local-part captured by the template
    ///
    /// # Errors
    ///
    /// Returns `UnrecognizedAddress` if the address does not match.
    pub fn local_part(&self, address: &str) -> ForwardResult<String> {
        self.matcher
            .as_ref()
            .and_then(|re| re.captures(address))
            .and_then(|c| c.get(1).map(|m| m.as_str().to_owned()))
            .ok_or_else(|| ForwardError::UnrecognizedAddress(address.to_owned()))
    }

    /// Decode a gateway address into channel name and token
    ///
    /// # Errors
    ///
    /// - `UnrecognizedAddress` if the address does not match the template
    /// - `MalformedAddress` if the local-part has no `+`/`.` separator or
    ///   carries an escape that is not a valid code point
    pub fn decode(&self, address: &str) -> ForwardResult<GatewayAddress> {
        let local = self.local_part(address)?;
        let split_at = local
            .find(['+', '.'])
            .ok_or_else(|| ForwardError::MalformedAddress(address.to_owned()))?;
        let (encoded_name, rest) = local.split_at(split_at);
        let channel_name = unescape_name(encoded_name)
            .ok_or_else(|| ForwardError::MalformedAddress(address.to_owned()))?;

        Ok(GatewayAddress {
            channel_name,
            token: rest[1..].to_owned(),
        })
    }

    /// Mask identifying local-parts in an operator-facing report
    ///
    /// Local-parts of addresses on the gateway's domain are replaced with an
    /// equal-length run of `X`. With `all_addresses`, every address in the
    /// text is masked, which is used for sender lines.
    pub fn redact(&self, text: &str, all_addresses: bool) -> String {
        let re = if all_addresses {
            Some(&self.address_redactor)
        } else {
            self.gateway_redactor.as_ref()
        };
        let Some(re) = re else {
            return text.to_owned();
        };

        re.replace_all(text, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            // A longer domain that merely starts with the gateway's is left alone.
            if caps
                .get(1)
                .is_some_and(|rest| !rest.as_str().trim_end_matches('.').is_empty())
            {
                return matched.to_owned();
            }
            let at = matched.find('@').unwrap_or(matched.len());
            let (local, domain) = matched.split_at(at);
            format!("{}{domain}", "X".repeat(local.chars().count()))
        })
        .into_owned()
    }
}

/// Escape every character that is not alphanumeric or `_`
fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push_str(&format!("%{:04}", u32::from(ch)));
        }
    }
    out
}

/// Replace each `%DDDD` sequence with the character at that code point
///
/// Returns `None` if a sequence names an invalid code point.
fn unescape_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = String::with_capacity(encoded.len());
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        let is_escape = bytes[i] == b'%'
            && i + 4 < bytes.len()
            && bytes[i + 1..i + 5].iter().all(u8::is_ascii_digit);
        if is_escape {
            out.push_str(&encoded[last..i]);
            let code = encoded[i + 1..i + 5].parse::<u32>().ok()?;
            out.push(char::from_u32(code)?);
            i += 5;
            last = i;
        } else {
            i += 1;
        }
    }
    out.push_str(&encoded[last..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::{AddressCodec, GatewayAddress, escape_name, unescape_name};
    use crate::errors::ForwardError;

    fn codec() -> AddressCodec {
        AddressCodec::new("%s@example.com", None).expect("valid template")
    }

    #[test]
    fn encodes_and_decodes_plain_channel() {
        let codec = codec();
        let address = codec.encode("general", "abc123");
        assert_eq!(address, "general+abc123@example.com");
        assert_eq!(
            codec.decode(&address).expect("decode succeeds"),
            GatewayAddress {
                channel_name: "general".to_owned(),
                token: "abc123".to_owned(),
            }
        );
    }

    #[test]
    fn escapes_non_word_characters_as_code_points() {
        let codec = codec();
        let address = codec.encode("sales/eu", "abc123");
        assert_eq!(address, "sales%0047eu+abc123@example.com");
        let decoded = codec.decode(&address).expect("decode succeeds");
        assert_eq!(decoded.channel_name, "sales/eu");
        assert_eq!(decoded.token, "abc123");
    }

    #[test]
    fn round_trips_assorted_channel_names() {
        let codec = codec();
        let names = [
            "general",
            "sales/eu",
            "a b c",
            "dev+ops",
            "release.2026",
            "100%",
            "%0047 literal",
            "snake_case_name",
            "café résumé",
            "日本語",
            "<script>&\"'",
            "",
        ];
        for name in names {
            for token in ["abc123", "Z9", "0000000000000000"] {
                let decoded = codec
                    .decode(&codec.encode(name, token))
                    .expect("round trip decodes");
                assert_eq!(decoded.channel_name, name, "name {name:?}");
                assert_eq!(decoded.token, token);
            }
        }
    }

    #[test]
    fn accepts_dot_separator() {
        let decoded = codec()
            .decode("sales%0047eu.abc123@example.com")
            .expect("dot form decodes");
        assert_eq!(decoded.channel_name, "sales/eu");
        assert_eq!(decoded.token, "abc123");
    }

    #[test]
    fn rejects_addresses_outside_template() {
        let err = codec()
            .decode("general+abc123@other.org")
            .expect_err("must fail");
        assert!(matches!(err, ForwardError::UnrecognizedAddress(_)));
    }

    #[test]
    fn rejects_local_part_without_separator() {
        let err = codec()
            .decode("general@example.com")
            .expect_err("must fail");
        assert!(matches!(err, ForwardError::MalformedAddress(_)));
    }

    #[test]
    fn extra_pattern_widens_accepted_domains() {
        let codec =
            AddressCodec::new("%s@example.com", Some(r"@[\w.-]+")).expect("valid template");
        let decoded = codec
            .decode("general+abc123@other.org")
            .expect("extra pattern accepts");
        assert_eq!(decoded.channel_name, "general");
        assert_eq!(decoded.token, "abc123");
        assert_eq!(
            codec.encode("general", "abc123"),
            "general+abc123@example.com"
        );
    }

    #[test]
    fn empty_template_disables_gateway() {
        let codec = AddressCodec::new("", None).expect("empty template is allowed");
        assert!(!codec.is_enabled());
        assert_eq!(codec.encode("general", "abc123"), "");
        assert!(!codec.matches("general+abc123@example.com"));
    }

    #[test]
    fn rejects_template_without_single_placeholder() {
        assert!(AddressCodec::new("gateway@example.com", None).is_err());
        assert!(AddressCodec::new("%s+%s@example.com", None).is_err());
    }

    #[test]
    fn unescape_only_replaces_complete_four_digit_sequences() {
        assert_eq!(unescape_name("%0047"), Some("/".to_owned()));
        assert_eq!(unescape_name("a%00470"), Some("a/0".to_owned()));
        assert_eq!(unescape_name("%12"), Some("%12".to_owned()));
        assert_eq!(escape_name("a.b"), "a%0046b");
    }

    #[test]
    fn redacts_gateway_local_parts_with_equal_length_mask() {
        let codec = codec();
        let report = "Bad stream token from email recipient sales+abc@example.com";
        assert_eq!(
            codec.redact(report, false),
            "Bad stream token from email recipient XXXXXXXXX@example.com"
        );
        assert_eq!(
            codec.redact("Alice <alice@mail.org>", true),
            "Alice <XXXXX@mail.org>"
        );
        assert_eq!(codec.redact("alice@mail.org", false), "alice@mail.org");
    }

    #[test]
    fn gateway_redaction_stops_at_the_domain_boundary() {
        let codec = codec();
        assert_eq!(
            codec.redact("bob@example.community", false),
            "bob@example.community"
        );
        assert_eq!(
            codec.redact("bob@example.com.au and ann@example.com.", false),
            "bob@example.com.au and XXX@example.com."
        );
    }
}
