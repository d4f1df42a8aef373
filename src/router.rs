//! Inbound email dispatch
//!
//! Decides where an inbound email lands and delivers it:
//!
//! 1. Resolve the gateway recipient (trusted envelope recipient, else the
//!    first matching address in `X-Gm-Original-To`, `Delivered-To`, `To`).
//! 2. Classify it: `mm` + 32 character local-parts are missed-message
//!    addresses, everything else is a channel address.
//! 3. Missed-message flow: claim the token and read its routing data (or use
//!    the data the synchronous accept step claimed), then reply into the
//!    original conversation as the notified user.
//! 4. Channel flow: decode the address, check the token and channel name,
//!    and post into the channel as the gateway bot.
//!
//! Every [`ForwardError`] stops processing of that one email and is
//! reported, redacted, at [`Router::process_message`]. Nothing is retried.

use std::sync::Arc;

use mailparse::ParsedMail;

use crate::address::AddressCodec;
use crate::directory::{Channel, ChannelRepository, IdentityRepository, RealmId, RecipientKind};
use crate::errors::{ForwardError, ForwardResult};
use crate::mime::{self, UploadScope};
use crate::outbound::{
    AlertSink, BODY_MAX_CHARS, Delivery, OutboundMessage, RoutingTarget, TOPIC_MAX_CHARS, Uploader,
};
use crate::tokens::{MissedMessageData, TokenStore};

/// Recipient headers in descending order of accuracy
const RECIPIENT_HEADERS: [&str; 3] = ["X-Gm-Original-To", "Delivered-To", "To"];

/// Rejection text for a used, expired or unknown missed-message address
pub const BAD_MISSED_MESSAGE_ADDRESS: &str =
    "5.1.1 Bad destination mailbox address: Bad or expired missed message address.";
/// Rejection text for an invalid channel address
pub const BAD_STREAM_ADDRESS: &str =
    "5.1.1 Bad destination mailbox address: Please use the address specified in your Streams page.";

/// Which phase of the two-phase protocol a dispatch runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingPhase {
    /// No prior validation; claim missed-message tokens during dispatch
    FullProcessing,
    /// [`Router::accept`] already ran
    ///
    /// `claimed` holds the routing data read when the missed-message token
    /// was claimed. The token record may be gone by dispatch time, so the
    /// deferred step never reads it again when this is set.
    AfterSyntacticValidation {
        /// Routing data of the claimed missed-message address
        claimed: Option<MissedMessageData>,
    },
}

/// Kind of gateway address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// Single-use reply address
    MissedMessage,
    /// Channel address
    Stream,
}

/// Result of the synchronous accept step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Queue the message and dispatch it later in this phase
    Accepted(ProcessingPhase),
    /// Refuse the message with this SMTP-style reason
    Rejected(&'static str),
}

/// Result of dispatching one email
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The chat message was handed to delivery
    Delivered,
    /// Processing stopped; the error was logged and reported
    Dropped(ForwardError),
}

/// External collaborators the router depends on
pub struct Collaborators {
    /// Channel lookups
    pub channels: Arc<dyn ChannelRepository>,
    /// User and recipient lookups
    pub identities: Arc<dyn IdentityRepository>,
    /// Attachment storage
    pub uploader: Arc<dyn Uploader>,
    /// Chat delivery
    pub delivery: Arc<dyn Delivery>,
    /// Operator alerting
    pub alerts: Arc<dyn AlertSink>,
}

/// Context gathered during dispatch for failure reports
#[derive(Debug, Default)]
struct DispatchTrace {
    to: Option<String>,
    realm_id: Option<RealmId>,
}

/// Email dispatcher
pub struct Router {
    codec: Arc<AddressCodec>,
    tokens: Arc<TokenStore>,
    deps: Collaborators,
    gateway_bot: String,
}

impl Router {
    /// Create a router
    ///
    /// `gateway_bot` is the sender identity for channel messages and the
    /// owner of uploaded attachments.
    pub fn new(
        codec: Arc<AddressCodec>,
        tokens: Arc<TokenStore>,
        deps: Collaborators,
        gateway_bot: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            tokens,
            deps,
            gateway_bot: gateway_bot.into(),
        }
    }

    /// Synchronous accept/reject for an envelope recipient
    ///
    /// Missed-message addresses are claimed and resolved here; the returned
    /// phase carries their routing data to the deferred dispatch. Channel
    /// addresses are only validated.
    pub fn accept(&self, rcpt_to: &str) -> AcceptOutcome {
        match self.classify(rcpt_to) {
            AddressClass::MissedMessage => match self.claim(rcpt_to) {
                Ok(data) => AcceptOutcome::Accepted(ProcessingPhase::AfterSyntacticValidation {
                    claimed: Some(data),
                }),
                Err(e) => {
                    tracing::info!(error = %self.codec.redact(&e.to_string(), false), "rejected missed message address");
                    AcceptOutcome::Rejected(BAD_MISSED_MESSAGE_ADDRESS)
                }
            },
            AddressClass::Stream => match self.validate_stream_address(rcpt_to) {
                Ok(_) => AcceptOutcome::Accepted(ProcessingPhase::AfterSyntacticValidation {
                    claimed: None,
                }),
                Err(e) => {
                    tracing::info!(error = %self.codec.redact(&e.to_string(), false), "rejected stream address");
                    AcceptOutcome::Rejected(BAD_STREAM_ADDRESS)
                }
            },
        }
    }

    /// Parse and dispatch one raw email
    ///
    /// Never fails: any [`ForwardError`] is logged and reported with
    /// identifying local-parts redacted, then returned as
    /// [`DispatchOutcome::Dropped`].
    pub fn process_message(
        &self,
        raw: &[u8],
        rcpt_to: Option<&str>,
        phase: ProcessingPhase,
    ) -> DispatchOutcome {
        let email = match mime::parse(raw) {
            Ok(email) => email,
            Err(e) => {
                self.report_failure("", &e, &DispatchTrace::default());
                return DispatchOutcome::Dropped(e);
            }
        };

        let mut trace = DispatchTrace::default();
        match self.dispatch(&email, rcpt_to, phase, &mut trace) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(e) => {
                // TODO: bounce the failure to the sender; only operators are told today.
                self.report_failure(&mime::sender(&email), &e, &trace);
                DispatchOutcome::Dropped(e)
            }
        }
    }

    /// Consume one use of a missed-message address and read its routing data
    fn claim(&self, address: &str) -> ForwardResult<MissedMessageData> {
        self.tokens.consume(address)?;
        self.tokens.resolve(address)
    }

    /// Find the gateway address an email was sent to
    ///
    /// # Errors
    ///
    /// Returns `NoRecipientFound` if no recipient header carries an address
    /// matching the template.
    pub fn resolve_recipient(
        &self,
        email: &ParsedMail<'_>,
        rcpt_to: Option<&str>,
    ) -> ForwardResult<String> {
        if let Some(to) = rcpt_to {
            return Ok(to.to_owned());
        }
        RECIPIENT_HEADERS
            .iter()
            .flat_map(|name| mime::header_addresses(email, name))
            .find(|address| self.codec.matches(address))
            .ok_or(ForwardError::NoRecipientFound)
    }

    /// Classify a resolved gateway address
    pub fn classify(&self, address: &str) -> AddressClass {
        if self.tokens.is_missed_message_address(address) {
            AddressClass::MissedMessage
        } else {
            AddressClass::Stream
        }
    }

    /// Decode a channel address and check it against the live channel
    ///
    /// # Errors
    ///
    /// - `UnrecognizedAddress`/`MalformedAddress` from decoding
    /// - `InvalidStreamToken` if no channel has the token or the names differ
    ///   (case-insensitively)
    pub fn validate_stream_address(&self, address: &str) -> ForwardResult<Channel> {
        let decoded = self.codec.decode(address)?;
        let channel = self
            .deps
            .channels
            .lookup_by_token(&decoded.token)
            .ok_or_else(|| ForwardError::InvalidStreamToken(address.to_owned()))?;
        if channel.name.to_lowercase() != decoded.channel_name.to_lowercase() {
            return Err(ForwardError::InvalidStreamToken(address.to_owned()));
        }
        Ok(channel)
    }

    fn dispatch(
        &self,
        email: &ParsedMail<'_>,
        rcpt_to: Option<&str>,
        phase: ProcessingPhase,
        trace: &mut DispatchTrace,
    ) -> ForwardResult<()> {
        let to = self.resolve_recipient(email, rcpt_to)?;
        trace.to = Some(to.clone());

        match self.classify(&to) {
            AddressClass::MissedMessage => self.missed_message_flow(&to, email, phase),
            AddressClass::Stream => self.stream_flow(&to, email, trace),
        }
    }

    fn missed_message_flow(
        &self,
        to: &str,
        email: &ParsedMail<'_>,
        phase: ProcessingPhase,
    ) -> ForwardResult<()> {
        let data = match phase {
            ProcessingPhase::FullProcessing => self.claim(to)?,
            ProcessingPhase::AfterSyntacticValidation {
                claimed: Some(data),
            } => data,
            ProcessingPhase::AfterSyntacticValidation { claimed: None } => {
                self.tokens.resolve(to)?
            }
        };

        let identities = &self.deps.identities;
        let user = identities
            .user(data.user_id)
            .ok_or_else(|| ForwardError::MissingData(format!("user {}", data.user_id)))?;
        let kind = identities.recipient(data.recipient_id).ok_or_else(|| {
            ForwardError::MissingData(format!("recipient {}", data.recipient_id))
        })?;

        let (target, recipient_label) = match kind {
            RecipientKind::Personal { user_id } => {
                let other = identities
                    .user(user_id)
                    .ok_or_else(|| ForwardError::MissingData(format!("user {user_id}")))?;
                (RoutingTarget::DirectReply { user_id }, other.email)
            }
            RecipientKind::Huddle { user_ids } => {
                let emails = user_ids
                    .iter()
                    .map(|id| {
                        identities
                            .user(*id)
                            .map(|u| u.email)
                            .ok_or_else(|| ForwardError::MissingData(format!("user {id}")))
                    })
                    .collect::<ForwardResult<Vec<_>>>()?;
                (RoutingTarget::GroupReply { user_ids }, emails.join(", "))
            }
            RecipientKind::Stream { channel_id } => {
                let channel = self
                    .deps
                    .channels
                    .channel(channel_id)
                    .ok_or_else(|| ForwardError::MissingData(format!("channel {channel_id}")))?;
                (
                    RoutingTarget::Channel {
                        name: channel.name.clone(),
                        realm_id: channel.realm_id,
                    },
                    channel.name,
                )
            }
        };

        let body = mime::assemble_body(
            email,
            self.deps.uploader.as_ref(),
            UploadScope {
                owner: &self.gateway_bot,
                realm_id: user.realm_id,
            },
        )?;
        self.deliver(OutboundMessage {
            sender: user.email.clone(),
            realm_id: user.realm_id,
            target,
            topic: data.subject,
            content: body,
        })?;

        tracing::info!(
            "Successfully processed email from {} to {}",
            user.email,
            recipient_label
        );
        Ok(())
    }

    fn stream_flow(
        &self,
        to: &str,
        email: &ParsedMail<'_>,
        trace: &mut DispatchTrace,
    ) -> ForwardResult<()> {
        let channel = self.validate_stream_address(to)?;
        trace.realm_id = Some(channel.realm_id);

        let body = mime::assemble_body(
            email,
            self.deps.uploader.as_ref(),
            UploadScope {
                owner: &self.gateway_bot,
                realm_id: channel.realm_id,
            },
        )?;
        self.deliver(OutboundMessage {
            sender: self.gateway_bot.clone(),
            realm_id: channel.realm_id,
            target: RoutingTarget::Channel {
                name: channel.name.clone(),
                realm_id: channel.realm_id,
            },
            topic: mime::subject(email),
            content: body,
        })?;

        tracing::info!(
            channel_id = channel.id,
            "Successfully processed email to {} ({})",
            channel.name,
            channel.realm_id
        );
        Ok(())
    }

    /// Apply platform limits and hand the message to delivery
    fn deliver(&self, mut message: OutboundMessage) -> ForwardResult<()> {
        message.topic = mime::truncate_chars(&message.topic, TOPIC_MAX_CHARS);
        message.content = mime::truncate_chars(&message.content, BODY_MAX_CHARS);
        self.deps.delivery.send(&message)
    }

    /// Log and alert a failure with identifying local-parts masked
    fn report_failure(&self, sender: &str, err: &ForwardError, trace: &DispatchTrace) {
        let mut report = format!(
            "Sender: {}\n{}",
            self.codec.redact(sender, true),
            self.codec.redact(&err.to_string(), false)
        );
        if let Some(to) = &trace.to {
            report = format!("Stream: {}\n{report}", self.codec.redact(to, false));
        }
        if let Some(realm_id) = trace.realm_id {
            report = format!("Realm: {realm_id}\n{report}");
        }

        tracing::error!("{report}");
        self.deps.alerts.report(&report);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{
        AcceptOutcome, AddressClass, BAD_MISSED_MESSAGE_ADDRESS, BAD_STREAM_ADDRESS,
        Collaborators, DispatchOutcome, ProcessingPhase, Router,
    };
    use crate::address::AddressCodec;
    use crate::directory::Directory;
    use crate::directory::tests::SAMPLE;
    use crate::errors::ForwardError;
    use crate::kv::MemoryStore;
    use crate::mime::tests::RecordingUploader;
    use crate::outbound::tests::RecordingDelivery;
    use crate::outbound::{AlertSink, RoutingTarget};
    use crate::tokens::{MissedMessageData, TokenStore};

    #[derive(Default)]
    struct RecordingAlerts {
        reports: Mutex<Vec<String>>,
    }

    impl RecordingAlerts {
        fn reports(&self) -> Vec<String> {
            self.reports.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    impl AlertSink for RecordingAlerts {
        fn report(&self, message: &str) {
            if let Ok(mut reports) = self.reports.lock() {
                reports.push(message.to_owned());
            }
        }
    }

    struct Fixture {
        router: Router,
        tokens: Arc<TokenStore>,
        delivery: Arc<RecordingDelivery>,
        alerts: Arc<RecordingAlerts>,
    }

    fn fixture() -> Fixture {
        let codec = Arc::new(AddressCodec::new("%s@example.com", None).expect("template"));
        let tokens = Arc::new(TokenStore::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&codec),
            "noreply@example.com",
        ));
        let directory = Arc::new(Directory::from_json(SAMPLE).expect("directory"));
        let delivery = Arc::new(RecordingDelivery::default());
        let alerts = Arc::new(RecordingAlerts::default());
        let router = Router::new(
            codec,
            Arc::clone(&tokens),
            Collaborators {
                channels: directory.clone(),
                identities: directory,
                uploader: Arc::new(RecordingUploader::default()),
                delivery: delivery.clone(),
                alerts: alerts.clone(),
            },
            "emailgateway@example.com",
        );
        Fixture {
            router,
            tokens,
            delivery,
            alerts,
        }
    }

    fn email(headers: &str, body: &str) -> Vec<u8> {
        format!(
            "From: Iago <iago@example.org>\r\n{headers}Content-Type: text/plain; charset=utf-8\r\n\r\n{body}"
        )
        .into_bytes()
    }

    #[test]
    fn delivers_channel_email_found_in_to_header() {
        let fx = fixture();
        let raw = email(
            "To: Gateway <general+abc123@example.com>\r\nSubject: Weekly sync\r\n",
            "Notes attached below.\n--\nIago",
        );
        assert_eq!(
            fx.router
                .process_message(&raw, None, ProcessingPhase::FullProcessing),
            DispatchOutcome::Delivered
        );

        let sent = fx.delivery.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, "emailgateway@example.com");
        assert_eq!(
            sent[0].target,
            RoutingTarget::Channel {
                name: "General".to_owned(),
                realm_id: 1
            }
        );
        assert_eq!(sent[0].topic, "Weekly sync");
        assert_eq!(sent[0].content, "Notes attached below.");
        assert!(fx.alerts.reports().is_empty());
    }

    #[test]
    fn recipient_headers_are_scanned_in_priority_order() {
        let fx = fixture();
        let raw = email(
            "To: other@example.org\r\nDelivered-To: sales%0047eu+def456@example.com\r\nX-Gm-Original-To: general+abc123@example.com\r\n",
            "Hi",
        );
        let to = fx
            .router
            .resolve_recipient(&crate::mime::parse(&raw).expect("parse"), None)
            .expect("recipient");
        assert_eq!(to, "general+abc123@example.com");

        let fallback = email("To: Sales <sales%0047eu+def456@example.com>\r\n", "Hi");
        assert_eq!(
            fx.router
                .process_message(&fallback, None, ProcessingPhase::FullProcessing),
            DispatchOutcome::Delivered
        );
        assert_eq!(
            fx.delivery.messages()[0].target,
            RoutingTarget::Channel {
                name: "sales/eu".to_owned(),
                realm_id: 1
            }
        );
        assert_eq!(fx.delivery.messages()[0].topic, "(no subject)");
    }

    #[test]
    fn envelope_recipient_overrides_headers() {
        let fx = fixture();
        let raw = email("To: nobody@example.org\r\n", "Hi");
        assert_eq!(
            fx.router.process_message(
                &raw,
                Some("general.abc123@example.com"),
                ProcessingPhase::FullProcessing
            ),
            DispatchOutcome::Delivered
        );
    }

    #[test]
    fn missing_recipient_is_reported_with_sender_redacted() {
        let fx = fixture();
        let raw = email("To: nobody@example.org\r\n", "Hi");
        assert_eq!(
            fx.router
                .process_message(&raw, None, ProcessingPhase::FullProcessing),
            DispatchOutcome::Dropped(ForwardError::NoRecipientFound)
        );
        let reports = fx.alerts.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("Sender: Iago <XXXX@example.org>\n"));
        assert!(!reports[0].contains("iago@"));
        assert!(fx.delivery.messages().is_empty());
    }

    #[test]
    fn bad_stream_token_is_dropped_and_redacted() {
        let fx = fixture();
        let raw = email("To: random+abc123@example.com\r\n", "Hi");
        let outcome = fx
            .router
            .process_message(&raw, None, ProcessingPhase::FullProcessing);
        assert!(matches!(
            outcome,
            DispatchOutcome::Dropped(ForwardError::InvalidStreamToken(_))
        ));

        let report = &fx.alerts.reports()[0];
        assert!(report.starts_with("Stream: XXXXXXXXXXXXX@example.com\n"));
        assert!(!report.contains("random"));
        assert!(!report.contains("abc123"));
    }

    #[test]
    fn channel_name_comparison_ignores_case_but_not_spelling() {
        let fx = fixture();
        assert!(fx
            .router
            .validate_stream_address("GENERAL+abc123@example.com")
            .is_ok());
        assert!(matches!(
            fx.router
                .validate_stream_address("general+def456@example.com"),
            Err(ForwardError::InvalidStreamToken(_))
        ));
        assert!(matches!(
            fx.router.validate_stream_address("general@example.com"),
            Err(ForwardError::MalformedAddress(_))
        ));
    }

    #[test]
    fn missed_message_reply_goes_back_as_direct_message() {
        let fx = fixture();
        let address = fx.tokens.generate(7, 20, "lunch").expect("generate");
        assert_eq!(fx.router.classify(&address), AddressClass::MissedMessage);

        let raw = email(&format!("To: {address}\r\nSubject: Re: lunch\r\n"), "Noon works");
        assert_eq!(
            fx.router
                .process_message(&raw, None, ProcessingPhase::FullProcessing),
            DispatchOutcome::Delivered
        );
        let sent = fx.delivery.messages();
        assert_eq!(sent[0].sender, "iago@example.com");
        assert_eq!(sent[0].target, RoutingTarget::DirectReply { user_id: 8 });
        assert_eq!(sent[0].topic, "lunch");
        assert_eq!(sent[0].content, "Noon works");

        assert_eq!(
            fx.router
                .process_message(&raw, None, ProcessingPhase::FullProcessing),
            DispatchOutcome::Dropped(ForwardError::AddressExhausted)
        );
        assert_eq!(fx.delivery.messages().len(), 1);
    }

    #[test]
    fn missed_message_replies_reach_groups_and_channels() {
        let fx = fixture();
        let huddle = fx.tokens.generate(7, 22, "plans").expect("generate");
        let stream = fx.tokens.generate(7, 21, "release").expect("generate");

        for address in [&huddle, &stream] {
            let raw = email(&format!("To: {address}\r\n"), "ok");
            assert_eq!(
                fx.router
                    .process_message(&raw, None, ProcessingPhase::FullProcessing),
                DispatchOutcome::Delivered
            );
        }

        let sent = fx.delivery.messages();
        assert_eq!(
            sent[0].target,
            RoutingTarget::GroupReply {
                user_ids: vec![7, 8]
            }
        );
        assert_eq!(
            sent[1].target,
            RoutingTarget::Channel {
                name: "General".to_owned(),
                realm_id: 1
            }
        );
        assert_eq!(sent[1].topic, "release");
    }

    #[test]
    fn two_phase_protocol_consumes_token_once() {
        let fx = fixture();
        let address = fx.tokens.generate(7, 20, "lunch").expect("generate");

        let AcceptOutcome::Accepted(phase) = fx.router.accept(&address) else {
            panic!("fresh missed message address must be accepted");
        };
        assert_eq!(
            phase,
            ProcessingPhase::AfterSyntacticValidation {
                claimed: Some(MissedMessageData {
                    user_id: 7,
                    recipient_id: 20,
                    subject: "lunch".to_owned(),
                }),
            }
        );
        let raw = email("", "Deferred reply");
        assert_eq!(
            fx.router
                .process_message(&raw, Some(address.as_str()), phase),
            DispatchOutcome::Delivered
        );
        assert_eq!(
            fx.router.accept(&address),
            AcceptOutcome::Rejected(BAD_MISSED_MESSAGE_ADDRESS)
        );
    }

    #[test]
    fn second_accept_does_not_lose_queued_reply() {
        let fx = fixture();
        let address = fx.tokens.generate(7, 20, "lunch").expect("generate");

        let AcceptOutcome::Accepted(phase) = fx.router.accept(&address) else {
            panic!("fresh missed message address must be accepted");
        };
        // The second attempt deletes the token record before the first dispatch runs.
        assert_eq!(
            fx.router.accept(&address),
            AcceptOutcome::Rejected(BAD_MISSED_MESSAGE_ADDRESS)
        );
        assert!(fx.tokens.resolve(&address).is_err());

        let raw = email("", "Queued reply");
        assert_eq!(
            fx.router
                .process_message(&raw, Some(address.as_str()), phase),
            DispatchOutcome::Delivered
        );
        let sent = fx.delivery.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, "iago@example.com");
        assert_eq!(sent[0].target, RoutingTarget::DirectReply { user_id: 8 });
        assert_eq!(sent[0].topic, "lunch");
        assert_eq!(sent[0].content, "Queued reply");
        assert!(fx.alerts.reports().is_empty());
    }

    #[test]
    fn accept_validates_channel_addresses_without_side_effects() {
        let fx = fixture();
        let validated = AcceptOutcome::Accepted(ProcessingPhase::AfterSyntacticValidation {
            claimed: None,
        });
        assert_eq!(fx.router.accept("general+abc123@example.com"), validated);
        assert_eq!(fx.router.accept("general+abc123@example.com"), validated);
        assert_eq!(
            fx.router.accept("general+wrong@example.com"),
            AcceptOutcome::Rejected(BAD_STREAM_ADDRESS)
        );
        assert_eq!(
            fx.router.accept("someone@elsewhere.org"),
            AcceptOutcome::Rejected(BAD_STREAM_ADDRESS)
        );
        assert!(fx.delivery.messages().is_empty());
    }

    #[test]
    fn expired_or_unknown_user_data_is_missing_data() {
        let fx = fixture();
        let address = fx.tokens.generate(99, 20, "ghost").expect("generate");
        let raw = email(&format!("To: {address}\r\n"), "hello");
        assert!(matches!(
            fx.router
                .process_message(&raw, None, ProcessingPhase::FullProcessing),
            DispatchOutcome::Dropped(ForwardError::MissingData(_))
        ));
        assert!(!fx.alerts.reports()[0].contains(&address[..34]));
    }

    #[test]
    fn truncates_topic_and_body_to_platform_limits() {
        let fx = fixture();
        let subject = "x".repeat(100);
        let body = "é".repeat(3_000);
        let raw = email(
            &format!("To: general+abc123@example.com\r\nSubject: {subject}\r\n"),
            &body,
        );
        assert_eq!(
            fx.router
                .process_message(&raw, None, ProcessingPhase::FullProcessing),
            DispatchOutcome::Delivered
        );
        let sent = fx.delivery.messages();
        assert_eq!(sent[0].topic, "x".repeat(60));
        assert_eq!(sent[0].content.chars().count(), 2_000);
    }
}
