//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 4 MCP tools. Handles
//! input validation, hands accepted email to the deferred-processing worker,
//! and formats responses.

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::address::AddressCodec;
use crate::directory::ChannelRepository;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AcceptEmailInput, AcceptEmailResult, AddressInput, AddressResult,
    CreateMissedMessageAddressInput, DecodedAddressResult, EncodeAddressInput, Meta,
    ToolEnvelope,
};
use crate::router::{AcceptOutcome, DispatchOutcome, ProcessingPhase, Router};
use crate::tokens::TokenStore;

/// Longest address accepted by the tools
const MAX_ADDRESS_CHARS: usize = 320;
/// Longest channel name or topic accepted by the tools
const MAX_NAME_CHARS: usize = 256;

/// Email waiting for deferred dispatch
#[derive(Debug)]
pub struct QueuedEmail {
    /// Envelope recipient already validated by [`Router::accept`]
    pub recipient: String,
    /// Raw RFC 822 source
    pub raw: Vec<u8>,
    /// Phase returned by [`Router::accept`], carrying any claimed routing data
    pub phase: ProcessingPhase,
}

/// Start the deferred-processing worker
///
/// Emails are dispatched one at a time on the blocking pool in the phase
/// their accept step returned. The worker exits when every sender is dropped.
pub fn spawn_dispatch_worker(
    router: Arc<Router>,
    capacity: usize,
) -> (mpsc::Sender<QueuedEmail>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<QueuedEmail>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(email) = rx.recv().await {
            let router = Arc::clone(&router);
            let result = tokio::task::spawn_blocking(move || {
                router.process_message(&email.raw, Some(email.recipient.as_str()), email.phase)
            })
            .await;
            match result {
                Ok(DispatchOutcome::Delivered) => tracing::debug!("queued email delivered"),
                Ok(DispatchOutcome::Dropped(_)) => {}
                Err(e) => tracing::error!(error = %e, "dispatch task failed"),
            }
        }
        tracing::debug!("dispatch queue closed");
    });
    (tx, handle)
}

/// Gateway MCP server
///
/// Holds the router, the address codec and token store, and the sending half
/// of the dispatch queue. Implements MCP tool handlers via `#[tool]` attribute
/// macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct GatewayServer {
    router: Arc<Router>,
    codec: Arc<AddressCodec>,
    tokens: Arc<TokenStore>,
    channels: Arc<dyn ChannelRepository>,
    queue: mpsc::Sender<QueuedEmail>,
    max_message_bytes: usize,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GatewayServer {
    /// Create a new MCP server instance
    pub fn new(
        router: Arc<Router>,
        codec: Arc<AddressCodec>,
        tokens: Arc<TokenStore>,
        channels: Arc<dyn ChannelRepository>,
        queue: mpsc::Sender<QueuedEmail>,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            router,
            codec,
            tokens,
            channels,
            queue,
            max_message_bytes,
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: Accept an inbound email
    ///
    /// Runs the synchronous accept step and, on success, queues the message
    /// for full dispatch. A rejection is a normal result, not an error.
    #[tool(
        name = "gateway_accept_email",
        description = "Accept or reject an inbound email for a gateway address and queue it for delivery"
    )]
    async fn accept_email(
        &self,
        Parameters(input): Parameters<AcceptEmailInput>,
    ) -> Result<Json<ToolEnvelope<AcceptEmailResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.accept_email_impl(input).await.map(|data| {
                let summary = if data.accepted {
                    "Email accepted and queued for delivery".to_owned()
                } else {
                    "Email rejected".to_owned()
                };
                (summary, data)
            }),
        )
    }

    /// Tool: Build a channel address
    #[tool(
        name = "gateway_encode_address",
        description = "Build the gateway email address for a channel"
    )]
    async fn encode_address(
        &self,
        Parameters(input): Parameters<EncodeAddressInput>,
    ) -> Result<Json<ToolEnvelope<AddressResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.encode_address_impl(input)
                .map(|data| ("Channel address encoded".to_owned(), data)),
        )
    }

    /// Tool: Decode a gateway address
    ///
    /// Missed-message addresses are only classified; their token is never
    /// echoed back.
    #[tool(
        name = "gateway_decode_address",
        description = "Decode a gateway email address into channel name and token"
    )]
    async fn decode_address(
        &self,
        Parameters(input): Parameters<AddressInput>,
    ) -> Result<Json<ToolEnvelope<DecodedAddressResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.decode_address_impl(input)
                .map(|data| (format!("Decoded {} address", data.kind), data)),
        )
    }

    /// Tool: Create a single-use reply address
    #[tool(
        name = "gateway_create_missed_message_address",
        description = "Create a single-use reply address routing back into a conversation"
    )]
    async fn create_missed_message_address(
        &self,
        Parameters(input): Parameters<CreateMissedMessageAddressInput>,
    ) -> Result<Json<ToolEnvelope<AddressResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.create_missed_message_address_impl(input)
                .await
                .map(|data| ("Missed message address created".to_owned(), data)),
        )
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Email-to-chat gateway. Hand inbound email to gateway_accept_email; use the address tools to build and inspect gateway addresses.",
        )
    }
}

/// Tool implementation methods
///
/// Private methods handle the actual business logic for each tool, separated
/// from the public `#[tool]` methods that handle response formatting.
impl GatewayServer {
    async fn accept_email_impl(&self, input: AcceptEmailInput) -> AppResult<AcceptEmailResult> {
        validate_address(&input.recipient, "recipient")?;
        validate_message(&input.message, self.max_message_bytes)?;

        let router = Arc::clone(&self.router);
        let recipient = input.recipient.clone();
        let outcome = tokio::task::spawn_blocking(move || router.accept(&recipient))
            .await
            .map_err(|e| AppError::Internal(format!("accept task failed: {e}")))?;

        match outcome {
            AcceptOutcome::Rejected(reason) => Ok(AcceptEmailResult {
                accepted: false,
                reason: Some(reason.to_owned()),
            }),
            AcceptOutcome::Accepted(phase) => {
                self.queue
                    .send(QueuedEmail {
                        recipient: input.recipient,
                        raw: input.message.into_bytes(),
                        phase,
                    })
                    .await
                    .map_err(|_| AppError::Internal("dispatch queue is closed".to_owned()))?;
                Ok(AcceptEmailResult {
                    accepted: true,
                    reason: None,
                })
            }
        }
    }

    fn encode_address_impl(&self, input: EncodeAddressInput) -> AppResult<AddressResult> {
        validate_text(&input.channel_name, MAX_NAME_CHARS, "channel_name")?;
        if !self.codec.is_enabled() {
            return Err(AppError::invalid(
                "gateway address template is not configured",
            ));
        }

        let (name, token) = match (input.token, input.realm_id) {
            (Some(token), _) => {
                validate_token(&token)?;
                (input.channel_name, token)
            }
            (None, Some(realm_id)) => {
                let channel = self
                    .channels
                    .channel_by_name(realm_id, &input.channel_name)
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "channel '{}' in realm {realm_id}",
                            input.channel_name
                        ))
                    })?;
                let token = channel.email_token.expose_secret().to_owned();
                (channel.name, token)
            }
            (None, None) => {
                return Err(AppError::invalid("either token or realm_id is required"));
            }
        };

        Ok(AddressResult {
            address: self.codec.encode(&name, &token),
        })
    }

    fn decode_address_impl(&self, input: AddressInput) -> AppResult<DecodedAddressResult> {
        validate_address(&input.address, "address")?;
        if self.tokens.is_missed_message_address(&input.address) {
            return Ok(DecodedAddressResult {
                kind: "missed_message".to_owned(),
                channel_name: None,
                token: None,
            });
        }

        let decoded = self.codec.decode(&input.address)?;
        Ok(DecodedAddressResult {
            kind: "stream".to_owned(),
            channel_name: Some(decoded.channel_name),
            token: Some(decoded.token),
        })
    }

    async fn create_missed_message_address_impl(
        &self,
        input: CreateMissedMessageAddressInput,
    ) -> AppResult<AddressResult> {
        validate_no_controls(&input.subject, "subject")?;
        if input.subject.chars().count() > MAX_NAME_CHARS {
            return Err(AppError::InvalidInput(format!(
                "subject must be at most {MAX_NAME_CHARS} characters"
            )));
        }

        let tokens = Arc::clone(&self.tokens);
        let address = tokio::task::spawn_blocking(move || {
            tokens.generate(input.user_id, input.recipient_id, &input.subject)
        })
        .await
        .map_err(|e| AppError::Internal(format!("token task failed: {e}")))??;
        Ok(AddressResult { address })
    }
}

/// Calculate milliseconds elapsed since start time
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

/// Validate an email address field
fn validate_address(address: &str, field: &str) -> AppResult<()> {
    validate_text(address, MAX_ADDRESS_CHARS, field)?;
    if !address.contains('@') {
        return Err(AppError::InvalidInput(format!(
            "{field} must be an email address"
        )));
    }
    Ok(())
}

/// Validate a raw message against the configured size bound
fn validate_message(message: &str, max_bytes: usize) -> AppResult<()> {
    if message.trim().is_empty() {
        return Err(AppError::invalid("message must not be empty"));
    }
    if message.len() > max_bytes {
        return Err(AppError::InvalidInput(format!(
            "message exceeds {max_bytes} bytes"
        )));
    }
    Ok(())
}

/// Validate a channel token supplied by the caller
fn validate_token(token: &str) -> AppResult<()> {
    validate_text(token, MAX_NAME_CHARS, "token")?;
    if !token.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(AppError::invalid("token must match [A-Za-z0-9]+"));
    }
    Ok(())
}

/// Validate a bounded, non-empty text field
fn validate_text(value: &str, max_chars: usize, field: &str) -> AppResult<()> {
    if value.is_empty() || value.chars().count() > max_chars {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..{max_chars} characters"
        )));
    }
    validate_no_controls(value, field)
}

/// Reject control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}
