//! mail-chat-gateway: email-to-chat gateway core
//!
//! Turns inbound email into chat messages. Channel addresses carry the
//! channel name and a per-channel token; single-use missed-message addresses
//! let users reply to notification emails. The gateway is driven either as an
//! MCP server over stdio or one message at a time from stdin.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, wiring, and subcommands
//! - [`config`]: Environment-driven gateway configuration
//! - [`errors`]: Per-message forwarding errors and application error model
//! - [`address`]: Reversible channel address encoding and report redaction
//! - [`kv`]: Hash records with per-key TTL and atomic counters
//! - [`tokens`]: Single-use missed-message reply addresses
//! - [`directory`]: Channel and identity lookups backed by a JSON file
//! - [`quotations`]: Quoted-reply stripping for plaintext and HTML bodies
//! - [`mime`]: Message parsing and chat-body extraction
//! - [`outbound`]: Attachment storage, chat delivery, and alerting
//! - [`router`]: Dispatch state machine and failure boundary
//! - [`server`]: MCP tool handlers and the deferred-processing worker
//! - [`models`]: Input/output DTOs and schema-bearing types

mod address;
mod config;
mod directory;
mod errors;
mod kv;
mod mime;
mod models;
mod outbound;
mod quotations;
mod router;
mod server;
mod tokens;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use address::AddressCodec;
use config::GatewayConfig;
use directory::{Directory, IdentityRepository};
use errors::{AppError, AppResult};
use kv::MemoryStore;
use outbound::{Delivery, ErrorChannelAlerts, FsUploader, OutboxDelivery};
use router::{Collaborators, DispatchOutcome, ProcessingPhase, Router};
use server::GatewayServer;
use tokens::TokenStore;

/// Command line interface
#[derive(Debug, Parser)]
#[command(name = "mail-chat-gateway", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the MCP tools over stdio (default)
    Serve,
    /// Dispatch one raw RFC 822 message read from stdin
    Ingest {
        /// Trusted envelope recipient; recipient headers are scanned otherwise
        #[arg(long)]
        recipient: Option<String>,
    },
}

/// Wired gateway components shared by both subcommands
struct Gateway {
    codec: Arc<AddressCodec>,
    tokens: Arc<TokenStore>,
    directory: Arc<Directory>,
    router: Arc<Router>,
}

impl Gateway {
    /// Build every component from configuration
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the template or directory file is invalid
    /// - `NotFound` if the configured error bot is not in the directory
    fn build(config: &GatewayConfig) -> AppResult<Self> {
        let codec = Arc::new(config.codec()?);
        let directory = Arc::new(Directory::load(&config.directory_path)?);
        let tokens = Arc::new(TokenStore::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&codec),
            config.noreply_address.clone(),
        ));

        let error_bot = match &config.error_bot {
            Some(email) => {
                let bot = directory.user_by_email(email).ok_or_else(|| {
                    AppError::NotFound(format!("error bot {email} is not in the directory"))
                })?;
                Some((bot.email, bot.realm_id))
            }
            None => None,
        };

        let delivery: Arc<dyn Delivery> = Arc::new(OutboxDelivery::new(&config.outbox_path));
        let router = Arc::new(Router::new(
            Arc::clone(&codec),
            Arc::clone(&tokens),
            Collaborators {
                channels: directory.clone(),
                identities: directory.clone(),
                uploader: Arc::new(FsUploader::new(
                    &config.upload_dir,
                    config.upload_base_url.clone(),
                )),
                delivery: Arc::clone(&delivery),
                alerts: Arc::new(ErrorChannelAlerts::new(delivery, error_bot)),
            },
            config.gateway_bot.clone(),
        ));

        Ok(Self {
            codec,
            tokens,
            directory,
            router,
        })
    }
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and runs the
/// selected subcommand. Logs go to stderr; stdout carries the MCP transport.
///
/// # Environment Variables
///
/// See [`GatewayConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_GATEWAY_PATTERN=%s@streams.example.com \
/// MAIL_GATEWAY_DIRECTORY=directory.json \
/// cargo run -- ingest --recipient general+abc123@streams.example.com < message.eml
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::load_from_env()?;
    let gateway = Gateway::build(&config)?;
    if !gateway.codec.is_enabled() {
        tracing::warn!("MAIL_GATEWAY_PATTERN is empty, gateway addresses are disabled");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(gateway, &config).await,
        Command::Ingest { recipient } => ingest(gateway, &config, recipient).await,
    }
}

/// Serve MCP over stdio until the client disconnects or Ctrl-C
async fn serve(gateway: Gateway, config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (queue, worker) =
        server::spawn_dispatch_worker(Arc::clone(&gateway.router), config.queue_capacity);
    let service = GatewayServer::new(
        gateway.router,
        gateway.codec,
        gateway.tokens,
        gateway.directory,
        queue,
        config.max_message_bytes,
    )
    .serve(stdio())
    .await?;

    tokio::select! {
        quit = service.waiting() => {
            let reason = quit?;
            tracing::info!(reason = ?reason, "MCP session ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, draining dispatch queue");
        }
    }

    // The server owned the last queue sender; the worker finishes what is queued.
    worker.await?;
    Ok(())
}

/// Dispatch a single message from stdin with full processing
async fn ingest(
    gateway: Gateway,
    config: &GatewayConfig,
    recipient: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut raw = Vec::new();
    tokio::io::stdin().read_to_end(&mut raw).await?;
    if raw.len() > config.max_message_bytes {
        return Err(AppError::InvalidInput(format!(
            "message exceeds {} bytes",
            config.max_message_bytes
        ))
        .into());
    }

    let router = gateway.router;
    let outcome = tokio::task::spawn_blocking(move || {
        router.process_message(&raw, recipient.as_deref(), ProcessingPhase::FullProcessing)
    })
    .await?;

    match outcome {
        DispatchOutcome::Delivered => Ok(()),
        DispatchOutcome::Dropped(e) => Err(AppError::from(e).into()),
    }
}
