use clap::{Args, Subcommand};
use std::path::PathBuf;

use wsmux_peer::{MultiplexerConfig, PeerError};
use wsmux_transport::TransportError;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an echo server.
    Echo(EchoArgs),
    /// Open a channel and send a single message.
    Send(SendArgs),
    /// Listen and print received messages.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Resolve when Ctrl-C is received.
pub async fn ctrl_c() -> CliResult<()> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// A client that failed its WebSocket handshake only costs that connection.
pub fn is_handshake_failure(err: &PeerError) -> bool {
    matches!(err, PeerError::Transport(TransportError::Handshake { .. }))
}

/// Size limits shared by all connection commands. Unset flags fall back to
/// `WSMUX_MAX_CHUNK_SIZE` / `WSMUX_MAX_MESSAGE_SIZE`, then built-in defaults.
#[derive(Args, Debug, Default)]
pub struct LimitArgs {
    /// Largest body per outbound frame in bytes.
    #[arg(long, value_name = "BYTES", value_parser = parse_size)]
    pub chunk_size: Option<usize>,
    /// Largest accepted inbound message in bytes.
    #[arg(long, value_name = "BYTES", value_parser = parse_size)]
    pub max_message_size: Option<usize>,
}

impl LimitArgs {
    pub fn config(&self) -> MultiplexerConfig {
        let mut config = MultiplexerConfig::from_env();
        if let Some(size) = self.chunk_size {
            config.max_chunk_size = size;
        }
        if let Some(size) = self.max_message_size {
            config.max_message_size = size;
        }
        config
    }
}

fn parse_size(input: &str) -> Result<usize, String> {
    match input.parse::<usize>() {
        Ok(0) => Err("size must be greater than zero".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(format!("invalid size: {err}")),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind (e.g. 127.0.0.1:9000).
    pub addr: String,
    #[command(flatten)]
    pub limits: LimitArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// WebSocket URL to connect to (e.g. ws://127.0.0.1:9000).
    pub url: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one reply on the channel and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    #[command(flatten)]
    pub limits: LimitArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind (e.g. 127.0.0.1:9000).
    pub addr: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub limits: LimitArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_flags_override_defaults() {
        let limits = LimitArgs {
            chunk_size: Some(4096),
            max_message_size: None,
        };
        let config = limits.config();
        assert_eq!(config.max_chunk_size, 4096);
        assert!(config.max_message_size > 0);
    }

    #[test]
    fn parse_size_rejects_zero_and_garbage() {
        assert_eq!(parse_size("65000"), Ok(65_000));
        assert!(parse_size("0").is_err());
        assert!(parse_size("lots").is_err());
    }
}
