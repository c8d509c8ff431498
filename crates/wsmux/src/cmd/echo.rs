use std::sync::Arc;

use wsmux_frame::UniqueId;
use wsmux_peer::{ChannelMultiplexer, PeerError, PeerListener};

use crate::cmd::{ctrl_c, is_handshake_failure, EchoArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Debug)]
enum RecvErrorDisposition {
    /// The peer closed the channel; close our side too.
    CloseChannel,
    /// The connection is gone.
    Disconnected,
    Fatal,
}

pub async fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let listener = PeerListener::bind(&args.addr)
        .await
        .map_err(|err| peer_error("bind failed", err))?
        .with_config(args.limits.config());
    tracing::info!(url = %listener.url(), "echo server ready");

    let shutdown = ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                tracing::info!("shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(peer) => {
                    tokio::spawn(serve_peer(Arc::new(peer)));
                }
                Err(err) if is_handshake_failure(&err) => {
                    tracing::warn!(error = %err, "rejected connection");
                }
                Err(err) => return Err(peer_error("accept failed", err)),
            },
        }
    }

    Ok(SUCCESS)
}

async fn serve_peer(peer: Arc<ChannelMultiplexer>) {
    loop {
        match peer.accept_channel().await {
            Ok(channel) => {
                tokio::spawn(echo_channel(Arc::clone(&peer), channel));
            }
            Err(err) => {
                tracing::info!(peer = peer.id(), reason = %err, "peer gone");
                return;
            }
        }
    }
}

async fn echo_channel(peer: Arc<ChannelMultiplexer>, channel: UniqueId) {
    loop {
        let message = match peer.receive(channel).await {
            Ok(message) => message,
            Err(err) => {
                match classify_recv_error(&err) {
                    RecvErrorDisposition::CloseChannel => {
                        if let Err(err) = peer.close_channel(channel).await {
                            tracing::debug!(peer = peer.id(), %channel, error = %err, "close failed");
                        }
                    }
                    RecvErrorDisposition::Disconnected => {}
                    RecvErrorDisposition::Fatal => {
                        tracing::warn!(peer = peer.id(), %channel, error = %err, "receive failed");
                    }
                }
                return;
            }
        };

        tracing::info!(peer = peer.id(), %channel, size = message.len(), "echoing message");

        if let Err(err) = peer.send(channel, message).await {
            tracing::warn!(peer = peer.id(), %channel, error = %err, "echo send failed");
            return;
        }
    }
}

fn classify_recv_error(err: &PeerError) -> RecvErrorDisposition {
    match err {
        PeerError::ChannelClosed(_) => RecvErrorDisposition::CloseChannel,
        err if err.is_disconnect() => RecvErrorDisposition::Disconnected,
        _ => RecvErrorDisposition::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use wsmux_frame::FrameError;

    use super::*;

    #[test]
    fn closed_channel_is_closed_locally() {
        let disposition = classify_recv_error(&PeerError::ChannelClosed(UniqueId::generate()));
        assert!(matches!(disposition, RecvErrorDisposition::CloseChannel));
    }

    #[test]
    fn connection_loss_ends_quietly() {
        let disposition = classify_recv_error(&PeerError::Frame(FrameError::ConnectionClosed));
        assert!(matches!(disposition, RecvErrorDisposition::Disconnected));
    }

    #[test]
    fn other_errors_are_reported() {
        let disposition =
            classify_recv_error(&PeerError::ProtocolViolation("duplicate open".to_string()));
        assert!(matches!(disposition, RecvErrorDisposition::Fatal));
    }

    #[tokio::test]
    async fn echo_channel_returns_messages_until_closed() {
        let (a, b) = wsmux_transport::pair().await;
        let server = Arc::new(ChannelMultiplexer::from_stream("server", a, Default::default()));
        let client = ChannelMultiplexer::from_stream("client", b, Default::default());

        tokio::spawn(serve_peer(Arc::clone(&server)));
        let channel = client.open_channel().await.unwrap();
        client.send(channel, bytes::Bytes::from_static(b"one")).await.unwrap();
        client.send(channel, bytes::Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(client.receive(channel).await.unwrap().as_ref(), b"one");
        assert_eq!(client.receive(channel).await.unwrap().as_ref(), b"two");

        client.close_channel(channel).await.unwrap();
        client.disconnect().await.unwrap();
    }
}
