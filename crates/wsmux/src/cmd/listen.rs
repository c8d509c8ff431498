use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use wsmux_frame::UniqueId;
use wsmux_peer::{ChannelMultiplexer, PeerError, PeerListener};

use crate::cmd::{ctrl_c, is_handshake_failure, ListenArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

enum Event {
    Message {
        peer_id: String,
        channel: UniqueId,
        message: Bytes,
    },
    AcceptFailed(PeerError),
}

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = PeerListener::bind(&args.addr)
        .await
        .map_err(|err| peer_error("bind failed", err))?
        .with_config(args.limits.config());
    tracing::info!(url = %listener.url(), "listening");

    // WebSocket handshakes are not cancel-safe; keep accept out of the select.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let acceptor = tokio::spawn(accept_loop(listener, tx));

    let shutdown = ctrl_c();
    tokio::pin!(shutdown);

    let mut printed = 0usize;
    let result = loop {
        tokio::select! {
            result = &mut shutdown => break result.map(|()| SUCCESS),
            event = rx.recv() => match event {
                Some(Event::Message { peer_id, channel, message }) => {
                    print_message(&message, channel, &peer_id, format);
                    printed = printed.saturating_add(1);

                    if args.count.is_some_and(|count| printed >= count) {
                        break Ok(SUCCESS);
                    }
                }
                Some(Event::AcceptFailed(err)) => break Err(peer_error("accept failed", err)),
                None => break Ok(SUCCESS),
            },
        }
    };

    acceptor.abort();
    result
}

async fn accept_loop(listener: PeerListener, tx: mpsc::UnboundedSender<Event>) {
    loop {
        match listener.accept().await {
            Ok(peer) => {
                tokio::spawn(forward_peer(Arc::new(peer), tx.clone()));
            }
            Err(err) if is_handshake_failure(&err) => {
                tracing::warn!(error = %err, "rejected connection");
            }
            Err(err) => {
                let _ = tx.send(Event::AcceptFailed(err));
                return;
            }
        }
    }
}

async fn forward_peer(peer: Arc<ChannelMultiplexer>, tx: mpsc::UnboundedSender<Event>) {
    while let Ok(channel) = peer.accept_channel().await {
        tokio::spawn(forward_channel(Arc::clone(&peer), channel, tx.clone()));
    }
    tracing::debug!(peer = peer.id(), "peer gone");
}

async fn forward_channel(
    peer: Arc<ChannelMultiplexer>,
    channel: UniqueId,
    tx: mpsc::UnboundedSender<Event>,
) {
    loop {
        match peer.receive(channel).await {
            Ok(message) => {
                let event = Event::Message {
                    peer_id: peer.id().to_string(),
                    channel,
                    message,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::debug!(peer = peer.id(), %channel, reason = %err, "channel done");
                return;
            }
        }
    }
}
