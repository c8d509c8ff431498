//! Minimal echo server: accepts one peer and echoes every message back on
//! the channel it arrived on.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --features cli -- send ws://127.0.0.1:9000 --data hello --wait

use std::sync::Arc;

use wsmux::peer::{PeerError, PeerListener};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::var("WSMUX_ECHO_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());
    let listener = PeerListener::bind(&addr).await?;
    eprintln!("Listening on {}", listener.url());

    let peer = Arc::new(listener.accept().await?);
    eprintln!("Peer connected: {}", peer.id());

    while let Ok(channel) = peer.accept_channel().await {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move {
            loop {
                match peer.receive(channel).await {
                    Ok(message) => {
                        eprintln!("Received {} bytes on channel {channel}", message.len());
                        if peer.send(channel, message).await.is_err() {
                            break;
                        }
                    }
                    Err(PeerError::ChannelClosed(_)) => {
                        let _ = peer.close_channel(channel).await;
                        break;
                    }
                    Err(_) => break,
                }
            }
        });
    }

    eprintln!("Peer disconnected");
    Ok(())
}
