//! Multi-channel example: one connection, several concurrent channels, one
//! of them carrying a message large enough to be chunked.
//!
//! Run with:
//!   cargo run --example multi-channel --features peer

use bytes::Bytes;
use wsmux::peer::{connect, PeerListener};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = PeerListener::bind("127.0.0.1:0").await?;
    let url = listener.url();

    let server = tokio::spawn(async move {
        let peer = listener.accept().await?;
        eprintln!("[server] peer connected: {}", peer.id());

        for _ in 0..2 {
            let channel = peer.accept_channel().await?;
            let message = peer.receive(channel).await?;
            eprintln!(
                "[server] channel {channel}: {} bytes",
                message.len()
            );
            peer.send(channel, Bytes::from(format!("got {} bytes", message.len())))
                .await?;
        }
        Ok::<_, wsmux::peer::PeerError>(peer)
    });

    let client = connect(&url).await?;
    let small = client.open_channel().await?;
    let large = client.open_channel().await?;

    let (a, b) = tokio::join!(
        client.send(small, Bytes::from_static(b"{\"action\":\"ping\"}")),
        client.send(large, vec![0x42u8; 1_000_000]),
    );
    a?;
    b?;

    let (reply_small, reply_large) = tokio::join!(client.receive(small), client.receive(large));
    eprintln!("[client] small: {}", String::from_utf8_lossy(&reply_small?));
    eprintln!("[client] large: {}", String::from_utf8_lossy(&reply_large?));

    client.disconnect().await?;
    let _peer = server.await??;
    Ok(())
}
