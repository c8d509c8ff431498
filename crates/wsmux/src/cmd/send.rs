use std::fs;
use std::time::Duration;

use bytes::Bytes;
use wsmux_frame::UniqueId;
use wsmux_peer::{connect_with_config, ChannelMultiplexer, PeerError};

use crate::cmd::SendArgs;
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let peer = connect_with_config(&args.url, args.limits.config())
        .await
        .map_err(|err| peer_error("connect failed", err))?;

    let channel = peer
        .open_channel()
        .await
        .map_err(|err| peer_error("open channel failed", err))?;
    peer.send(channel, payload)
        .await
        .map_err(|err| peer_error("send failed", err))?;

    if args.wait {
        let reply = wait_for_response(&peer, channel, wait_timeout).await?;
        print_message(&reply, channel, peer.id(), format);
    }

    peer.close_channel(channel)
        .await
        .map_err(|err| peer_error("close channel failed", err))?;
    peer.disconnect()
        .await
        .map_err(|err| peer_error("disconnect failed", err))?;

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path).map(Bytes::from).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Bytes::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

trait ResponseReceiver {
    async fn receive_on(&self, channel: UniqueId) -> Result<Bytes, PeerError>;
}

impl ResponseReceiver for ChannelMultiplexer {
    async fn receive_on(&self, channel: UniqueId) -> Result<Bytes, PeerError> {
        self.receive(channel).await
    }
}

async fn wait_for_response<R: ResponseReceiver>(
    receiver: &R,
    channel: UniqueId,
    wait: Duration,
) -> CliResult<Bytes> {
    match tokio::time::timeout(wait, receiver.receive_on(channel)).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(err)) => Err(peer_error("receive failed", err)),
        Err(_) => Err(CliError::new(
            TIMEOUT,
            format!("no reply on channel {channel} within {wait:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentReceiver;

    impl ResponseReceiver for SilentReceiver {
        async fn receive_on(&self, _channel: UniqueId) -> Result<Bytes, PeerError> {
            std::future::pending().await
        }
    }

    struct ClosedReceiver;

    impl ResponseReceiver for ClosedReceiver {
        async fn receive_on(&self, channel: UniqueId) -> Result<Bytes, PeerError> {
            Err(PeerError::ChannelClosed(channel))
        }
    }

    #[tokio::test]
    async fn wait_for_response_times_out() {
        let err = wait_for_response(&SilentReceiver, UniqueId::generate(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.code, TIMEOUT);
    }

    #[tokio::test]
    async fn wait_for_response_reports_closed_channel() {
        let err = wait_for_response(&ClosedReceiver, UniqueId::generate(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::exit::FAILURE);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }
}
