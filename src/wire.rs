use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::observability;
use crate::protocol::{self, ProtocolError, Reply, ServiceDefaults};

/// Serve one client: newline-delimited JSON requests in, one JSON reply
/// line per request out, until the peer closes.
pub async fn process_connection<S>(socket: S, defaults: Arc<ServiceDefaults>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let codec = LinesCodec::new_with_max_length(defaults.max_line_bytes);
    let mut framed = Framed::new(socket, codec);

    while let Some(frame) = framed.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let err = ProtocolError::TooLong(defaults.max_line_bytes);
                warn!("{err}");
                metrics::counter!(observability::REQUESTS_TOTAL, "command" => "unknown", "status" => "error")
                    .increment(1);
                send(&mut framed, Reply::error(&err)).await?;
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()));
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&line, &defaults).await;
        send(&mut framed, reply).await?;
    }
    Ok(())
}

async fn send<S>(framed: &mut Framed<S, LinesCodec>, reply: Reply) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(reply.to_line()).await.map_err(|e| match e {
        LinesCodecError::Io(e) => e,
        other => std::io::Error::other(other.to_string()),
    })
}

/// Parse and execute one request line. Calendar passes are CPU-bound and
/// run on the blocking pool.
pub async fn handle_line(line: &str, defaults: &Arc<ServiceDefaults>) -> Reply {
    let started = Instant::now();
    let cmd = match protocol::parse_request(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!("rejected request: {e}");
            metrics::counter!(observability::REQUESTS_TOTAL, "command" => "unknown", "status" => "error")
                .increment(1);
            return Reply::error(&e);
        }
    };
    let label = observability::command_label(&cmd);

    let shared = defaults.clone();
    let outcome = tokio::task::spawn_blocking(move || protocol::execute(cmd, &shared))
        .await
        .unwrap_or_else(|e| Err(ProtocolError::Encode(format!("worker failed: {e}"))));

    let status = if outcome.is_ok() { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "command" => label, "status" => status)
        .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "command" => label)
        .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => Reply::ok(result),
        Err(e) => {
            debug!(command = label, "request failed: {e}");
            Reply::error(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn defaults() -> Arc<ServiceDefaults> {
        Arc::new(ServiceDefaults::default())
    }

    #[tokio::test]
    async fn ping_pong() {
        let mock = Builder::new()
            .read(b"{\"op\":\"ping\"}\n")
            .write(b"{\"ok\":true,\"result\":\"pong\"}\n")
            .build();
        process_connection(mock, defaults()).await.unwrap();
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let mock = Builder::new()
            .read(b"\n  \n{\"op\":\"ping\"}\n")
            .write(b"{\"ok\":true,\"result\":\"pong\"}\n")
            .build();
        process_connection(mock, defaults()).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_op_is_an_error_reply() {
        let reply = handle_line(r#"{"op":"nope"}"#, &defaults()).await;
        assert!(!reply.ok);
        let msg = reply.error.unwrap();
        assert!(msg.starts_with("parse error: unknown variant `nope`"), "{msg}");
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let small = Arc::new(ServiceDefaults {
            max_line_bytes: 16,
            ..ServiceDefaults::default()
        });
        let mock = Builder::new()
            .read(b"{\"op\":\"ping\",\"padding\":\"xxxxxxxxxxxxxxxx\"}\n")
            .write(b"{\"ok\":false,\"error\":\"request line exceeds 16 bytes\"}\n")
            .build();
        let err = process_connection(mock, small).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn calendar_error_reply() {
        let reply = handle_line(
            r#"{"op":"calendar","granularity_minutes":0,"bookings":[]}"#,
            &defaults(),
        )
        .await;
        assert!(!reply.ok);
        assert!(reply.result.is_none());
        assert!(reply.error.is_some());
    }
}
