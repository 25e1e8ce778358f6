//! Archive of everything published under a subject, one line per message.

use chrono::{SecondsFormat, Utc};
use relay_middleware::Transport;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::LoggerError;

/// `<receive time> <subject> <payload>`
pub fn format_line(subject: &str, payload: &[u8]) -> String {
    format!(
        "{} {} {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        subject,
        String::from_utf8_lossy(payload)
    )
}

/// Subscribe to `subject` and append every message to `out` until shutdown.
/// Returns the number of lines written.
pub async fn run_logger<W>(
    transport: &dyn Transport,
    subject: &str,
    out: &mut W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, LoggerError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut subscription = transport.subscribe(subject).await?;
    info!(subject = %subject, "Logging messages");

    let mut written = 0u64;
    loop {
        if *shutdown.borrow() {
            break;
        }
        select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            msg = subscription.next() => {
                let msg = msg?;
                out.write_all(format_line(&msg.subject, &msg.payload).as_bytes()).await?;
                out.flush().await?;
                written += 1;
                debug!(subject = %msg.subject, "Logged message");
            }
        }
    }

    subscription.unsubscribe().await?;
    info!(lines = written, "Logger stopped");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use relay_middleware::InMemoryTransport;
    use std::sync::Arc;

    #[test]
    fn test_format_line() {
        let line = format_line("platform.HALO.location", br#"{"lat":13.1}"#);
        let parts: Vec<&str> = line.trim_end().splitn(3, ' ').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].ends_with('Z'));
        assert_eq!(parts[1], "platform.HALO.location");
        assert_eq!(parts[2], r#"{"lat":13.1}"#);
        assert!(line.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_logger_writes_retained_and_live_messages() {
        let transport = Arc::new(InMemoryTransport::new());
        transport
            .publish_retained("platform.RHB.location", Bytes::from(r#"{"lat":1.0}"#))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let logger_transport = transport.clone();
        let handle = tokio::spawn(async move {
            let mut out: Vec<u8> = Vec::new();
            let written = run_logger(logger_transport.as_ref(), "platform.>", &mut out, rx).await?;
            Ok::<_, LoggerError>((written, out))
        });

        // Let the logger subscribe before publishing live.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        transport
            .publish("platform.HALO.location", Bytes::from(r#"{"lat":2.0}"#))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let (written, out) = handle.await.unwrap().unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(written, 2);
        assert!(lines[0].contains(r#"platform.RHB.location {"lat":1.0}"#));
        assert!(lines[1].contains(r#"platform.HALO.location {"lat":2.0}"#));
    }
}
