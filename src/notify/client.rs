//! Client for pushing notifications into the host

use anyhow::{Context, Result};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use super::codec;
use super::protocol::{NotificationPayload, SenderAck};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a notification to the host and wait for its acknowledgement
///
/// # Arguments
/// * `socket_path` - Path to the host's sender socket
/// * `payload` - Title, message and priority; the host assigns id and timestamp
///
/// # Returns
/// The host's ack, or an error if the host could not be reached
pub fn send_notification(socket_path: &Path, payload: &NotificationPayload) -> Result<SenderAck> {
    let mut stream = UnixStream::connect(socket_path)
        .with_context(|| format!("Failed to connect to socket: {}", socket_path.display()))?;

    stream
        .set_write_timeout(Some(IO_TIMEOUT))
        .context("Failed to set write timeout")?;
    stream
        .set_read_timeout(Some(IO_TIMEOUT))
        .context("Failed to set read timeout")?;

    codec::write_message_blocking(&mut stream, payload).context("Failed to send notification")?;
    let ack = codec::read_message_blocking(&mut stream).context("Failed to read acknowledgement")?;
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::protocol::{NotificationId, Priority};
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    #[test]
    fn test_send_notification() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("host.sock");

        // Start a listener in a thread
        let listener = UnixListener::bind(&socket_path).unwrap();

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let payload: NotificationPayload = codec::read_message_blocking(&mut stream).unwrap();
            let ack = SenderAck::Ok {
                id: NotificationId::Number(7),
            };
            codec::write_message_blocking(&mut stream, &ack).unwrap();
            payload
        });

        let payload =
            NotificationPayload::new("Build Complete", "All tests passed", Priority::Success);
        let ack = send_notification(&socket_path, &payload).unwrap();
        assert_eq!(
            ack,
            SenderAck::Ok {
                id: NotificationId::Number(7)
            }
        );

        let received = handle.join().unwrap();
        assert_eq!(received.title.as_deref(), Some("Build Complete"));
        assert_eq!(received.priority, Priority::Success);
    }

    #[test]
    fn test_missing_host() {
        let dir = tempdir().unwrap();
        let result =
            send_notification(&dir.path().join("none.sock"), &NotificationPayload::default());
        assert!(result.is_err());
    }
}
