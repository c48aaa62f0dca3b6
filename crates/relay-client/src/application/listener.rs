//! The client listener loop.
//!
//! Blocks on the next legacy frame and dispatches it to the display:
//!
//! | Frame                 | Action                                      |
//! |-----------------------|---------------------------------------------|
//! | `TextMessage`         | `show_message(sender, content)`, keep going |
//! | `ShutdownNotice`      | `show_shutdown()`, stop with exit code 0    |
//! | read / framing error  | `show_connection_lost(..)`, exit code 1     |
//! | anything else         | ignored                                     |
//!
//! A frame whose header is fine but whose payload is garbled is skipped, the
//! same way the server treats it.

use relay_core::protocol::{read_frame, FrameError, LegacyFrame};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

/// Where the listener sends what it receives.
pub trait ChatDisplay {
    fn show_message(&mut self, sender: &str, content: &str);
    fn show_shutdown(&mut self);
    fn show_connection_lost(&mut self, reason: &str);
}

/// Why the listener loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The server sent a ShutdownNotice.
    Shutdown,
    /// The connection failed or was closed.
    ConnectionLost(String),
}

impl ListenerExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            ListenerExit::Shutdown => 0,
            ListenerExit::ConnectionLost(_) => 1,
        }
    }
}

/// Runs until the server shuts down or the connection is lost.
pub async fn run_listener<R, D>(reader: &mut R, display: &mut D) -> ListenerExit
where
    R: AsyncRead + Unpin,
    D: ChatDisplay + ?Sized,
{
    loop {
        match read_frame(reader).await {
            Ok(LegacyFrame::TextMessage(text)) => display.show_message(&text.sender, &text.content),
            Ok(LegacyFrame::ShutdownNotice) => {
                display.show_shutdown();
                return ListenerExit::Shutdown;
            }
            Ok(other) => debug!("ignoring {} frame", other.name()),
            Err(e) if e.is_recoverable() => warn!("skipping unreadable frame: {e}"),
            Err(e) => {
                let reason = match e {
                    FrameError::Closed => "connection closed by server".to_string(),
                    other => other.to_string(),
                };
                display.show_connection_lost(&reason);
                return ListenerExit::ConnectionLost(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::protocol::{encode_frame, ConnectionResponse, TextMessage};
    use tokio_test::io::Builder;

    #[derive(Default)]
    struct RecordingDisplay {
        events: Vec<String>,
    }

    impl ChatDisplay for RecordingDisplay {
        fn show_message(&mut self, sender: &str, content: &str) {
            self.events.push(format!("{sender}> {content}"));
        }
        fn show_shutdown(&mut self) {
            self.events.push("shutdown".to_string());
        }
        fn show_connection_lost(&mut self, _reason: &str) {
            self.events.push("lost".to_string());
        }
    }

    fn text(sender: &str, content: &str) -> Vec<u8> {
        encode_frame(&LegacyFrame::TextMessage(TextMessage {
            session_id: "s".to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
            timestamp_us: 1,
        }))
        .expect("encode")
    }

    fn shutdown() -> Vec<u8> {
        encode_frame(&LegacyFrame::ShutdownNotice).expect("encode")
    }

    #[tokio::test]
    async fn test_messages_then_shutdown_exits_zero() {
        // Arrange
        let mut reader = Builder::new()
            .read(&text("Ana", "oi"))
            .read(&text("SERVER", "Other party disconnected"))
            .read(&shutdown())
            .build();
        let mut display = RecordingDisplay::default();

        // Act
        let exit = run_listener(&mut reader, &mut display).await;

        // Assert
        assert_eq!(exit, ListenerExit::Shutdown);
        assert_eq!(exit.exit_code(), 0);
        assert_eq!(
            display.events,
            vec!["Ana> oi", "SERVER> Other party disconnected", "shutdown"]
        );
    }

    #[tokio::test]
    async fn test_eof_is_connection_lost_with_exit_one() {
        let mut reader = Builder::new().read(&text("Ana", "oi")).build();
        let mut display = RecordingDisplay::default();

        let exit = run_listener(&mut reader, &mut display).await;

        assert!(matches!(exit, ListenerExit::ConnectionLost(_)));
        assert_eq!(exit.exit_code(), 1);
        assert_eq!(display.events, vec!["Ana> oi", "lost"]);
    }

    #[tokio::test]
    async fn test_read_error_is_connection_lost() {
        let mut reader = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut display = RecordingDisplay::default();

        let exit = run_listener(&mut reader, &mut display).await;

        assert_eq!(exit.exit_code(), 1);
        assert_eq!(display.events, vec!["lost"]);
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_skipped() {
        // Arrange: a valid header with frame type 0x7F and an empty payload
        let unknown = [0x01, 0x7F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut reader = Builder::new()
            .read(&unknown)
            .read(&text("Bia", "still here"))
            .read(&shutdown())
            .build();
        let mut display = RecordingDisplay::default();

        // Act
        let exit = run_listener(&mut reader, &mut display).await;

        // Assert
        assert_eq!(exit, ListenerExit::Shutdown);
        assert_eq!(display.events, vec!["Bia> still here", "shutdown"]);
    }

    #[tokio::test]
    async fn test_non_text_frames_are_ignored() {
        let response = encode_frame(&LegacyFrame::ConnectionResponse(
            ConnectionResponse::rejected("late"),
        ))
        .expect("encode");
        let mut reader = Builder::new().read(&response).read(&shutdown()).build();
        let mut display = RecordingDisplay::default();

        let exit = run_listener(&mut reader, &mut display).await;

        assert_eq!(exit, ListenerExit::Shutdown);
        assert_eq!(display.events, vec!["shutdown"]);
    }

    #[tokio::test]
    async fn test_bad_version_ends_the_loop() {
        let bad_header = [0x09, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut reader = Builder::new().read(&bad_header).build();
        let mut display = RecordingDisplay::default();

        let exit = run_listener(&mut reader, &mut display).await;

        assert_eq!(exit.exit_code(), 1);
        assert_eq!(display.events, vec!["lost"]);
    }
}
