use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("connection disabled by explicit disconnect")]
    Disabled,

    #[error("broken pipe: {0}")]
    BrokenPipe(String),

    #[error("connection reset by peer: {0}")]
    ConnectionReset(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("connection timeout")]
    Timeout,
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        self.retry_delay(1).is_some()
    }

    /// Delay before the reconnect that follows failed send `attempt`
    /// (1-based), or `None` when this class of failure is not retried.
    ///
    /// Connection resets back off by `(attempt XOR 2) * 60 + 60` seconds,
    /// which yields 240, 60, 120 s for attempts 1, 2, 3.
    pub fn retry_delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            ConnectionError::BrokenPipe(_) | ConnectionError::TransportError(_) => {
                Some(Duration::from_secs(1))
            }
            ConnectionError::ConnectionReset(_) => {
                Some(Duration::from_secs(u64::from(attempt ^ 2) * 60 + 60))
            }
            ConnectionError::Disabled
            | ConnectionError::AuthenticationFailed(_)
            | ConnectionError::StreamError(_)
            | ConnectionError::Timeout => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::BrokenPipe => ConnectionError::BrokenPipe(error.to_string()),
            io::ErrorKind::ConnectionReset => ConnectionError::ConnectionReset(error.to_string()),
            io::ErrorKind::TimedOut => ConnectionError::Timeout,
            _ => ConnectionError::TransportError(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StanzaError {
    #[error("stanza parse failed: {0}")]
    ParseFailed(String),

    #[error("invalid JID: {0}")]
    InvalidJid(String),
}

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("not connected: pubsub association refused while explicitly disconnected")]
    NotConnected,

    #[error("no pubsub service configured")]
    NoPubSubService,

    #[error("pubsub service already set to {0}")]
    AlreadySet(String),

    #[error("unsubscribe from node {node} (subid {subid}) rejected by service")]
    IqRejected { node: String, subid: String },

    #[error("invalid JID: {0}")]
    InvalidJid(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[derive(Debug, Error)]
pub enum VCardError {
    #[error("vCard photo is not valid base64: {0}")]
    InvalidPhoto(#[from] base64::DecodeError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified_by_kind() {
        let pipe: ConnectionError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(pipe, ConnectionError::BrokenPipe(_)));

        let reset: ConnectionError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(matches!(reset, ConnectionError::ConnectionReset(_)));

        let other: ConnectionError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(other, ConnectionError::TransportError(_)));

        let timeout: ConnectionError = io::Error::from(io::ErrorKind::TimedOut).into();
        assert!(matches!(timeout, ConnectionError::Timeout));
    }

    #[test]
    fn broken_pipe_retries_after_one_second() {
        let error = ConnectionError::BrokenPipe("closed".to_string());
        for attempt in 1..=3 {
            assert_eq!(error.retry_delay(attempt), Some(Duration::from_secs(1)));
        }
    }

    #[test]
    fn connection_reset_backoff_uses_xor_formula() {
        let error = ConnectionError::ConnectionReset("reset".to_string());
        assert_eq!(error.retry_delay(1), Some(Duration::from_secs(240)));
        assert_eq!(error.retry_delay(2), Some(Duration::from_secs(60)));
        assert_eq!(error.retry_delay(3), Some(Duration::from_secs(120)));
    }

    #[test]
    fn non_transport_errors_are_not_retried() {
        assert!(!ConnectionError::Disabled.is_retryable());
        assert!(!ConnectionError::AuthenticationFailed("bad".to_string()).is_retryable());
        assert!(!ConnectionError::StreamError("conflict".to_string()).is_retryable());
        assert!(!ConnectionError::Timeout.is_retryable());
        assert!(ConnectionError::TransportError("eof".to_string()).is_retryable());
    }
}
