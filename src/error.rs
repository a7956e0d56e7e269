use crate::{connection_status::LifecyclePhase, hooks::Phase};
use amq_protocol::protocol::AMQPError;
use std::{error, fmt, io, sync::Arc};

/// A std Result with a lapin_reconnect::Error error type
pub type Result<T> = std::result::Result<T, Error>;

/// The type of error that can be returned in this crate.
///
/// Even though we expose the complete enumeration of possible error variants, it is not
/// considered stable to exhaustively match on this enumeration: do it at your own risk.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    ChannelUnavailable,
    NoDefaultRuntime,
    NoDefaultTransport,
    NotConnected,
    Shutdown,

    Authentication(String),
    ConflictingDeclaration(String),
    HookCallback(Phase, String),
    InvalidState(LifecyclePhase),
    InvalidUri(String),
    ListenerCallback { queue: String, reason: String },
    MissingReplacement { name: String, key: String },
    OutboxFull(usize),
    SchemaNotFound(String),

    ProtocolError(AMQPError),
    TransportError(Arc<io::Error>),
}

impl Error {
    /// Whether the reconnect loop should keep trying after this error.
    ///
    /// Transport failures, rejected credentials and broker-initiated protocol errors are all
    /// worth another attempt; configuration and programming errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_) | Error::ProtocolError(_) | Error::TransportError(_)
        )
    }

    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::TransportError(_))
    }

    pub fn is_authentication_error(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }

    pub(crate) fn connection_closed(reason: &str) -> Self {
        io::Error::new(io::ErrorKind::ConnectionAborted, reason.to_owned()).into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChannelUnavailable => write!(f, "no open channel is available yet"),
            Error::NoDefaultRuntime => write!(
                f,
                "no runtime was configured and the default-runtime feature is disabled"
            ),
            Error::NoDefaultTransport => write!(
                f,
                "no transport was configured and the lapin feature is disabled"
            ),
            Error::NotConnected => write!(f, "not connected to the broker"),
            Error::Shutdown => write!(f, "the connection factory was shut down"),

            Error::Authentication(reason) => write!(f, "authentication failed: {}", reason),
            Error::ConflictingDeclaration(reason) => {
                write!(f, "declaration conflicts with the broker: {}", reason)
            }
            Error::HookCallback(phase, reason) => {
                write!(f, "{} callback failed: {}", phase, reason)
            }
            Error::InvalidState(phase) => write!(f, "invalid lifecycle phase: {:?}", phase),
            Error::InvalidUri(reason) => write!(f, "invalid AMQP uri: {}", reason),
            Error::ListenerCallback { queue, reason } => {
                write!(f, "listener on '{}' failed: {}", queue, reason)
            }
            Error::MissingReplacement { name, key } => {
                write!(f, "no replacement given for '{{{}}}' in '{}'", key, name)
            }
            Error::OutboxFull(capacity) => write!(
                f,
                "{} messages are already waiting for the connection",
                capacity
            ),
            Error::SchemaNotFound(name) => write!(f, "no schema entry for '{}'", name),

            Error::ProtocolError(e) => write!(f, "protocol error: {}", e),
            Error::TransportError(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::ProtocolError(e) => Some(e),
            Error::TransportError(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        Error::TransportError(Arc::new(other))
    }
}

impl From<AMQPError> for Error {
    fn from(other: AMQPError) -> Self {
        match other.get_id() {
            403 => Error::Authentication(other.get_message().as_str().to_owned()),
            406 => Error::ConflictingDeclaration(other.get_message().as_str().to_owned()),
            _ => Error::ProtocolError(other),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;

        match (self, other) {
            (ChannelUnavailable, ChannelUnavailable) => true,
            (NoDefaultRuntime, NoDefaultRuntime) => true,
            (NoDefaultTransport, NoDefaultTransport) => true,
            (NotConnected, NotConnected) => true,
            (Shutdown, Shutdown) => true,

            (Authentication(left), Authentication(right)) => left == right,
            (ConflictingDeclaration(left), ConflictingDeclaration(right)) => left == right,
            (HookCallback(left_phase, left), HookCallback(right_phase, right)) => {
                left_phase == right_phase && left == right
            }
            (InvalidState(left), InvalidState(right)) => left == right,
            (InvalidUri(left), InvalidUri(right)) => left == right,
            (
                ListenerCallback { queue, reason },
                ListenerCallback {
                    queue: other_queue,
                    reason: other_reason,
                },
            ) => queue == other_queue && reason == other_reason,
            (
                MissingReplacement { name, key },
                MissingReplacement {
                    name: other_name,
                    key: other_key,
                },
            ) => name == other_name && key == other_key,
            (OutboxFull(left), OutboxFull(right)) => left == right,
            (SchemaNotFound(left), SchemaNotFound(right)) => left == right,

            (ProtocolError(left), ProtocolError(right)) => left == right,
            // io::Error has no equality, the kind is the best we can do
            (TransportError(left), TransportError(right)) => left.kind() == right.kind(),

            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        let refused: Error = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert!(refused.is_retryable());
        assert!(refused.is_transport_error());
        assert!(Error::Authentication("ACCESS_REFUSED".into()).is_retryable());
        assert!(!Error::ChannelUnavailable.is_retryable());
        assert!(!Error::SchemaNotFound("$Missing".into()).is_retryable());
        assert!(!Error::ConflictingDeclaration("durable".into()).is_retryable());
        assert!(!Error::Shutdown.is_retryable());
    }

    #[test]
    fn transport_errors_compare_by_kind() {
        let left: Error = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        let right: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "nope").into();
        let reset: Error = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(left, right);
        assert_ne!(left, reset);
    }

    #[test]
    fn display_missing_replacement() {
        let err = Error::MissingReplacement {
            name: "events.{tenant}".into(),
            key: "tenant".into(),
        };
        assert_eq!(
            err.to_string(),
            "no replacement given for '{tenant}' in 'events.{tenant}'"
        );
    }
}
