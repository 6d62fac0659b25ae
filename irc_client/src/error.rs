use thiserror::Error;

use irc_wire::MessageParseError;

/// Errors surfaced directly from `Client` API calls (`Result<_, ClientError>`), or as the cause
/// `Client::wait_for_stop` reports when the connection tears itself down.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Decode-time error for one inbound line. Non-terminal: the line is dropped and the
    /// connection continues.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] MessageParseError),

    /// EOF on read, EPIPE-class error on write, or idle watchdog timeout. Terminal.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// WELCOME (001) was not received within the registration timeout. Terminal.
    #[error("registration timed out waiting for 001 RPL_WELCOME")]
    RegistrationTimeout,

    /// A user-supplied handler callback returned an error. Caught and isolated from the
    /// scheduler; never propagates to the read loop.
    #[error("handler {handler} failed on message {message:?}: {source}")]
    HandlerError {
        handler: String,
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A dependency cycle was detected while building a message's handler DAG. The message is
    /// skipped entirely.
    #[error("dependency cycle detected among handlers: {0}")]
    DependencyCycle(String),

    /// A send was attempted after hand-off quiesce began.
    #[error("send rejected: hand-off in progress")]
    HandoffInProgress,

    /// Starting an already-stopped client, an empty channel name, an unknown mode in a
    /// user-list lookup, or a PREFIX parse failure.
    #[error("usage error: {0}")]
    UsageError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
