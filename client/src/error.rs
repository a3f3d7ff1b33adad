/// Error returned by most functions.
///
/// Errors that arise on the poll thread travel to the host side through the
/// same channel as successful replies and surface here as completion errors;
/// the host side never observes raw OS error codes from the native regime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The protocol context reported an error while the connection was being
    /// established, or the poll thread could not be started.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// `submit` on the protocol engine returned non-success; the command was
    /// never written to the socket.
    #[error("command submission failed: {0}")]
    SubmissionFailed(String),

    /// The server answered with the error reply variant.
    #[error("server error: {0}")]
    ReplyError(String),

    /// The reply callback was invoked without a reply. This happens when the
    /// connection drops while commands are still awaiting their replies.
    #[error("connection dropped before a reply arrived")]
    NullReply,

    /// The disconnect sentinel was received; every completion that was still
    /// pending at that moment fails with this.
    #[error("connection lost")]
    ConnectionLost,

    /// The client was closed, either before this operation started or while
    /// it was still in flight.
    #[error("client closed")]
    ClientClosed,

    /// A command requires at least one token.
    #[error("empty command")]
    EmptyCommand,

    /// `subscribe` was called with neither channels nor patterns.
    #[error("subscription requires at least one channel or pattern")]
    EmptySubscription,

    /// A typed wrapper received a reply shape it cannot interpret.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual:   &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for client operations.
///
/// This is defined as a convenience.
pub type Result<T> = std::result::Result<T, Error>;
