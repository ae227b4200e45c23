use std::io;
use std::net;

use thiserror::Error;

use crate::endpoint::{Role, State};

/// Result type alias for endpoint operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a datagram [`Channel`](crate::socket::Channel).
///
/// `Timeout` is part of the normal contract: it is how a bounded wait reports that nothing arrived
/// before the deadline.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("timed out waiting for a datagram")]
    Timeout,

    #[error("channel is closed")]
    Closed,

    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned to the application by an [`Endpoint`](crate::Endpoint).
#[derive(Error, Debug)]
pub enum Error {
    #[error("endpoint is {actual:?}, operation requires {expected:?}")]
    InvalidState { expected: State, actual: State },

    #[error("{operation} is not available to the {role:?}")]
    WrongRole { operation: &'static str, role: Role },

    #[error("no handshake reply from {0} before the handshake timeout")]
    HandshakeTimeout(net::SocketAddr),

    #[error("connection to {addr} failed after {retries} unanswered retransmissions")]
    ConnectionFailed { addr: net::SocketAddr, retries: u32 },

    #[error("nothing heard from {0} before the peer timeout")]
    PeerTimeout(net::SocketAddr),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Channel(ChannelError::Io(err))
    }
}
