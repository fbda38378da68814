//! Per-module error enums (§7). Each is a plain semantic enum, not a wrapped `anyhow`/`thiserror`
//! tree, matching the `net::error`/`net::result` style: small, `Eq`-comparable, with a manual
//! `From<io::Error>` where a module touches the socket.
use std::fmt;
use std::io;

/// Rejections from the two-stage packet filter (§4.1). Always a silent drop, never surfaced past
/// a debug log line.
#[derive(Debug, Eq, PartialEq)]
pub enum FilterError {
    TooShort,
    UnknownType,
    Passthrough,
    PittleMismatch,
    ChonkleMismatch,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::TooShort => write!(f, "datagram shorter than the minimum filtered length"),
            FilterError::UnknownType => write!(f, "packet type byte is not a recognized type"),
            FilterError::Passthrough => write!(f, "packet is a passthrough sentinel, not filtered"),
            FilterError::PittleMismatch => write!(f, "pittle hash did not match"),
            FilterError::ChonkleMismatch => write!(f, "chonkle hash did not match under any known magic"),
        }
    }
}

impl std::error::Error for FilterError {}

/// Header codec / AEAD failures (§4.2).
#[derive(Debug, Eq, PartialEq)]
pub enum HeaderError {
    TooShort,
    UnknownType,
    AuthenticationFailed,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::TooShort => write!(f, "packet shorter than the fixed header size"),
            HeaderError::UnknownType => write!(f, "header type byte is not recognized"),
            HeaderError::AuthenticationFailed => {
                write!(f, "header did not authenticate under current, pending, or previous key")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

/// Replay-window rejects (§4.3). Always `TransientDrop`.
#[derive(Debug, Eq, PartialEq)]
pub enum ReplayError {
    AlreadyReceived,
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sequence already received or too old for the replay window")
    }
}

impl std::error::Error for ReplayError {}

/// Route state machine rejects (§4.6). `RouteAbort`: session continues direct, a flag bit is
/// queued for the next backend update.
#[derive(Debug, Eq, PartialEq)]
pub enum RouteError {
    UnknownSession,
    BadRouteToken,
    BadContinueToken,
    WrongSessionVersion,
    NoRouteToContinue,
    RouteExpired,
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::UnknownSession => write!(f, "no session matches the route/continue request"),
            RouteError::BadRouteToken => write!(f, "route token failed to decrypt or validate"),
            RouteError::BadContinueToken => write!(f, "continue token failed to decrypt or validate"),
            RouteError::WrongSessionVersion => write!(f, "continue request session version does not match current"),
            RouteError::NoRouteToContinue => write!(f, "continue request arrived with no current route"),
            RouteError::RouteExpired => write!(f, "route expiry timestamp has passed"),
        }
    }
}

impl std::error::Error for RouteError {}

/// Upgrade handshake rejects (§4.7). `HandshakeAbort`: pending entry is dropped, client falls
/// back to direct.
#[derive(Debug, Eq, PartialEq)]
pub enum HandshakeError {
    TokenExpired,
    TokenAddressMismatch,
    TokenAuthenticationFailed,
    KeyExchangeFailed,
    EchoMismatch,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::TokenExpired => write!(f, "upgrade token has expired"),
            HandshakeError::TokenAddressMismatch => write!(f, "upgrade token address does not match sender"),
            HandshakeError::TokenAuthenticationFailed => write!(f, "upgrade token failed to authenticate"),
            HandshakeError::KeyExchangeFailed => write!(f, "key exchange did not produce session keys"),
            HandshakeError::EchoMismatch => write!(f, "confirm did not echo the expected key exchange public key"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Endpoint-level errors: configuration and runtime failures (§7 `ConfigurationFatal` /
/// `RuntimeFatal`). These fail endpoint construction outright; no partial endpoint is returned.
#[derive(Debug)]
pub enum EndpointError {
    InvalidBindAddress(String),
    InvalidServerAddress(String),
    MissingBuyerKey,
    Socket(io::Error),
    Thread(io::Error),
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::InvalidBindAddress(s) => write!(f, "invalid bind address: {}", s),
            EndpointError::InvalidServerAddress(s) => write!(f, "invalid server address: {}", s),
            EndpointError::MissingBuyerKey => write!(f, "buyer private key is required outside local mode"),
            EndpointError::Socket(e) => write!(f, "socket creation failed: {}", e),
            EndpointError::Thread(e) => write!(f, "thread spawn failed: {}", e),
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EndpointError::Socket(e) | EndpointError::Thread(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EndpointError {
    fn from(e: io::Error) -> Self {
        EndpointError::Socket(e)
    }
}

pub type Result<T, E> = std::result::Result<T, E>;
