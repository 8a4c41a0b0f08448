//! Inbound message model.
//!
//! An [`InboundMessage`] is produced by the facade for one receive and
//! consumed immediately by the orchestrator. The payload is exposed as an
//! async byte stream; everything else is metadata the engine has already
//! authenticated.

use std::fmt;

use echoseal_crypto::CryptoError;
use tokio::io::AsyncRead;

/// Character encoding used for payload text on both ends of an exchange.
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Response codes an error header can carry.
///
/// These tell the remote entity how to recover (retry, re-authenticate,
/// re-key). Codes outside this list are preserved numerically in
/// [`ErrorHeader::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// Permanent failure
    Fail,
    /// Transient failure, retry later
    TransientFailure,
    /// Entity must re-authenticate
    EntityReauth,
    /// User must re-authenticate
    UserReauth,
    /// Key exchange is required
    KeyxRequired,
    /// Entity authentication data must be renewed
    EntityDataReauth,
    /// User authentication data must be renewed
    UserDataReauth,
    /// Message expired
    Expired,
    /// Message was replayed
    Replayed,
    /// Single sign-on token rejected
    SsoTokenRejected,
}

impl ResponseCode {
    /// Classify a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        let rc = match code {
            1 => Self::Fail,
            2 => Self::TransientFailure,
            3 => Self::EntityReauth,
            4 => Self::UserReauth,
            5 => Self::KeyxRequired,
            6 => Self::EntityDataReauth,
            7 => Self::UserDataReauth,
            8 => Self::Expired,
            9 => Self::Replayed,
            10 => Self::SsoTokenRejected,
            _ => return None,
        };
        Some(rc)
    }

    /// Wire value of this code.
    pub fn code(self) -> u32 {
        match self {
            Self::Fail => 1,
            Self::TransientFailure => 2,
            Self::EntityReauth => 3,
            Self::UserReauth => 4,
            Self::KeyxRequired => 5,
            Self::EntityDataReauth => 6,
            Self::UserDataReauth => 7,
            Self::Expired => 8,
            Self::Replayed => 9,
            Self::SsoTokenRejected => 10,
        }
    }
}

/// Error header carried by a message instead of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHeader {
    /// Response code sent to the remote entity
    pub code: u32,
    /// Implementation-specific internal code
    pub internal_code: i32,
    /// Developer-consumable error text
    pub message: String,
}

impl ErrorHeader {
    /// Create an error header.
    pub fn new(code: u32, internal_code: i32, message: impl Into<String>) -> Self {
        Self { code, internal_code, message: message.into() }
    }

    /// Known response code, if the wire code is recognised.
    pub fn response_code(&self) -> Option<ResponseCode> {
        ResponseCode::from_code(self.code)
    }
}

impl fmt::Display for ErrorHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}][{}]", self.code, self.internal_code, self.message)
    }
}

/// User authenticated alongside the sending entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    /// Stable user identifier
    pub id: String,
}

impl User {
    /// Create a user.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Service-scoped data recovered from an inbound message.
///
/// The engine decrypts and verifies service tokens with the crypto contexts
/// supplied by the receive message context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceToken {
    /// Token name
    pub name: String,
    /// Decrypted token data
    pub data: Vec<u8>,
}

/// A received message.
///
/// Reading the message yields the application payload. The payload is only
/// meaningful when [`error_header`](Self::error_header) is `None`.
pub trait InboundMessage: AsyncRead + Unpin + Send + Sync {
    /// Error header, if the peer sent an error instead of a request.
    fn error_header(&self) -> Option<&ErrorHeader>;

    /// Entity-authenticated identity of the sender.
    ///
    /// # Errors
    ///
    /// Returns a `CryptoError` if the engine cannot recover the identity
    /// (e.g. the entity's credentials fail to decrypt or verify).
    fn identity(&self) -> Result<String, CryptoError>;

    /// User authenticated with the message, if any.
    fn user(&self) -> Option<&User>;

    /// Service tokens the engine could decrypt.
    fn service_tokens(&self) -> &[ServiceToken] {
        &[]
    }
}
