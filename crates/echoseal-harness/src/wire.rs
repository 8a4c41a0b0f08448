//! Loopback wire format.
//!
//! Each message is a single frame: a 4-byte big-endian length followed by a
//! CBOR-encoded envelope. Application payloads travel as [`SealedPayload`]s,
//! signed under the sender's preshared integrity key and optionally
//! encrypted under its preshared encryption key.
//!
//! # Security
//!
//! - Size Validation First: the length prefix is checked against
//!   [`MAX_FRAME_SIZE`] before the body is read or parsed.
//! - The signature covers the sender identity, so a payload replayed under
//!   another sender name fails verification.

use echoseal_core::{ControlError, ErrorHeader};
use echoseal_crypto::{CiphertextEnvelope, CryptoContext, CryptoError, NONCE_SIZE};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encoded envelope size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Payload bytes as they travel on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadBody {
    /// Integrity protected only
    Plain(Vec<u8>),
    /// Encrypted and integrity protected
    Encrypted(CiphertextEnvelope),
}

impl PayloadBody {
    fn signed_bytes(&self) -> &[u8] {
        match self {
            Self::Plain(bytes) => bytes,
            Self::Encrypted(envelope) => &envelope.ciphertext,
        }
    }
}

/// Signed, optionally encrypted application payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// Payload body
    pub body: PayloadBody,
    /// HMAC over the sender identity and body
    pub signature: Vec<u8>,
}

/// Error header as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireErrorHeader {
    /// Response code
    pub code: u32,
    /// Implementation-specific code
    pub internal_code: i32,
    /// Human-readable message
    pub message: String,
}

impl From<&ErrorHeader> for WireErrorHeader {
    fn from(header: &ErrorHeader) -> Self {
        Self {
            code: header.code,
            internal_code: header.internal_code,
            message: header.message.clone(),
        }
    }
}

impl From<WireErrorHeader> for ErrorHeader {
    fn from(header: WireErrorHeader) -> Self {
        Self::new(header.code, header.internal_code, header.message)
    }
}

/// Service token encrypted under a service-scoped crypto context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireServiceToken {
    /// Token name
    pub name: String,
    /// Encrypted token data
    pub envelope: CiphertextEnvelope,
}

/// Request sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Claimed sender identity
    pub sender: String,
    /// Authenticated user, if any
    pub user: Option<String>,
    /// Present when the request is an error message
    pub error: Option<WireErrorHeader>,
    /// Attached service tokens
    pub service_tokens: Vec<WireServiceToken>,
    /// Application payload, absent on error messages
    pub payload: Option<SealedPayload>,
}

/// Response sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Responding entity
    pub sender: String,
    /// Entity the response is addressed to
    pub recipient: String,
    /// Echoed payload, sealed under the recipient's preshared keys
    pub payload: SealedPayload,
}

fn signing_input(sender: &str, body: &PayloadBody) -> Vec<u8> {
    let bytes = body.signed_bytes();
    let mut input = Vec::with_capacity(sender.len() + 1 + bytes.len());
    input.extend_from_slice(sender.as_bytes());
    input.push(0);
    input.extend_from_slice(bytes);
    input
}

/// Sign `payload` as coming from `sender`, encrypting it when `nonce` is
/// given.
///
/// # Errors
///
/// - `CryptoError::EncryptFailed` if encryption fails
pub fn seal_payload(
    context: &dyn CryptoContext,
    sender: &str,
    payload: &[u8],
    nonce: Option<[u8; NONCE_SIZE]>,
) -> Result<SealedPayload, CryptoError> {
    let body = match nonce {
        Some(nonce) => PayloadBody::Encrypted(context.encrypt(payload, nonce)?),
        None => PayloadBody::Plain(payload.to_vec()),
    };
    let signature = context.sign(&signing_input(sender, &body))?;
    Ok(SealedPayload { body, signature })
}

/// Verify and, if needed, decrypt a payload sealed by `sender`.
///
/// # Errors
///
/// - `CryptoError::SignatureMismatch` if the signature does not verify
/// - `CryptoError::DecryptFailed` or `KeysetMismatch` if decryption fails
pub fn open_payload(
    context: &dyn CryptoContext,
    sender: &str,
    sealed: &SealedPayload,
) -> Result<Vec<u8>, CryptoError> {
    context.verify(&signing_input(sender, &sealed.body), &sealed.signature)?;
    match &sealed.body {
        PayloadBody::Plain(bytes) => Ok(bytes.clone()),
        PayloadBody::Encrypted(envelope) => context.decrypt(envelope),
    }
}

/// Encode an envelope to its CBOR body (without length prefix).
///
/// # Errors
///
/// - `ControlError::Encoding` if serialization fails or the result exceeds
///   [`MAX_FRAME_SIZE`]
pub fn encode<T: Serialize>(envelope: &T) -> Result<Vec<u8>, ControlError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(envelope, &mut body)
        .map_err(|e| ControlError::Encoding(e.to_string()))?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ControlError::Encoding(format!(
            "frame of {} bytes exceeds maximum {MAX_FRAME_SIZE}",
            body.len()
        )));
    }
    Ok(body)
}

/// Decode an envelope from its CBOR body.
///
/// # Errors
///
/// - `ControlError::Encoding` if the body is oversized or malformed
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ControlError> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(ControlError::Encoding(format!(
            "frame of {} bytes exceeds maximum {MAX_FRAME_SIZE}",
            body.len()
        )));
    }
    ciborium::de::from_reader(body).map_err(|e| ControlError::Encoding(e.to_string()))
}

/// Write one length-prefixed frame and flush.
///
/// # Errors
///
/// - `ControlError::Encoding` if the envelope cannot be encoded
/// - `ControlError::Io` if the write fails
pub async fn write_frame<W, T>(output: &mut W, envelope: &T) -> Result<(), ControlError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(envelope)?;
    let len = u32::try_from(body.len())
        .map_err(|_| ControlError::Encoding("frame length overflows u32".to_string()))?;
    output.write_all(&len.to_be_bytes()).await?;
    output.write_all(&body).await?;
    output.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `None` when the stream ends cleanly before a frame starts.
///
/// # Errors
///
/// - `ControlError::Io` if the stream ends mid-frame or the read fails
/// - `ControlError::Encoding` if the frame is oversized or malformed
pub async fn read_frame<R, T>(input: &mut R) -> Result<Option<T>, ControlError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = input.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ControlError::Io("stream ended inside frame length".to_string()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ControlError::Encoding(format!(
            "frame of {len} bytes exceeds maximum {MAX_FRAME_SIZE}"
        )));
    }

    let mut body = vec![0u8; len];
    input.read_exact(&mut body).await?;
    decode(&body).map(Some)
}
