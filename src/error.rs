//! Error types for the session engine.

use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing sessions or processing messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Encrypt attempted without an established session for the remote device.
    ///
    /// Recoverable: fetch a prekey bundle, run the session builder, retry.
    #[error("no session for {0}")]
    NoSession(String),

    /// Public key has the wrong encoding or is not a usable curve point
    #[error("invalid key")]
    InvalidKey,

    /// Signed prekey signature does not verify against the identity key
    #[error("invalid signature")]
    InvalidSignature,

    /// Remote identity key conflicts with the pinned identity for this recipient
    #[error("untrusted identity for {0}")]
    UntrustedIdentity(String),

    /// Wire message declares a protocol version this engine does not speak
    #[error("unsupported message version {0}")]
    InvalidVersion(u8),

    /// Structurally malformed message, or a counter gap beyond the configured cap
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// Counter already consumed and no cached key remains for it.
    ///
    /// Callers should treat the message as already decrypted and discard it.
    #[error("duplicate message: chain index {chain_index}, counter {counter}")]
    DuplicateMessage {
        /// Current index of the receiving chain
        chain_index: u32,
        /// Counter carried by the rejected message
        counter: u32,
    },

    /// MAC verification failed
    #[error("bad MAC")]
    InvalidMac,

    /// PreKey message references a one-time prekey we no longer hold
    #[error("unknown prekey id {0}")]
    InvalidPreKeyId(u32),

    /// PreKey message references a signed prekey we no longer hold
    #[error("unknown signed prekey id {0}")]
    InvalidSignedPreKeyId(u32),

    /// Session state is missing required fields for the operation
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// Serialization failed
    #[error("serialization error")]
    Serialization,

    /// Deserialization failed
    #[error("deserialization error")]
    Deserialization,

    /// Store collaborator failed or a lock was poisoned
    #[error("storage error")]
    Storage,
}

impl From<bincode::error::EncodeError> for Error {
    fn from(_: bincode::error::EncodeError) -> Self {
        Error::Serialization
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(_: bincode::error::DecodeError) -> Self {
        Error::Deserialization
    }
}

impl From<prost::DecodeError> for Error {
    fn from(_: prost::DecodeError) -> Self {
        Error::InvalidMessage("protobuf decode failed")
    }
}
