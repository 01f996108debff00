//! Wire messages.
//!
//! ## Whisper message
//!
//! ```text
//! ┌─────────┬──────────────────────────────┬───────────┐
//! │ version │ protobuf body                │ MAC       │
//! │ 1 byte  │ ratchet key, counter,        │ truncated │
//! │         │ previous counter, ciphertext │ (8 bytes) │
//! └─────────┴──────────────────────────────┴───────────┘
//! ```
//!
//! The version byte carries the session version in the high nibble and
//! [`CURRENT_VERSION`] in the low nibble. The MAC covers
//! `sender identity || receiver identity || version || body`.
//!
//! ## PreKey whisper message
//!
//! `version || protobuf body`, where the body carries the registration id,
//! prekey ids, base key and identity key plus the complete serialized
//! Whisper message. It has no MAC of its own.

use crate::config::{CURRENT_VERSION, MAX_MAC_LENGTH, MIN_MAC_LENGTH, MIN_SUPPORTED_VERSION};
use crate::crypto::{hmac_sha256, mac_matches};
use crate::error::{Error, Result};
use crate::keys::{KEY_SIZE_32, PublicKey};
use prost::Message;

/// Envelope discriminant supplied by the outer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CiphertextMessageType {
    /// Plain ratchet message
    Whisper = 2,
    /// Ratchet message wrapped with session setup data
    PreKey = 3,
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::Whisper),
            3 => Ok(Self::PreKey),
            _ => Err(Error::InvalidMessage("unknown message type")),
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct WhisperMessageProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    ratchet_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    counter: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    previous_counter: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    ciphertext: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
struct PreKeyWhisperMessageProto {
    #[prost(uint32, optional, tag = "1")]
    pre_key_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    base_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    identity_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    message: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    registration_id: Option<u32>,
    #[prost(uint32, optional, tag = "6")]
    signed_pre_key_id: Option<u32>,
}

fn version_byte(message_version: u8) -> u8 {
    (message_version << 4) | CURRENT_VERSION
}

fn check_mac_length(mac_length: usize) -> Result<()> {
    if !(MIN_MAC_LENGTH..=MAX_MAC_LENGTH).contains(&mac_length) {
        return Err(Error::InvalidMessage("MAC length out of range"));
    }
    Ok(())
}

fn check_version(byte: u8) -> Result<u8> {
    let version = byte >> 4;
    if !(MIN_SUPPORTED_VERSION..=CURRENT_VERSION).contains(&version) {
        return Err(Error::InvalidVersion(version));
    }
    Ok(version)
}

/// Ratchet message carrying one encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhisperMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    mac_length: usize,
    serialized: Vec<u8>,
}

impl WhisperMessage {
    /// Builds and MACs a message. `mac_length` must be within
    /// [`MIN_MAC_LENGTH`]`..=`[`MAX_MAC_LENGTH`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_version: u8,
        mac_key: &[u8; KEY_SIZE_32],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &PublicKey,
        receiver_identity: &PublicKey,
        mac_length: usize,
    ) -> Result<Self> {
        check_mac_length(mac_length)?;
        let body = WhisperMessageProto {
            ratchet_key: Some(sender_ratchet_key.serialize().to_vec()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.clone()),
        };

        let mut serialized = Vec::with_capacity(1 + body.encoded_len() + mac_length);
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&body.encode_to_vec());

        let mac = compute_mac(mac_key, sender_identity, receiver_identity, &serialized);
        serialized.extend_from_slice(&mac[..mac_length]);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            mac_length,
            serialized,
        })
    }

    /// Parses a serialized message whose trailing MAC is `mac_length` bytes.
    ///
    /// Checks structure and version only; the MAC is verified separately once
    /// the message keys are known.
    pub fn parse(bytes: &[u8], mac_length: usize) -> Result<Self> {
        check_mac_length(mac_length)?;
        if bytes.len() < 1 + mac_length {
            return Err(Error::InvalidMessage("message too short"));
        }
        let message_version = check_version(bytes[0])?;

        let body = WhisperMessageProto::decode(&bytes[1..bytes.len() - mac_length])?;
        let (Some(ratchet_key), Some(counter), Some(ciphertext)) =
            (body.ratchet_key, body.counter, body.ciphertext)
        else {
            return Err(Error::InvalidMessage("incomplete message"));
        };
        let sender_ratchet_key = PublicKey::deserialize(&ratchet_key)?;

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter: body.previous_counter.unwrap_or(0),
            ciphertext,
            mac_length,
            serialized: bytes.to_vec(),
        })
    }

    /// Recomputes the MAC and compares it in constant time.
    #[must_use]
    pub fn verify_mac(
        &self,
        sender_identity: &PublicKey,
        receiver_identity: &PublicKey,
        mac_key: &[u8; KEY_SIZE_32],
    ) -> bool {
        let (content, their_mac) = self
            .serialized
            .split_at(self.serialized.len() - self.mac_length);
        let our_mac = compute_mac(mac_key, sender_identity, receiver_identity, content);
        mac_matches(&our_mac[..self.mac_length], their_mac)
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    #[must_use]
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Length of the trailing MAC this message was built or parsed with
    #[must_use]
    pub fn mac_length(&self) -> usize {
        self.mac_length
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Wire bytes, MAC included
    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

fn compute_mac(
    mac_key: &[u8; KEY_SIZE_32],
    sender_identity: &PublicKey,
    receiver_identity: &PublicKey,
    content: &[u8],
) -> [u8; KEY_SIZE_32] {
    hmac_sha256(
        mac_key,
        &[
            &sender_identity.serialize(),
            &receiver_identity.serialize(),
            content,
        ],
    )
}

/// First message(s) of a session: a [`WhisperMessage`] plus what the
/// responder needs to build the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyWhisperMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: PublicKey,
    identity_key: PublicKey,
    message: WhisperMessage,
    serialized: Vec<u8>,
}

impl PreKeyWhisperMessage {
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
        identity_key: PublicKey,
        message: WhisperMessage,
    ) -> Self {
        let body = PreKeyWhisperMessageProto {
            pre_key_id,
            base_key: Some(base_key.serialize().to_vec()),
            identity_key: Some(identity_key.serialize().to_vec()),
            message: Some(message.serialized().to_vec()),
            registration_id: Some(registration_id),
            signed_pre_key_id: Some(signed_pre_key_id),
        };

        let mut serialized = Vec::with_capacity(1 + body.encoded_len());
        serialized.push(version_byte(message_version));
        serialized.extend_from_slice(&body.encode_to_vec());

        Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized,
        }
    }

    /// Parses a serialized prekey message, including the embedded message.
    pub fn parse(bytes: &[u8], mac_length: usize) -> Result<Self> {
        let Some((&first, body)) = bytes.split_first() else {
            return Err(Error::InvalidMessage("empty message"));
        };
        let message_version = check_version(first)?;

        let body = PreKeyWhisperMessageProto::decode(body)?;
        let (Some(base_key), Some(identity_key), Some(message), Some(signed_pre_key_id)) = (
            body.base_key,
            body.identity_key,
            body.message,
            body.signed_pre_key_id,
        ) else {
            return Err(Error::InvalidMessage("incomplete prekey message"));
        };

        Ok(Self {
            message_version,
            registration_id: body.registration_id.unwrap_or(0),
            pre_key_id: body.pre_key_id,
            signed_pre_key_id,
            base_key: PublicKey::deserialize(&base_key)?,
            identity_key: PublicKey::deserialize(&identity_key)?,
            message: WhisperMessage::parse(&message, mac_length)?,
            serialized: bytes.to_vec(),
        })
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    #[must_use]
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    #[must_use]
    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    #[must_use]
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    #[must_use]
    pub fn identity_key(&self) -> &PublicKey {
        &self.identity_key
    }

    #[must_use]
    pub fn message(&self) -> &WhisperMessage {
        &self.message
    }

    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Either wire message, as produced by encrypt and consumed by decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiphertextMessage {
    Plain(WhisperMessage),
    PreKeyWrapped(PreKeyWhisperMessage),
}

impl CiphertextMessage {
    /// Parses `bytes` according to the envelope type.
    pub fn parse(
        message_type: CiphertextMessageType,
        bytes: &[u8],
        mac_length: usize,
    ) -> Result<Self> {
        Ok(match message_type {
            CiphertextMessageType::Whisper => Self::Plain(WhisperMessage::parse(bytes, mac_length)?),
            CiphertextMessageType::PreKey => {
                Self::PreKeyWrapped(PreKeyWhisperMessage::parse(bytes, mac_length)?)
            }
        })
    }

    #[must_use]
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            Self::Plain(_) => CiphertextMessageType::Whisper,
            Self::PreKeyWrapped(_) => CiphertextMessageType::PreKey,
        }
    }

    /// Wire bytes for the transport envelope
    #[must_use]
    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::Plain(message) => message.serialized(),
            Self::PreKeyWrapped(message) => message.serialized(),
        }
    }
}
