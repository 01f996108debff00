//! Prekey bundles and locally held prekey records.
//!
//! A responder publishes a [`PreKeyBundle`] so that initiators can open a
//! session while it is offline. The bundle carries:
//!
//! - the long-term identity key
//! - a signed prekey, with an XEdDSA signature by the identity key over
//!   the prekey's wire encoding
//! - optionally one single-use prekey
//!
//! The private halves stay in the responder's stores as [`PreKeyRecord`] and
//! [`SignedPreKeyRecord`].

use crate::error::Result;
use crate::keys::{IdentityKeyPair, KeyPair, PublicKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

/// Prekey ids are 24-bit on the wire and start at 1.
pub const MAX_PRE_KEY_ID: u32 = 0x00FF_FFFF;

/// Registration ids are drawn from `1..=MAX_REGISTRATION_ID`.
pub const MAX_REGISTRATION_ID: u32 = 16380;

/// Public key material of a remote device, as fetched from a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    /// Single-use prekey id and public key, if the server had one left
    pub pre_key: Option<(u32, PublicKey)>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: PublicKey,
    pub signed_pre_key_signature: Vec<u8>,
    pub identity_key: PublicKey,
}

impl PreKeyBundle {
    /// Checks the identity key's signature over the signed prekey.
    pub fn verify_signature(&self) -> Result<()> {
        self.identity_key.verify_signature(
            &self.signed_pre_key_public.serialize(),
            &self.signed_pre_key_signature,
        )
    }

    /// One-time prekey id, if any
    #[must_use]
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key.map(|(id, _)| id)
    }
}

/// Locally stored one-time prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    #[must_use]
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }
}

/// Locally stored signed prekey with its signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: u64,
    pub key_pair: KeyPair,
    pub signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    #[must_use]
    pub fn new(id: u32, timestamp: u64, key_pair: KeyPair, signature: Vec<u8>) -> Self {
        Self {
            id,
            timestamp,
            key_pair,
            signature,
        }
    }
}

/// Random registration id in `1..=MAX_REGISTRATION_ID`.
pub fn generate_registration_id<R: CryptoRngCore>(rng: &mut R) -> u32 {
    rng.next_u32() % MAX_REGISTRATION_ID + 1
}

/// Generates `count` one-time prekeys with consecutive ids starting at
/// `start`. Ids wrap from [`MAX_PRE_KEY_ID`] back to 1.
pub fn generate_pre_keys<R: CryptoRngCore>(
    rng: &mut R,
    start: u32,
    count: u32,
) -> Vec<PreKeyRecord> {
    let first = u64::from(start.clamp(1, MAX_PRE_KEY_ID) - 1);
    let modulus = u64::from(MAX_PRE_KEY_ID);

    (0..u64::from(count))
        .map(|offset| {
            #[allow(clippy::cast_possible_truncation)]
            let id = ((first + offset) % modulus) as u32 + 1;
            PreKeyRecord::new(id, KeyPair::generate(rng))
        })
        .collect()
}

/// Generates a signed prekey and signs its wire encoding with `identity`.
pub fn generate_signed_pre_key<R: CryptoRngCore>(
    rng: &mut R,
    identity: &IdentityKeyPair,
    id: u32,
    timestamp: u64,
) -> Result<SignedPreKeyRecord> {
    let key_pair = KeyPair::generate(rng);
    let signature = identity.sign(rng, &key_pair.public_key.serialize())?;
    Ok(SignedPreKeyRecord::new(
        id,
        timestamp,
        key_pair,
        signature.to_vec(),
    ))
}
