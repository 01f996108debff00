//! Curve25519 key types with memory safety guarantees.
//!
//! Public keys travel on the wire in the 33-byte "DJB" form: a `0x05` type
//! byte followed by the 32-byte Montgomery u-coordinate.

use crate::error::{Error, Result};
use crate::xeddsa::{SIGNATURE_LENGTH, XEdDSAPrivateKey, XEdDSAPublicKey};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw key length in bytes
pub const KEY_SIZE_32: usize = 32;

/// Type byte prefixed to serialized Curve25519 public keys
pub const DJB_TYPE: u8 = 0x05;

/// Length of a serialized public key (type byte + key)
pub const SERIALIZED_PUBLIC_KEY_LENGTH: usize = KEY_SIZE_32 + 1;

/// X25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE_32]);

impl PublicKey {
    /// Size in bytes
    pub const SIZE: usize = KEY_SIZE_32;

    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }

    /// Wire encoding: `0x05 || key`
    #[must_use]
    pub fn serialize(&self) -> [u8; SERIALIZED_PUBLIC_KEY_LENGTH] {
        let mut out = [0u8; SERIALIZED_PUBLIC_KEY_LENGTH];
        out[0] = DJB_TYPE;
        out[1..].copy_from_slice(&self.0);
        out
    }

    /// Parses the wire encoding produced by [`PublicKey::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            Some((&DJB_TYPE, key)) if key.len() == KEY_SIZE_32 => {
                let mut raw = [0u8; KEY_SIZE_32];
                raw.copy_from_slice(key);
                Ok(Self(raw))
            }
            _ => Err(Error::InvalidKey),
        }
    }

    /// Verifies an XEdDSA signature made by the matching private key.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature: &[u8; SIGNATURE_LENGTH] =
            signature.try_into().map_err(|_| Error::InvalidSignature)?;
        XEdDSAPublicKey::from_x25519_public(self)?.verify(message, signature)
    }

    /// Convert to X25519 public key
    pub(crate) fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey([REDACTED])")
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(pk: X25519PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        PublicKey::from(X25519PublicKey::from(secret))
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <[u8; KEY_SIZE_32]>::deserialize(deserializer)?;
        Ok(Self::from_bytes(bytes))
    }
}

/// X25519 secret key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a new random secret key
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self(StaticSecret::random_from_rng(rng))
    }

    /// Create from raw bytes (must be 32 bytes)
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Raw scalar bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_SIZE_32] {
        self.0.to_bytes()
    }

    /// Get the corresponding public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.0)
    }

    /// Perform Diffie-Hellman key agreement.
    ///
    /// Rejects low-order peer points, whose shared secret would be all zeros.
    pub fn diffie_hellman(&self, public: &PublicKey) -> Result<DhOutput> {
        let shared = self.0.diffie_hellman(&public.to_x25519());
        if !shared.was_contributory() {
            return Err(Error::InvalidKey);
        }
        Ok(DhOutput(*shared.as_bytes()))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

impl Serialize for SecretKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut bytes = self.to_bytes();
        let result = bytes.serialize(serializer);
        bytes.zeroize();
        result
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut bytes = <[u8; KEY_SIZE_32]>::deserialize(deserializer)?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }
}

/// Output of Diffie-Hellman operation (32 bytes)
/// Automatically zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_SIZE_32]);

impl DhOutput {
    /// Returns a byte slice of the Diffie-Hellman operation output
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// Curve25519 key pair used for base keys, ratchet keys and prekeys
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyPair {
    /// Public half
    pub public_key: PublicKey,
    /// Private half
    pub private_key: SecretKey,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self::from_private(SecretKey::generate(rng))
    }

    /// Rebuild a key pair from its private half
    #[must_use]
    pub fn from_private(private_key: SecretKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }

    /// DH between our private key and `their_public`
    pub fn calculate_agreement(&self, their_public: &PublicKey) -> Result<DhOutput> {
        self.private_key.diffie_hellman(their_public)
    }
}

/// Long-term identity key pair.
///
/// A single Curve25519 key does both key agreement and (via XEdDSA) signing.
#[derive(Clone, Debug)]
pub struct IdentityKeyPair {
    key_pair: KeyPair,
}

impl IdentityKeyPair {
    /// Generate a new identity key pair
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self {
            key_pair: KeyPair::generate(rng),
        }
    }

    /// Wrap an existing key pair
    #[must_use]
    pub fn from_key_pair(key_pair: KeyPair) -> Self {
        Self { key_pair }
    }

    /// Get the public identity key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key
    }

    /// Get the private identity key
    #[must_use]
    pub fn secret_key(&self) -> &SecretKey {
        &self.key_pair.private_key
    }

    /// Underlying key pair
    #[must_use]
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Sign `message` with XEdDSA
    pub fn sign<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        message: &[u8],
    ) -> Result<[u8; SIGNATURE_LENGTH]> {
        let mut random = [0u8; 64];
        rng.fill_bytes(&mut random);

        let mut secret = self.secret_key().to_bytes();
        let signer = XEdDSAPrivateKey::from_x25519_private(&secret);
        secret.zeroize();

        let signature = signer?.sign(message, &random);
        random.zeroize();
        Ok(signature)
    }
}
