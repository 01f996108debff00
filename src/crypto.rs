//! Cryptographic primitives for session setup and the Double Ratchet.
//!
//! Provides the HKDF/HMAC key derivation steps, AES-256-CBC payload
//! encryption and truncated HMAC-SHA256 message authentication. Everything
//! here is a pure function over byte buffers.

use crate::error::{Error, Result};
use crate::keys::{DhOutput, KEY_SIZE_32};

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

const INITIAL_INFO: &[u8] = b"WhisperText";
const RATCHET_INFO: &[u8] = b"WhisperRatchet";
const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

pub const KEY_SIZE_64: usize = 64;
pub const IV_SIZE: usize = 16;
pub const MESSAGE_KEY_MATERIAL_SIZE: usize = KEY_SIZE_32 * 2 + IV_SIZE;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// 256-bit symmetric key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, serde::Serialize, serde::Deserialize)]
pub struct SymmetricKey([u8; KEY_SIZE_32]);

impl SymmetricKey {
    /// Creates a symmetric key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Returns the key as a byte array reference.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

fn split_64(mut output: [u8; KEY_SIZE_64]) -> (SymmetricKey, SymmetricKey) {
    let mut first = [0u8; KEY_SIZE_32];
    let mut second = [0u8; KEY_SIZE_32];
    first.copy_from_slice(&output[..KEY_SIZE_32]);
    second.copy_from_slice(&output[KEY_SIZE_32..]);
    output.zeroize();
    (SymmetricKey(first), SymmetricKey(second))
}

/// Session setup KDF.
///
/// Computes `HKDF(F || DH1 || DH2 || DH3 || [DH4])` with
/// `F = 0xFF^32`, a zero salt and info `"WhisperText"`, and splits the
/// 64-byte output into `(root key, chain key)`. The chain key seeds the
/// initiator's first receiving chain and the responder's first sending chain.
///
/// # Panics
///
/// Never panics in practice. The internal `expect()` guards an HKDF expand
/// of a fixed 64-byte length, which is always valid.
#[must_use]
pub fn derive_initial_keys(
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: Option<&DhOutput>,
) -> (SymmetricKey, SymmetricKey) {
    const F: [u8; 32] = [0xFF; 32];

    let mut ikm = [0u8; 32 + 32 * 4];
    let mut len = 0;

    for part in [Some(&F), Some(dh1.as_bytes()), Some(dh2.as_bytes()), Some(dh3.as_bytes())]
        .into_iter()
        .chain(std::iter::once(dh4.map(DhOutput::as_bytes)))
        .flatten()
    {
        ikm[len..len + 32].copy_from_slice(part);
        len += 32;
    }

    let hkdf = Hkdf::<Sha256>::new(None, &ikm[..len]);
    let mut output = [0u8; KEY_SIZE_64];
    hkdf.expand(INITIAL_INFO, &mut output)
        .expect("64-byte HKDF output is always valid");

    ikm.zeroize();
    split_64(output)
}

/// Root KDF for the DH ratchet step.
///
/// Computes `(RK', CK) = HKDF(salt = RK, ikm = DH_out, info = "WhisperRatchet")`.
///
/// # Panics
///
/// Never panics in practice; see [`derive_initial_keys`].
#[must_use]
pub fn kdf_root(root_key: &SymmetricKey, dh_output: &DhOutput) -> (SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_bytes()), dh_output.as_bytes());

    let mut output = [0u8; KEY_SIZE_64];
    hkdf.expand(RATCHET_INFO, &mut output)
        .expect("64-byte HKDF output is always valid");

    split_64(output)
}

fn chain_hmac(chain_key: &SymmetricKey, seed: u8) -> SymmetricKey {
    let mut mac = HmacSha256::new_from_slice(chain_key.as_bytes())
        .expect("HMAC-SHA256 accepts any key size");
    mac.update(&[seed]);
    SymmetricKey::from_bytes(mac.finalize().into_bytes().into())
}

/// `CK' = HMAC(CK, 0x02)`
#[must_use]
pub fn advance_chain_key(chain_key: &SymmetricKey) -> SymmetricKey {
    chain_hmac(chain_key, CHAIN_KEY_SEED)
}

/// Expands `HMAC(CK, 0x01)` into `cipher key (32) || MAC key (32) || IV (16)`.
///
/// Does not touch the chain key.
///
/// # Panics
///
/// Never panics in practice; 80 bytes is a valid HKDF-SHA256 output length.
#[must_use]
pub fn derive_message_key_material(chain_key: &SymmetricKey) -> [u8; MESSAGE_KEY_MATERIAL_SIZE] {
    let seed = chain_hmac(chain_key, MESSAGE_KEY_SEED);
    let hkdf = Hkdf::<Sha256>::new(None, seed.as_bytes());

    let mut output = [0u8; MESSAGE_KEY_MATERIAL_SIZE];
    hkdf.expand(MESSAGE_KEYS_INFO, &mut output)
        .expect("80-byte HKDF output is always valid");
    output
}

/// AES-256-CBC with PKCS#7 padding.
pub fn aes_256_cbc_encrypt(
    key: &[u8; KEY_SIZE_32],
    iv: &[u8; IV_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| Error::InvalidKey)?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Inverse of [`aes_256_cbc_encrypt`]. Fails on bad length or padding.
pub fn aes_256_cbc_decrypt(
    key: &[u8; KEY_SIZE_32],
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % IV_SIZE != 0 {
        return Err(Error::InvalidMessage("ciphertext is not a whole number of blocks"));
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| Error::InvalidKey)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::InvalidMessage("bad ciphertext padding"))
}

/// HMAC-SHA256 over the concatenation of `parts`.
#[must_use]
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; KEY_SIZE_32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Constant-time comparison of two MAC tags.
#[must_use]
pub fn mac_matches(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}
