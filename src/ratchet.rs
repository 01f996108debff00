//! Root, chain and message keys, and the initial session agreement.
//!
//! ## Key schedule
//!
//! ```text
//! session setup:  (RK, CK)    = HKDF(F || DH1 || DH2 || DH3 || [DH4], "WhisperText")
//! DH ratchet:     (RK', CK)   = HKDF(salt = RK, DH(ours, theirs), "WhisperRatchet")
//! chain step:     CK'         = HMAC(CK, 0x02)
//! message keys:   (Kc, Km, IV) = HKDF(HMAC(CK, 0x01), "WhisperMessageKeys")
//! ```
//!
//! A [`ChainKey`] at index `n` yields the message keys for `n` and the chain
//! key for `n + 1`; nothing derives an earlier index.

use crate::config::ProtocolConfig;
use crate::crypto::{
    IV_SIZE, SymmetricKey, advance_chain_key, derive_initial_keys, derive_message_key_material,
    kdf_root,
};
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, KEY_SIZE_32, KeyPair, PublicKey};
use crate::state::SessionState;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Root key of a session; seeds a new chain on each DH ratchet step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RootKey {
    key: SymmetricKey,
}

impl RootKey {
    pub(crate) fn new(key: SymmetricKey) -> Self {
        Self { key }
    }

    /// Raw key bytes
    #[must_use]
    pub fn key(&self) -> &[u8; KEY_SIZE_32] {
        self.key.as_bytes()
    }

    /// DH ratchet step: mixes `DH(our_ratchet_key, their_ratchet_key)` into
    /// the root and returns the next root key plus a fresh chain at index 0.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &KeyPair,
    ) -> Result<(RootKey, ChainKey)> {
        let shared = our_ratchet_key.calculate_agreement(their_ratchet_key)?;
        let (root, chain) = kdf_root(&self.key, &shared);
        Ok((RootKey::new(root), ChainKey::new(chain, 0)))
    }
}

/// Symmetric ratchet key with its position in the chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainKey {
    key: SymmetricKey,
    index: u32,
}

impl ChainKey {
    pub(crate) fn new(key: SymmetricKey, index: u32) -> Self {
        Self { key, index }
    }

    /// Raw key bytes
    #[must_use]
    pub fn key(&self) -> &[u8; KEY_SIZE_32] {
        self.key.as_bytes()
    }

    /// Position of this key in its chain
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Chain key for the next index.
    pub fn next(&self) -> Result<ChainKey> {
        let index = self
            .index
            .checked_add(1)
            .ok_or(Error::InvalidState("chain index exhausted"))?;
        Ok(ChainKey::new(advance_chain_key(&self.key), index))
    }

    /// Message keys for this index; the chain key itself is left unchanged.
    #[must_use]
    pub fn message_keys(&self) -> MessageKeys {
        let mut material = derive_message_key_material(&self.key);

        let mut cipher_key = [0u8; KEY_SIZE_32];
        let mut mac_key = [0u8; KEY_SIZE_32];
        let mut iv = [0u8; IV_SIZE];
        cipher_key.copy_from_slice(&material[..KEY_SIZE_32]);
        mac_key.copy_from_slice(&material[KEY_SIZE_32..KEY_SIZE_32 * 2]);
        iv.copy_from_slice(&material[KEY_SIZE_32 * 2..]);
        material.zeroize();

        MessageKeys {
            cipher_key,
            mac_key,
            iv,
            counter: self.index,
        }
    }
}

/// Per-message key material. Used at most once, then dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct MessageKeys {
    cipher_key: [u8; KEY_SIZE_32],
    mac_key: [u8; KEY_SIZE_32],
    iv: [u8; IV_SIZE],
    counter: u32,
}

impl MessageKeys {
    /// AES-256 key
    #[must_use]
    pub fn cipher_key(&self) -> &[u8; KEY_SIZE_32] {
        &self.cipher_key
    }

    /// HMAC-SHA256 key
    #[must_use]
    pub fn mac_key(&self) -> &[u8; KEY_SIZE_32] {
        &self.mac_key
    }

    /// CBC initialisation vector
    #[must_use]
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Chain index these keys belong to
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl std::fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageKeys {{ counter: {}, keys: [REDACTED] }}", self.counter)
    }
}

/// Inputs for the initiator ("Alice") side of session setup.
#[derive(Debug, Clone)]
pub struct AliceParameters {
    pub our_identity_key_pair: IdentityKeyPair,
    pub our_base_key_pair: KeyPair,
    pub their_identity_key: PublicKey,
    pub their_signed_pre_key_id: u32,
    pub their_signed_pre_key: PublicKey,
    pub their_one_time_pre_key: Option<(u32, PublicKey)>,
    /// Responder's first ratchet key; the signed prekey in practice.
    pub their_ratchet_key: PublicKey,
}

/// Inputs for the responder ("Bob") side of session setup.
#[derive(Debug, Clone)]
pub struct BobParameters {
    pub our_identity_key_pair: IdentityKeyPair,
    pub our_signed_pre_key_pair: KeyPair,
    pub our_one_time_pre_key_pair: Option<KeyPair>,
    /// Our first sending ratchet key; the signed prekey in practice.
    pub our_ratchet_key_pair: KeyPair,
    pub their_identity_key: PublicKey,
    pub their_base_key: PublicKey,
}

/// Builds the initiator's session state.
///
/// `DH(IK_A, SPK_B) || DH(EK_A, IK_B) || DH(EK_A, SPK_B) || [DH(EK_A, OPK_B)]`
/// seeds the root; the initiator then immediately ratchets onto a freshly
/// generated sending key, and the state is marked as carrying an
/// unacknowledged prekey message.
pub fn initialize_alice_session<R: CryptoRngCore>(
    rng: &mut R,
    parameters: &AliceParameters,
    config: &ProtocolConfig,
) -> Result<SessionState> {
    let our_identity = parameters.our_identity_key_pair.key_pair();
    let our_base = &parameters.our_base_key_pair;

    let dh1 = our_identity.calculate_agreement(&parameters.their_signed_pre_key)?;
    let dh2 = our_base.calculate_agreement(&parameters.their_identity_key)?;
    let dh3 = our_base.calculate_agreement(&parameters.their_signed_pre_key)?;
    let dh4 = parameters
        .their_one_time_pre_key
        .as_ref()
        .map(|(_, key)| our_base.calculate_agreement(key))
        .transpose()?;

    let (root, chain) = derive_initial_keys(&dh1, &dh2, &dh3, dh4.as_ref());
    let root_key = RootKey::new(root);
    let receiving_chain = ChainKey::new(chain, 0);

    let sending_ratchet_key = KeyPair::generate(rng);
    let (sending_root, sending_chain) =
        root_key.create_chain(&parameters.their_ratchet_key, &sending_ratchet_key)?;

    let mut state = SessionState::new(
        config.message_version,
        parameters.our_identity_key_pair.public_key(),
        parameters.their_identity_key,
        sending_root,
        our_base.public_key,
    );
    state.add_receiver_chain(
        parameters.their_ratchet_key,
        receiving_chain,
        config.max_receiver_chains,
    );
    state.set_sender_chain(sending_ratchet_key, sending_chain);
    state.set_unacknowledged_pre_key_message(
        parameters.their_one_time_pre_key.map(|(id, _)| id),
        parameters.their_signed_pre_key_id,
        our_base.public_key,
    );

    Ok(state)
}

/// Builds the responder's session state from the initiator's base key.
///
/// Mirrors the initiator's agreement; the derived chain becomes our first
/// sending chain under `our_ratchet_key_pair`.
pub fn initialize_bob_session(
    parameters: &BobParameters,
    config: &ProtocolConfig,
) -> Result<SessionState> {
    let our_signed = &parameters.our_signed_pre_key_pair;

    let dh1 = our_signed.calculate_agreement(&parameters.their_identity_key)?;
    let dh2 = parameters
        .our_identity_key_pair
        .key_pair()
        .calculate_agreement(&parameters.their_base_key)?;
    let dh3 = our_signed.calculate_agreement(&parameters.their_base_key)?;
    let dh4 = parameters
        .our_one_time_pre_key_pair
        .as_ref()
        .map(|pair| pair.calculate_agreement(&parameters.their_base_key))
        .transpose()?;

    let (root, chain) = derive_initial_keys(&dh1, &dh2, &dh3, dh4.as_ref());

    let mut state = SessionState::new(
        config.message_version,
        parameters.our_identity_key_pair.public_key(),
        parameters.their_identity_key,
        RootKey::new(root),
        parameters.their_base_key,
    );
    state.set_sender_chain(
        parameters.our_ratchet_key_pair.clone(),
        ChainKey::new(chain, 0),
    );

    Ok(state)
}
