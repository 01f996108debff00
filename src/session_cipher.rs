//! Encrypt/decrypt facade for one remote device.
//!
//! Every call runs load → mutate → store under the address lock. The record
//! is mutated as a private copy and only written back once the operation
//! has fully succeeded, so a failed decrypt (bad MAC, duplicate, store
//! error) never advances the stored ratchet.
//!
//! ## Decrypt
//!
//! 1. Pick the receiving chain for the message's ratchet key; if none
//!    exists, take a DH ratchet step (new receiving chain, new sending
//!    ratchet key).
//! 2. Counter behind the chain: use the cached skipped key or fail with
//!    [`Error::DuplicateMessage`]. Counter ahead: cache the keys in
//!    between, up to the configured jump.
//! 3. Verify the MAC, then decrypt.
//!
//! The current state is tried first, then archived states newest first; an
//! archived state that decrypts becomes current again.

use crate::address::ProtocolAddress;
use crate::config::ProtocolConfig;
use crate::crypto::{aes_256_cbc_decrypt, aes_256_cbc_encrypt};
use crate::error::{Error, Result};
use crate::keys::{KeyPair, PublicKey};
use crate::protocol::{CiphertextMessage, PreKeyWhisperMessage, WhisperMessage};
use crate::ratchet::{ChainKey, MessageKeys};
use crate::record::SessionRecord;
use crate::session_builder::process_pre_key_whisper_message;
use crate::state::SessionState;
use crate::storage::ProtocolStore;
use rand_core::CryptoRngCore;
use tracing::{debug, warn};

/// Session cipher for one remote address.
///
/// Holds its own handle to the stores; with the in-memory stores, clones
/// of one [`crate::storage::InMemoryProtocolStore`] share state.
pub struct SessionCipher<S> {
    store: S,
    remote: ProtocolAddress,
    config: ProtocolConfig,
}

impl<S: ProtocolStore> SessionCipher<S> {
    /// Creates a cipher. Fails if `config` is out of range.
    pub fn new(store: S, remote: ProtocolAddress, config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            remote,
            config,
        })
    }

    #[must_use]
    pub fn remote_address(&self) -> &ProtocolAddress {
        &self.remote
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Encrypts `plaintext` under the current session.
    ///
    /// Returns a [`CiphertextMessage::PreKeyWrapped`] until the remote side
    /// has replied, a [`CiphertextMessage::Plain`] afterwards.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<CiphertextMessage> {
        let locks = self.store.session_locks();
        let remote = self.remote.clone();
        locks.with_lock(&remote, || self.encrypt_locked(plaintext))
    }

    fn encrypt_locked(&mut self, plaintext: &[u8]) -> Result<CiphertextMessage> {
        let mut record = self.store.load_session(&self.remote)?;
        let state = record
            .session_state_mut()
            .filter(|state| state.has_sender_chain())
            .ok_or_else(|| Error::NoSession(self.remote.to_string()))?;

        let remote_identity = *state.remote_identity_key();
        if !self
            .store
            .is_trusted_identity(&self.remote, &remote_identity)?
        {
            warn!(remote = %self.remote, "refusing to encrypt to untrusted identity");
            return Err(Error::UntrustedIdentity(self.remote.to_string()));
        }

        let chain_key = state.sender_chain_key()?;
        let message_keys = chain_key.message_keys();
        let ciphertext =
            aes_256_cbc_encrypt(message_keys.cipher_key(), message_keys.iv(), plaintext)?;

        let local_identity = *state.local_identity_key();
        let whisper = WhisperMessage::new(
            state.session_version(),
            message_keys.mac_key(),
            state.sender_ratchet_key()?,
            chain_key.index(),
            state.previous_counter(),
            ciphertext,
            &local_identity,
            &remote_identity,
            self.config.mac_length,
        )?;

        let message = match state.pending_pre_key() {
            Some(pending) => CiphertextMessage::PreKeyWrapped(PreKeyWhisperMessage::new(
                state.session_version(),
                state.local_registration_id(),
                pending.pre_key_id,
                pending.signed_pre_key_id,
                pending.base_key,
                local_identity,
                whisper,
            )),
            None => CiphertextMessage::Plain(whisper),
        };

        state.set_sender_chain_key(chain_key.next()?)?;
        debug!(
            remote = %self.remote,
            counter = chain_key.index(),
            prekey = matches!(message, CiphertextMessage::PreKeyWrapped(_)),
            "encrypted message"
        );

        self.store.save_identity(&self.remote, &remote_identity)?;
        self.store.store_session(&self.remote, &record)?;
        Ok(message)
    }

    /// Decrypts either wire message.
    ///
    /// A prekey message for an unknown base key first builds the responder
    /// session; its one-time prekey is removed only after the embedded
    /// message decrypts.
    pub fn decrypt<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        message: &CiphertextMessage,
    ) -> Result<Vec<u8>> {
        let locks = self.store.session_locks();
        let remote = self.remote.clone();
        locks.with_lock(&remote, || match message {
            CiphertextMessage::Plain(message) => self.decrypt_whisper_locked(rng, message),
            CiphertextMessage::PreKeyWrapped(message) => self.decrypt_pre_key_locked(rng, message),
        })
    }

    fn decrypt_whisper_locked<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        message: &WhisperMessage,
    ) -> Result<Vec<u8>> {
        let mut record = self.store.load_session(&self.remote)?;
        let plaintext = decrypt_with_record(rng, &mut record, message, &self.config, &self.remote)?;

        let remote_identity = *record
            .session_state()
            .ok_or(Error::InvalidState("decrypted without a current session"))?
            .remote_identity_key();
        if !self
            .store
            .is_trusted_identity(&self.remote, &remote_identity)?
        {
            warn!(remote = %self.remote, "message from untrusted identity");
            return Err(Error::UntrustedIdentity(self.remote.to_string()));
        }

        self.store.save_identity(&self.remote, &remote_identity)?;
        self.store.store_session(&self.remote, &record)?;
        Ok(plaintext)
    }

    fn decrypt_pre_key_locked<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        message: &PreKeyWhisperMessage,
    ) -> Result<Vec<u8>> {
        let record = self.store.load_session(&self.remote)?;
        let outcome =
            process_pre_key_whisper_message(&self.store, &self.remote, &self.config, rng, record, message)?;

        // Side writes precede the session write, which commits.
        self.store
            .save_identity(&self.remote, &outcome.remote_identity)?;
        let removed = match outcome.consumed_pre_key_id {
            Some(id) => {
                let held = self.store.load_pre_key(id)?;
                self.store.remove_pre_key(id)?;
                debug!(remote = %self.remote, pre_key_id = id, "removed consumed prekey");
                held
            }
            None => None,
        };

        if let Err(err) = self.store.store_session(&self.remote, &outcome.record) {
            if let Some(record) = removed {
                let id = record.id;
                if let Err(restore) = self.store.store_pre_key(record) {
                    warn!(remote = %self.remote, pre_key_id = id, error = %restore, "failed to restore prekey");
                }
            }
            return Err(err);
        }
        Ok(outcome.plaintext)
    }

    /// Remote registration id of the current session.
    pub fn remote_registration_id(&self) -> Result<u32> {
        Ok(self.current_state()?.remote_registration_id())
    }

    /// Protocol version of the current session.
    pub fn session_version(&self) -> Result<u8> {
        Ok(self.current_state()?.session_version())
    }

    fn current_state(&self) -> Result<SessionState> {
        self.store
            .load_session(&self.remote)?
            .session_state()
            .cloned()
            .ok_or_else(|| Error::NoSession(self.remote.to_string()))
    }
}

/// Decrypts `message` against the current or an archived state of `record`.
///
/// On success `record` holds the advanced state as current. On failure it is
/// left untouched and the error from the current state (or, without one,
/// the first archived state) is returned. A duplicate is reported as soon
/// as any state recognises it.
pub(crate) fn decrypt_with_record<R: CryptoRngCore>(
    rng: &mut R,
    record: &mut SessionRecord,
    message: &WhisperMessage,
    config: &ProtocolConfig,
    remote: &ProtocolAddress,
) -> Result<Vec<u8>> {
    let mut first_error = None;

    if let Some(current) = record.session_state() {
        let mut state = current.clone();
        match decrypt_with_state(rng, &mut state, message, config) {
            Ok(plaintext) => {
                record.set_session_state(state);
                return Ok(plaintext);
            }
            Err(err) => {
                if let Error::DuplicateMessage { chain_index, counter } = err {
                    warn!(remote = %remote, chain_index, counter, "duplicate message");
                    return Err(err);
                }
                first_error = Some(err);
            }
        }
    }

    let mut promoted = None;
    for (index, previous) in record.previous_session_states().enumerate() {
        let mut state = previous.clone();
        match decrypt_with_state(rng, &mut state, message, config) {
            Ok(plaintext) => {
                promoted = Some((index, state, plaintext));
                break;
            }
            Err(err) => {
                if let Error::DuplicateMessage { chain_index, counter } = err {
                    warn!(remote = %remote, chain_index, counter, "duplicate message");
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }
    }

    if let Some((index, state, plaintext)) = promoted {
        debug!(remote = %remote, index, "decrypted with archived session, promoting");
        record.promote_old_session(index, state, config.max_archived_states)?;
        return Ok(plaintext);
    }

    let err = first_error.unwrap_or_else(|| Error::NoSession(remote.to_string()));
    warn!(remote = %remote, error = %err, "failed to decrypt message");
    Err(err)
}

fn decrypt_with_state<R: CryptoRngCore>(
    rng: &mut R,
    state: &mut SessionState,
    message: &WhisperMessage,
    config: &ProtocolConfig,
) -> Result<Vec<u8>> {
    if !state.has_sender_chain() {
        return Err(Error::InvalidState("session has no sender chain"));
    }
    if message.message_version() != state.session_version() {
        return Err(Error::InvalidVersion(message.message_version()));
    }
    if message.mac_length() != config.mac_length {
        return Err(Error::InvalidMac);
    }

    let their_ratchet_key = message.sender_ratchet_key();
    let chain_key = get_or_create_chain_key(rng, state, their_ratchet_key, config)?;
    let message_keys =
        get_or_create_message_keys(state, their_ratchet_key, &chain_key, message.counter(), config)?;

    if !message.verify_mac(
        state.remote_identity_key(),
        state.local_identity_key(),
        message_keys.mac_key(),
    ) {
        return Err(Error::InvalidMac);
    }

    let plaintext =
        aes_256_cbc_decrypt(message_keys.cipher_key(), message_keys.iv(), message.body())?;
    state.clear_unacknowledged_pre_key_message();
    Ok(plaintext)
}

/// Receiving chain for `their_ratchet_key`, taking a DH ratchet step when the
/// key is new.
fn get_or_create_chain_key<R: CryptoRngCore>(
    rng: &mut R,
    state: &mut SessionState,
    their_ratchet_key: &PublicKey,
    config: &ProtocolConfig,
) -> Result<ChainKey> {
    if let Some(chain_key) = state.receiver_chain_key(their_ratchet_key) {
        return Ok(chain_key);
    }

    let our_ratchet_key = state.sender_ratchet_key_pair()?.clone();
    let (receiver_root, receiver_chain) = state
        .root_key()
        .create_chain(their_ratchet_key, &our_ratchet_key)?;

    let our_new_ratchet_key = KeyPair::generate(rng);
    let (sender_root, sender_chain) =
        receiver_root.create_chain(their_ratchet_key, &our_new_ratchet_key)?;

    let previous_counter = state.sender_chain_key()?.index().saturating_sub(1);

    state.set_root_key(sender_root);
    state.add_receiver_chain(
        *their_ratchet_key,
        receiver_chain.clone(),
        config.max_receiver_chains,
    );
    state.set_previous_counter(previous_counter);
    state.set_sender_chain(our_new_ratchet_key, sender_chain);

    debug!(previous_counter, "DH ratchet step");
    Ok(receiver_chain)
}

fn get_or_create_message_keys(
    state: &mut SessionState,
    their_ratchet_key: &PublicKey,
    chain_key: &ChainKey,
    counter: u32,
    config: &ProtocolConfig,
) -> Result<MessageKeys> {
    let chain_index = chain_key.index();

    if chain_index > counter {
        return state
            .take_message_keys(their_ratchet_key, counter)
            .ok_or(Error::DuplicateMessage {
                chain_index,
                counter,
            });
    }

    if counter - chain_index > config.max_forward_jump {
        warn!(chain_index, counter, "counter jump exceeds limit");
        return Err(Error::InvalidMessage("message counter too far ahead"));
    }

    let mut chain_key = chain_key.clone();
    while chain_key.index() < counter {
        state.cache_message_keys(
            their_ratchet_key,
            chain_key.message_keys(),
            config.max_message_keys,
        )?;
        chain_key = chain_key.next()?;
    }
    if counter > chain_index {
        debug!(chain_index, counter, "cached skipped message keys");
    }

    state.set_receiver_chain_key(their_ratchet_key, chain_key.next()?)?;
    Ok(chain_key.message_keys())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;
    use crate::prekey::{PreKeyBundle, generate_pre_keys, generate_signed_pre_key};
    use crate::session_builder::SessionBuilder;
    use crate::storage::{
        IdentityKeyStore, InMemoryProtocolStore, PreKeyStore, SessionStore, SignedPreKeyStore,
    };
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Pair {
        alice: SessionCipher<InMemoryProtocolStore>,
        bob: SessionCipher<InMemoryProtocolStore>,
        alice_store: InMemoryProtocolStore,
        bob_store: InMemoryProtocolStore,
    }

    fn established(rng: &mut StdRng, config: ProtocolConfig) -> Pair {
        let alice_store = InMemoryProtocolStore::new(IdentityKeyPair::generate(rng), 1);
        let mut bob_store = InMemoryProtocolStore::new(IdentityKeyPair::generate(rng), 2);

        let bob_identity = bob_store.identity_key_pair().unwrap();
        let signed = generate_signed_pre_key(rng, &bob_identity, 1, 0).unwrap();
        let one_time = generate_pre_keys(rng, 100, 1).remove(0);
        let bundle = PreKeyBundle {
            registration_id: 2,
            device_id: 1,
            pre_key: Some((one_time.id, one_time.key_pair.public_key)),
            signed_pre_key_id: signed.id,
            signed_pre_key_public: signed.key_pair.public_key,
            signed_pre_key_signature: signed.signature.clone(),
            identity_key: bob_identity.public_key(),
        };
        bob_store.store_signed_pre_key(signed).unwrap();
        bob_store.store_pre_key(one_time).unwrap();

        let bob_address = ProtocolAddress::new("bob", 1);
        let alice_address = ProtocolAddress::new("alice", 1);

        SessionBuilder::new(alice_store.clone(), bob_address.clone(), config)
            .unwrap()
            .process_pre_key_bundle(rng, &bundle)
            .unwrap();

        Pair {
            alice: SessionCipher::new(alice_store.clone(), bob_address, config).unwrap(),
            bob: SessionCipher::new(bob_store.clone(), alice_address, config).unwrap(),
            alice_store,
            bob_store,
        }
    }

    #[test]
    fn test_first_exchange_consumes_pre_key() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pair = established(&mut rng, ProtocolConfig::default());

        let first = pair.alice.encrypt(b"hello").unwrap();
        assert!(matches!(first, CiphertextMessage::PreKeyWrapped(_)));
        assert_eq!(pair.bob.decrypt(&mut rng, &first).unwrap(), b"hello");
        assert!(!pair.bob_store.contains_pre_key(100).unwrap());

        let reply = pair.bob.encrypt(b"hi back").unwrap();
        assert!(matches!(reply, CiphertextMessage::Plain(_)));
        assert_eq!(pair.alice.decrypt(&mut rng, &reply).unwrap(), b"hi back");

        let third = pair.alice.encrypt(b"third").unwrap();
        assert!(matches!(third, CiphertextMessage::Plain(_)));
        assert_eq!(pair.alice.remote_registration_id().unwrap(), 2);
        assert_eq!(pair.bob.remote_registration_id().unwrap(), 1);
        assert_eq!(pair.bob.session_version().unwrap(), 3);
    }

    #[test]
    fn test_skipped_keys_are_cached_and_consumed() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut pair = established(&mut rng, ProtocolConfig::default());

        let messages: Vec<_> = (0..4)
            .map(|i| pair.alice.encrypt(format!("m{i}").as_bytes()).unwrap())
            .collect();

        assert_eq!(pair.bob.decrypt(&mut rng, &messages[3]).unwrap(), b"m3");
        let record = pair
            .bob_store
            .load_session(pair.bob.remote_address())
            .unwrap();
        assert_eq!(record.session_state().unwrap().skipped_message_key_count(), 3);

        assert_eq!(pair.bob.decrypt(&mut rng, &messages[1]).unwrap(), b"m1");
        let record = pair
            .bob_store
            .load_session(pair.bob.remote_address())
            .unwrap();
        assert_eq!(record.session_state().unwrap().skipped_message_key_count(), 2);
    }

    #[test]
    fn test_forward_jump_limit() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = ProtocolConfig::default().with_max_forward_jump(2);
        let mut pair = established(&mut rng, config);

        let first = pair.alice.encrypt(b"0").unwrap();
        pair.bob.decrypt(&mut rng, &first).unwrap();

        for _ in 0..3 {
            pair.alice.encrypt(b"lost").unwrap();
        }
        let far = pair.alice.encrypt(b"4").unwrap();
        assert!(matches!(
            pair.bob.decrypt(&mut rng, &far),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_failed_decrypt_does_not_commit() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut pair = established(&mut rng, ProtocolConfig::default());

        let first = pair.alice.encrypt(b"hello").unwrap();
        pair.bob.decrypt(&mut rng, &first).unwrap();
        let reply = pair.bob.encrypt(b"reply").unwrap();
        pair.alice.decrypt(&mut rng, &reply).unwrap();
        let second = pair.alice.encrypt(b"again").unwrap();
        assert!(matches!(second, CiphertextMessage::Plain(_)));

        let mut bytes = second.serialize().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        let tampered = CiphertextMessage::parse(second.message_type(), &bytes, 8).unwrap();

        let before = pair
            .bob_store
            .load_session(pair.bob.remote_address())
            .unwrap()
            .serialize()
            .unwrap();
        assert_eq!(pair.bob.decrypt(&mut rng, &tampered), Err(Error::InvalidMac));
        let after = pair
            .bob_store
            .load_session(pair.bob.remote_address())
            .unwrap()
            .serialize()
            .unwrap();
        assert_eq!(before, after);

        assert_eq!(pair.bob.decrypt(&mut rng, &second).unwrap(), b"again");
    }

    #[test]
    fn test_encrypt_without_session() {
        let mut rng = StdRng::seed_from_u64(5);
        let store = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 1);
        let mut cipher = SessionCipher::new(
            store,
            ProtocolAddress::new("nobody", 1),
            ProtocolConfig::default(),
        )
        .unwrap();

        assert!(matches!(cipher.encrypt(b"x"), Err(Error::NoSession(_))));
        assert!(matches!(
            cipher.remote_registration_id(),
            Err(Error::NoSession(_))
        ));
    }

    #[test]
    fn test_decrypt_without_session() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut pair = established(&mut rng, ProtocolConfig::default());
        let first = pair.alice.encrypt(b"hello").unwrap();
        let CiphertextMessage::PreKeyWrapped(prekey) = first else {
            panic!("expected a prekey message");
        };

        // The embedded message alone cannot be decrypted without the session
        let plain = CiphertextMessage::Plain(prekey.message().clone());
        assert!(matches!(
            pair.bob.decrypt(&mut rng, &plain),
            Err(Error::NoSession(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let store = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 1);
        let config = ProtocolConfig::default().with_mac_length(40);
        assert!(SessionCipher::new(store, ProtocolAddress::new("x", 1), config).is_err());
    }
}
