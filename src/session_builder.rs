//! Session establishment.
//!
//! ## Initiator
//!
//! [`SessionBuilder::process_pre_key_bundle`] checks the bundle's identity
//! against the pinned one and its signed prekey signature, then runs the
//! initiator key agreement with a fresh base key. The new state becomes
//! current and the previous one is archived. Until the responder replies,
//! every outgoing message is wrapped as a prekey message.
//!
//! ## Responder
//!
//! An incoming prekey message whose base key matches a held state is just
//! decrypted (the sender is repeating the wrapper). Otherwise the referenced
//! signed and one-time prekeys are loaded, the responder state is built and
//! promoted, and the embedded message is decrypted against it.

use crate::address::ProtocolAddress;
use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::keys::{KeyPair, PublicKey};
use crate::prekey::PreKeyBundle;
use crate::protocol::PreKeyWhisperMessage;
use crate::ratchet::{AliceParameters, BobParameters, initialize_alice_session, initialize_bob_session};
use crate::record::SessionRecord;
use crate::session_cipher::decrypt_with_record;
use crate::storage::ProtocolStore;
use rand_core::CryptoRngCore;
use tracing::{debug, info, warn};

/// Result of processing a prekey message. Nothing has been stored yet; the
/// caller commits `record`, pins `remote_identity` and removes the consumed
/// prekey.
#[derive(Debug)]
pub struct PreKeyOutcome {
    pub plaintext: Vec<u8>,
    pub record: SessionRecord,
    /// One-time prekey used to build a new session, if any
    pub consumed_pre_key_id: Option<u32>,
    pub remote_identity: PublicKey,
}

/// Builds sessions with one remote address.
pub struct SessionBuilder<S> {
    store: S,
    remote: ProtocolAddress,
    config: ProtocolConfig,
}

impl<S: ProtocolStore> SessionBuilder<S> {
    /// Creates a builder. Fails if `config` is out of range.
    pub fn new(store: S, remote: ProtocolAddress, config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            remote,
            config,
        })
    }

    /// Starts a session from a fetched bundle.
    pub fn process_pre_key_bundle<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        bundle: &PreKeyBundle,
    ) -> Result<()> {
        let locks = self.store.session_locks();
        let remote = self.remote.clone();
        locks.with_lock(&remote, || self.process_bundle_locked(rng, bundle))
    }

    fn process_bundle_locked<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        bundle: &PreKeyBundle,
    ) -> Result<()> {
        if !self
            .store
            .is_trusted_identity(&self.remote, &bundle.identity_key)?
        {
            warn!(remote = %self.remote, "bundle identity does not match pinned identity");
            return Err(Error::UntrustedIdentity(self.remote.to_string()));
        }
        if let Err(err) = bundle.verify_signature() {
            warn!(remote = %self.remote, "bundle has a bad signed prekey signature");
            return Err(err);
        }

        let parameters = AliceParameters {
            our_identity_key_pair: self.store.identity_key_pair()?,
            our_base_key_pair: KeyPair::generate(rng),
            their_identity_key: bundle.identity_key,
            their_signed_pre_key_id: bundle.signed_pre_key_id,
            their_signed_pre_key: bundle.signed_pre_key_public,
            their_one_time_pre_key: bundle.pre_key,
            their_ratchet_key: bundle.signed_pre_key_public,
        };
        let mut state = initialize_alice_session(rng, &parameters, &self.config)?;
        state.set_local_registration_id(self.store.local_registration_id()?);
        state.set_remote_registration_id(bundle.registration_id);

        let mut record = self.store.load_session(&self.remote)?;
        record.promote_state(state, self.config.max_archived_states);

        self.store.save_identity(&self.remote, &bundle.identity_key)?;
        self.store.store_session(&self.remote, &record)?;

        info!(
            remote = %self.remote,
            signed_pre_key_id = bundle.signed_pre_key_id,
            one_time_pre_key = bundle.pre_key.is_some(),
            "session initiated from prekey bundle"
        );
        Ok(())
    }

    /// Builds (if needed) the responder session for `message` on top of
    /// `record` and decrypts the embedded message. See [`PreKeyOutcome`].
    pub fn process_pre_key_whisper_message<R: CryptoRngCore>(
        &self,
        rng: &mut R,
        record: SessionRecord,
        message: &PreKeyWhisperMessage,
    ) -> Result<PreKeyOutcome> {
        process_pre_key_whisper_message(&self.store, &self.remote, &self.config, rng, record, message)
    }
}

pub(crate) fn process_pre_key_whisper_message<S: ProtocolStore, R: CryptoRngCore>(
    store: &S,
    remote: &ProtocolAddress,
    config: &ProtocolConfig,
    rng: &mut R,
    mut record: SessionRecord,
    message: &PreKeyWhisperMessage,
) -> Result<PreKeyOutcome> {
    let remote_identity = *message.identity_key();
    if !store.is_trusted_identity(remote, &remote_identity)? {
        warn!(remote = %remote, "prekey message from untrusted identity");
        return Err(Error::UntrustedIdentity(remote.to_string()));
    }

    let consumed_pre_key_id =
        if record.has_session_state(message.message_version(), message.base_key()) {
            debug!(remote = %remote, "prekey message for an existing session");
            // A prekey left behind by an earlier failed removal is still spent
            match message.pre_key_id() {
                Some(id) if store.contains_pre_key(id)? => Some(id),
                _ => None,
            }
        } else {
            let signed_pre_key = store
                .load_signed_pre_key(message.signed_pre_key_id())?
                .ok_or(Error::InvalidSignedPreKeyId(message.signed_pre_key_id()))?;
            let one_time_pre_key = match message.pre_key_id() {
                Some(id) => Some(store.load_pre_key(id)?.ok_or(Error::InvalidPreKeyId(id))?),
                None => None,
            };

            let parameters = BobParameters {
                our_identity_key_pair: store.identity_key_pair()?,
                our_signed_pre_key_pair: signed_pre_key.key_pair.clone(),
                our_one_time_pre_key_pair: one_time_pre_key.map(|record| record.key_pair),
                our_ratchet_key_pair: signed_pre_key.key_pair,
                their_identity_key: remote_identity,
                their_base_key: *message.base_key(),
            };
            let mut state = initialize_bob_session(&parameters, config)?;
            state.set_local_registration_id(store.local_registration_id()?);
            state.set_remote_registration_id(message.registration_id());
            record.promote_state(state, config.max_archived_states);

            info!(
                remote = %remote,
                signed_pre_key_id = message.signed_pre_key_id(),
                pre_key_id = ?message.pre_key_id(),
                "session established from prekey message"
            );
            message.pre_key_id()
        };

    let plaintext = decrypt_with_record(rng, &mut record, message.message(), config, remote)?;

    Ok(PreKeyOutcome {
        plaintext,
        record,
        consumed_pre_key_id,
        remote_identity,
    })
}
