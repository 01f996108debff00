//! Ratchet state of a single session.
//!
//! A [`SessionState`] holds the root key, at most one sending chain and a
//! bounded list of receiving chains, each keyed by the remote ratchet public
//! key that opened it. Receiving chains carry their own cache of skipped
//! message keys for out-of-order delivery.

use crate::error::{Error, Result};
use crate::keys::{KeyPair, PublicKey};
use crate::ratchet::{ChainKey, MessageKeys, RootKey};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cached message keys for counters skipped within one receiving chain.
///
/// Newest keys sit at the front. When the cache grows past its capacity the
/// oldest keys are evicted; a message whose key was evicted can no longer be
/// decrypted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SkippedMessageKeys {
    keys: VecDeque<MessageKeys>,
}

impl SkippedMessageKeys {
    /// Caches `keys`, evicting the oldest entries beyond `max_keys`.
    pub fn insert(&mut self, keys: MessageKeys, max_keys: usize) {
        self.keys.push_front(keys);
        while self.keys.len() > max_keys {
            self.keys.pop_back();
        }
    }

    /// Removes and returns the keys for `counter`, if cached.
    pub fn take(&mut self, counter: u32) -> Option<MessageKeys> {
        let position = self.keys.iter().position(|k| k.counter() == counter)?;
        self.keys.remove(position)
    }

    /// Number of cached keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SenderChain {
    ratchet_key: KeyPair,
    chain_key: ChainKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ReceiverChain {
    ratchet_key: PublicKey,
    chain_key: ChainKey,
    message_keys: SkippedMessageKeys,
}

/// Prekey identifiers the initiator repeats in every outgoing message until
/// the responder first replies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    /// One-time prekey consumed from the bundle, if any
    pub pre_key_id: Option<u32>,
    /// Signed prekey used from the bundle
    pub signed_pre_key_id: u32,
    /// Initiator's base key
    pub base_key: PublicKey,
}

/// Full ratchet state for one session with one remote device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    session_version: u8,
    local_identity_key: PublicKey,
    remote_identity_key: PublicKey,
    root_key: RootKey,
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    receiver_chains: VecDeque<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    alice_base_key: PublicKey,
}

impl SessionState {
    pub(crate) fn new(
        session_version: u8,
        local_identity_key: PublicKey,
        remote_identity_key: PublicKey,
        root_key: RootKey,
        alice_base_key: PublicKey,
    ) -> Self {
        Self {
            session_version,
            local_identity_key,
            remote_identity_key,
            root_key,
            previous_counter: 0,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            local_registration_id: 0,
            remote_registration_id: 0,
            alice_base_key,
        }
    }

    #[must_use]
    pub fn session_version(&self) -> u8 {
        self.session_version
    }

    #[must_use]
    pub fn local_identity_key(&self) -> &PublicKey {
        &self.local_identity_key
    }

    #[must_use]
    pub fn remote_identity_key(&self) -> &PublicKey {
        &self.remote_identity_key
    }

    /// Base key the initiator used to open this session. Identifies the
    /// session when a prekey message is delivered more than once.
    #[must_use]
    pub fn alice_base_key(&self) -> &PublicKey {
        &self.alice_base_key
    }

    #[must_use]
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub(crate) fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = root_key;
    }

    /// Length of our previous sending chain, echoed in outgoing headers
    #[must_use]
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub(crate) fn set_previous_counter(&mut self, counter: u32) {
        self.previous_counter = counter;
    }

    /// Whether this state can encrypt.
    #[must_use]
    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    /// Our current sending ratchet public key.
    pub fn sender_ratchet_key(&self) -> Result<PublicKey> {
        Ok(self.sender_ratchet_key_pair()?.public_key)
    }

    pub(crate) fn sender_ratchet_key_pair(&self) -> Result<&KeyPair> {
        self.sender_chain
            .as_ref()
            .map(|chain| &chain.ratchet_key)
            .ok_or(Error::InvalidState("missing sender chain"))
    }

    /// Current sending chain key.
    pub fn sender_chain_key(&self) -> Result<ChainKey> {
        self.sender_chain
            .as_ref()
            .map(|chain| chain.chain_key.clone())
            .ok_or(Error::InvalidState("missing sender chain"))
    }

    pub(crate) fn set_sender_chain(&mut self, ratchet_key: KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain {
            ratchet_key,
            chain_key,
        });
    }

    pub(crate) fn set_sender_chain_key(&mut self, chain_key: ChainKey) -> Result<()> {
        let chain = self
            .sender_chain
            .as_mut()
            .ok_or(Error::InvalidState("missing sender chain"))?;
        chain.chain_key = chain_key;
        Ok(())
    }

    fn receiver_chain(&self, sender: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|chain| &chain.ratchet_key == sender)
    }

    fn receiver_chain_mut(&mut self, sender: &PublicKey) -> Result<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| &chain.ratchet_key == sender)
            .ok_or(Error::InvalidState("missing receiver chain"))
    }

    /// Chain key of the receiving chain opened by `sender`, if any.
    #[must_use]
    pub fn receiver_chain_key(&self, sender: &PublicKey) -> Option<ChainKey> {
        self.receiver_chain(sender)
            .map(|chain| chain.chain_key.clone())
    }

    /// Whether a receiving chain exists for `sender`.
    #[must_use]
    pub fn has_receiver_chain(&self, sender: &PublicKey) -> bool {
        self.receiver_chain(sender).is_some()
    }

    /// Number of receiving chains held.
    #[must_use]
    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    /// Adds a receiving chain, dropping the oldest beyond `max_chains`.
    pub(crate) fn add_receiver_chain(
        &mut self,
        sender: PublicKey,
        chain_key: ChainKey,
        max_chains: usize,
    ) {
        self.receiver_chains.push_back(ReceiverChain {
            ratchet_key: sender,
            chain_key,
            message_keys: SkippedMessageKeys::default(),
        });
        while self.receiver_chains.len() > max_chains {
            self.receiver_chains.pop_front();
        }
    }

    pub(crate) fn set_receiver_chain_key(
        &mut self,
        sender: &PublicKey,
        chain_key: ChainKey,
    ) -> Result<()> {
        self.receiver_chain_mut(sender)?.chain_key = chain_key;
        Ok(())
    }

    pub(crate) fn cache_message_keys(
        &mut self,
        sender: &PublicKey,
        keys: MessageKeys,
        max_keys: usize,
    ) -> Result<()> {
        self.receiver_chain_mut(sender)?
            .message_keys
            .insert(keys, max_keys);
        Ok(())
    }

    /// Removes the cached keys for `counter` in the chain opened by `sender`.
    pub(crate) fn take_message_keys(
        &mut self,
        sender: &PublicKey,
        counter: u32,
    ) -> Option<MessageKeys> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| &chain.ratchet_key == sender)?
            .message_keys
            .take(counter)
    }

    /// Whether a skipped key for `counter` is cached under `sender`.
    #[must_use]
    pub fn has_message_keys(&self, sender: &PublicKey, counter: u32) -> bool {
        self.receiver_chain(sender).is_some_and(|chain| {
            chain
                .message_keys
                .keys
                .iter()
                .any(|k| k.counter() == counter)
        })
    }

    /// Total skipped keys cached across all receiving chains.
    #[must_use]
    pub fn skipped_message_key_count(&self) -> usize {
        self.receiver_chains
            .iter()
            .map(|chain| chain.message_keys.len())
            .sum()
    }

    pub(crate) fn set_unacknowledged_pre_key_message(
        &mut self,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
    ) {
        self.pending_pre_key = Some(PendingPreKey {
            pre_key_id,
            signed_pre_key_id,
            base_key,
        });
    }

    /// Prekey ids still to be repeated in outgoing messages.
    #[must_use]
    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub(crate) fn clear_unacknowledged_pre_key_message(&mut self) {
        self.pending_pre_key = None;
    }

    #[must_use]
    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub(crate) fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    #[must_use]
    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub(crate) fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SymmetricKey;
    use crate::keys::SecretKey;
    use rand_core::OsRng;

    fn chain(seed: u8, index: u32) -> ChainKey {
        ChainKey::new(SymmetricKey::from_bytes([seed; 32]), index)
    }

    fn empty_state() -> SessionState {
        let identity = SecretKey::generate(&mut OsRng).public_key();
        SessionState::new(
            3,
            identity,
            identity,
            RootKey::new(SymmetricKey::from_bytes([1u8; 32])),
            identity,
        )
    }

    #[test]
    fn test_skipped_keys_evict_oldest() {
        let mut cache = SkippedMessageKeys::default();
        let mut key = chain(9, 0);
        for _ in 0..4 {
            cache.insert(key.message_keys(), 3);
            key = key.next().unwrap();
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.take(0).is_none());
        assert_eq!(cache.take(1).unwrap().counter(), 1);
        assert!(cache.take(1).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_cache_keeps_nothing() {
        let mut cache = SkippedMessageKeys::default();
        cache.insert(chain(9, 0).message_keys(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_receiver_chains_are_bounded() {
        let mut state = empty_state();
        let senders: Vec<PublicKey> = (0..4)
            .map(|_| SecretKey::generate(&mut OsRng).public_key())
            .collect();

        for (i, sender) in senders.iter().enumerate() {
            state.add_receiver_chain(*sender, chain(i as u8, 0), 2);
        }

        assert_eq!(state.receiver_chain_count(), 2);
        assert!(!state.has_receiver_chain(&senders[0]));
        assert!(!state.has_receiver_chain(&senders[1]));
        assert!(state.has_receiver_chain(&senders[3]));
    }

    #[test]
    fn test_message_key_cache_per_chain() {
        let mut state = empty_state();
        let sender = SecretKey::generate(&mut OsRng).public_key();
        let other = SecretKey::generate(&mut OsRng).public_key();
        state.add_receiver_chain(sender, chain(4, 0), 5);

        state
            .cache_message_keys(&sender, chain(4, 2).message_keys(), 10)
            .unwrap();

        assert!(state.has_message_keys(&sender, 2));
        assert!(!state.has_message_keys(&other, 2));
        assert_eq!(state.skipped_message_key_count(), 1);
        assert!(state.take_message_keys(&other, 2).is_none());
        assert!(state.take_message_keys(&sender, 2).is_some());
        assert_eq!(state.skipped_message_key_count(), 0);

        assert!(
            state
                .cache_message_keys(&other, chain(4, 3).message_keys(), 10)
                .is_err()
        );
    }

    #[test]
    fn test_sender_chain_required() {
        let mut state = empty_state();
        assert!(!state.has_sender_chain());
        assert!(matches!(
            state.sender_chain_key(),
            Err(Error::InvalidState(_))
        ));
        assert!(state.set_sender_chain_key(chain(1, 1)).is_err());

        state.set_sender_chain(KeyPair::generate(&mut OsRng), chain(1, 0));
        state.set_sender_chain_key(chain(2, 1)).unwrap();
        assert_eq!(state.sender_chain_key().unwrap().index(), 1);
    }
}
