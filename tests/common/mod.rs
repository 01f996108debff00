//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use rand_core::CryptoRngCore;
use whisper_session::storage::{PreKeyStore, SignedPreKeyStore};
use whisper_session::{
    IdentityKeyPair, InMemoryProtocolStore, PreKeyBundle, ProtocolAddress, ProtocolConfig,
    SessionBuilder, SessionCipher, generate_pre_keys, generate_registration_id,
    generate_signed_pre_key,
};

/// One device: its address, identity and stores.
pub struct Party {
    pub address: ProtocolAddress,
    pub identity: IdentityKeyPair,
    pub registration_id: u32,
    pub store: InMemoryProtocolStore,
    next_pre_key_id: u32,
    next_signed_pre_key_id: u32,
}

impl Party {
    pub fn new<R: CryptoRngCore>(rng: &mut R, name: &str) -> Self {
        let identity = IdentityKeyPair::generate(rng);
        let registration_id = generate_registration_id(rng);
        Self {
            address: ProtocolAddress::new(name, 1),
            store: InMemoryProtocolStore::new(identity.clone(), registration_id),
            identity,
            registration_id,
            next_pre_key_id: 1,
            next_signed_pre_key_id: 1,
        }
    }

    /// Generates fresh prekeys, keeps the private halves and returns the
    /// public bundle.
    pub fn publish_bundle<R: CryptoRngCore>(&mut self, rng: &mut R, one_time: bool) -> PreKeyBundle {
        let signed = generate_signed_pre_key(
            rng,
            &self.identity,
            self.next_signed_pre_key_id,
            1_700_000_000_000,
        )
        .unwrap();
        self.next_signed_pre_key_id += 1;

        let pre_key = one_time.then(|| {
            let record = generate_pre_keys(rng, self.next_pre_key_id, 1).remove(0);
            self.next_pre_key_id += 1;
            record
        });

        let bundle = PreKeyBundle {
            registration_id: self.registration_id,
            device_id: self.address.device_id(),
            pre_key: pre_key
                .as_ref()
                .map(|record| (record.id, record.key_pair.public_key)),
            signed_pre_key_id: signed.id,
            signed_pre_key_public: signed.key_pair.public_key,
            signed_pre_key_signature: signed.signature.clone(),
            identity_key: self.identity.public_key(),
        };

        self.store.store_signed_pre_key(signed).unwrap();
        if let Some(record) = pre_key {
            self.store.store_pre_key(record).unwrap();
        }
        bundle
    }

    pub fn builder_for(
        &self,
        remote: &ProtocolAddress,
        config: ProtocolConfig,
    ) -> SessionBuilder<InMemoryProtocolStore> {
        SessionBuilder::new(self.store.clone(), remote.clone(), config).unwrap()
    }

    pub fn cipher_for(
        &self,
        remote: &ProtocolAddress,
        config: ProtocolConfig,
    ) -> SessionCipher<InMemoryProtocolStore> {
        SessionCipher::new(self.store.clone(), remote.clone(), config).unwrap()
    }
}

/// Alice has processed Bob's bundle; no message has been sent yet.
pub fn initiated_pair<R: CryptoRngCore>(rng: &mut R, config: ProtocolConfig) -> (Party, Party) {
    let alice = Party::new(rng, "alice");
    let mut bob = Party::new(rng, "bob");

    let bundle = bob.publish_bundle(rng, true);
    alice
        .builder_for(&bob.address, config)
        .process_pre_key_bundle(rng, &bundle)
        .unwrap();

    (alice, bob)
}

/// Both sides hold a confirmed session: one message each way has been
/// exchanged, so further messages are plain Whisper messages.
pub fn confirmed_pair<R: CryptoRngCore>(
    rng: &mut R,
    config: ProtocolConfig,
) -> (
    Party,
    Party,
    SessionCipher<InMemoryProtocolStore>,
    SessionCipher<InMemoryProtocolStore>,
) {
    let (alice, bob) = initiated_pair(rng, config);
    let mut alice_cipher = alice.cipher_for(&bob.address, config);
    let mut bob_cipher = bob.cipher_for(&alice.address, config);

    let hello = alice_cipher.encrypt(b"hello").unwrap();
    bob_cipher.decrypt(rng, &hello).unwrap();
    let reply = bob_cipher.encrypt(b"hi back").unwrap();
    alice_cipher.decrypt(rng, &reply).unwrap();

    (alice, bob, alice_cipher, bob_cipher)
}
