use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_core::OsRng;
use whisper_session::ratchet::{
    AliceParameters, BobParameters, initialize_alice_session, initialize_bob_session,
};
use whisper_session::{
    Error, IdentityKeyPair, KeyPair, PreKeyBundle, ProtocolAddress, ProtocolConfig,
    SessionBuilder, SessionRecord, SessionState, generate_signed_pre_key,
};

struct Setup {
    alice: AliceParameters,
    bob: BobParameters,
}

fn setup(with_one_time: bool) -> Setup {
    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let bob_identity = IdentityKeyPair::generate(&mut OsRng);
    let alice_base = KeyPair::generate(&mut OsRng);
    let bob_signed = KeyPair::generate(&mut OsRng);
    let bob_one_time = with_one_time.then(|| KeyPair::generate(&mut OsRng));

    Setup {
        alice: AliceParameters {
            our_identity_key_pair: alice_identity.clone(),
            our_base_key_pair: alice_base.clone(),
            their_identity_key: bob_identity.public_key(),
            their_signed_pre_key_id: 1,
            their_signed_pre_key: bob_signed.public_key,
            their_one_time_pre_key: bob_one_time.as_ref().map(|pair| (1, pair.public_key)),
            their_ratchet_key: bob_signed.public_key,
        },
        bob: BobParameters {
            our_identity_key_pair: bob_identity,
            our_signed_pre_key_pair: bob_signed.clone(),
            our_one_time_pre_key_pair: bob_one_time,
            our_ratchet_key_pair: bob_signed,
            their_identity_key: alice_identity.public_key(),
            their_base_key: alice_base.public_key,
        },
    }
}

fn agree(setup: &Setup) -> (SessionState, SessionState) {
    let config = ProtocolConfig::default();
    let alice = initialize_alice_session(&mut OsRng, &setup.alice, &config).unwrap();
    let bob = initialize_bob_session(&setup.bob, &config).unwrap();
    (alice, bob)
}

fn chains_agree(alice: &SessionState, bob: &SessionState) -> bool {
    let bob_sending = bob.sender_chain_key().unwrap();
    alice
        .receiver_chain_key(&bob.sender_ratchet_key().unwrap())
        .is_some_and(|receiving| receiving.key() == bob_sending.key())
}

#[test]
fn test_session_agreement_multiple_runs() {
    for run in 0..100 {
        let setup = setup(run % 2 == 0);
        let (alice, bob) = agree(&setup);

        assert!(chains_agree(&alice, &bob), "session agreement violated");
        assert_eq!(alice.alice_base_key(), bob.alice_base_key());
        assert_eq!(alice.remote_identity_key(), bob.local_identity_key());
        assert_eq!(bob.remote_identity_key(), alice.local_identity_key());
    }
}

#[test]
fn test_identity_substitution_breaks_agreement() {
    let mut setup = setup(true);
    setup.bob.their_identity_key = IdentityKeyPair::generate(&mut OsRng).public_key();

    let (alice, bob) = agree(&setup);
    assert!(!chains_agree(&alice, &bob), "substituted identity must not agree");
}

#[test]
fn test_one_time_prekey_is_mixed_in() {
    let mut setup = setup(true);
    // Bob lost the one-time prekey Alice used
    setup.bob.our_one_time_pre_key_pair = None;

    let (alice, bob) = agree(&setup);
    assert!(!chains_agree(&alice, &bob));
}

#[test]
fn test_dh_input_sensitivity() {
    let setup = setup(false);
    let (first, _) = agree(&setup);

    let mut other = Setup {
        alice: setup.alice.clone(),
        bob: setup.bob.clone(),
    };
    other.alice.our_base_key_pair = KeyPair::generate(&mut OsRng);
    let (second, _) = agree(&other);

    let ratchet_key = setup.alice.their_ratchet_key;
    assert_ne!(
        first.receiver_chain_key(&ratchet_key).unwrap().key(),
        second.receiver_chain_key(&ratchet_key).unwrap().key(),
        "changing DH inputs must change the chain"
    );
}

#[test]
fn test_root_chain_key_separation() {
    let setup = setup(true);
    let (alice, bob) = agree(&setup);

    let sending = alice.sender_chain_key().unwrap();
    let receiving = alice
        .receiver_chain_key(&setup.alice.their_ratchet_key)
        .unwrap();
    assert_ne!(alice.root_key().key(), sending.key());
    assert_ne!(alice.root_key().key(), receiving.key());
    assert_ne!(sending.key(), receiving.key());
    assert_ne!(bob.root_key().key(), bob.sender_chain_key().unwrap().key());

    let keys = sending.message_keys();
    assert_ne!(keys.cipher_key(), keys.mac_key());
    assert_ne!(keys.cipher_key(), sending.key());
}

#[test]
fn test_chain_keys_never_repeat() {
    let setup = setup(false);
    let (_, bob) = agree(&setup);

    let mut chain = bob.sender_chain_key().unwrap();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..200 {
        assert!(seen.insert(*chain.key()));
        assert!(seen.insert(*chain.message_keys().cipher_key()));
        chain = chain.next().unwrap();
    }
    assert_eq!(chain.index(), 200);
}

#[test]
fn test_signature_bound_to_signed_pre_key() {
    let mut rng = StdRng::seed_from_u64(7);
    let identity = IdentityKeyPair::generate(&mut rng);
    let first = generate_signed_pre_key(&mut rng, &identity, 1, 0).unwrap();
    let second = generate_signed_pre_key(&mut rng, &identity, 2, 0).unwrap();

    let bundle = |signature: Vec<u8>| PreKeyBundle {
        registration_id: 1,
        device_id: 1,
        pre_key: None,
        signed_pre_key_id: second.id,
        signed_pre_key_public: second.key_pair.public_key,
        signed_pre_key_signature: signature,
        identity_key: identity.public_key(),
    };

    assert!(bundle(second.signature.clone()).verify_signature().is_ok());
    // A valid signature over a different prekey does not transfer
    assert_eq!(
        bundle(first.signature.clone()).verify_signature(),
        Err(Error::InvalidSignature)
    );

    let alice = whisper_session::InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 9);
    let result = SessionBuilder::new(alice, ProtocolAddress::new("bob", 1), ProtocolConfig::default())
        .unwrap()
        .process_pre_key_bundle(&mut rng, &bundle(first.signature.clone()));
    assert_eq!(result, Err(Error::InvalidSignature));
}

#[test]
fn test_record_persistence_preserves_agreement() {
    let setup = setup(true);
    let (alice, bob) = agree(&setup);

    let mut record = SessionRecord::new(alice);
    record.promote_state(bob.clone(), 40);
    let restored = SessionRecord::deserialize(&record.serialize().unwrap()).unwrap();

    let current = restored.session_state().unwrap();
    assert_eq!(current.sender_chain_key().unwrap().key(), bob.sender_chain_key().unwrap().key());
    assert_eq!(restored.previous_session_count(), 1);

    let archived = restored.previous_session_states().next().unwrap();
    assert!(chains_agree(archived, current));
}
