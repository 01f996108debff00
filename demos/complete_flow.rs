//! Complete example of session setup and ratcheted messaging
//!
//! Two devices establish a session from a prekey bundle and exchange
//! messages, including out-of-order delivery. Run with
//! `RUST_LOG=whisper_session=debug` to see the engine's own logging.

use rand_core::OsRng;
use tracing::info;
use tracing_subscriber::EnvFilter;
use whisper_session::storage::{PreKeyStore, SignedPreKeyStore};
use whisper_session::{
    CiphertextMessage, IdentityKeyPair, InMemoryProtocolStore, PreKeyBundle, ProtocolAddress,
    ProtocolConfig, Result, SessionBuilder, SessionCipher, generate_pre_keys,
    generate_registration_id, generate_signed_pre_key,
};

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ProtocolConfig::default();
    let alice_address = ProtocolAddress::new("alice", 1);
    let bob_address = ProtocolAddress::new("bob", 1);

    // Both devices generate identities and registration ids
    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let bob_identity = IdentityKeyPair::generate(&mut OsRng);
    let bob_registration_id = generate_registration_id(&mut OsRng);
    let alice_store =
        InMemoryProtocolStore::new(alice_identity, generate_registration_id(&mut OsRng));
    let mut bob_store = InMemoryProtocolStore::new(bob_identity.clone(), bob_registration_id);

    // Bob publishes a bundle and keeps the private halves
    let signed = generate_signed_pre_key(&mut OsRng, &bob_identity, 1, 0)?;
    let one_time_keys = generate_pre_keys(&mut OsRng, 1, 100);
    let first = &one_time_keys[0];
    let bundle = PreKeyBundle {
        registration_id: bob_registration_id,
        device_id: bob_address.device_id(),
        pre_key: Some((first.id, first.key_pair.public_key)),
        signed_pre_key_id: signed.id,
        signed_pre_key_public: signed.key_pair.public_key,
        signed_pre_key_signature: signed.signature.clone(),
        identity_key: bob_identity.public_key(),
    };
    bob_store.store_signed_pre_key(signed)?;
    for record in one_time_keys {
        bob_store.store_pre_key(record)?;
    }
    info!(
        pre_keys = bob_store.pre_key_count()?,
        "bob published a prekey bundle"
    );

    // Alice builds her side of the session from the bundle
    SessionBuilder::new(alice_store.clone(), bob_address.clone(), config)?
        .process_pre_key_bundle(&mut OsRng, &bundle)?;
    let mut alice = SessionCipher::new(alice_store, bob_address, config)?;
    let mut bob = SessionCipher::new(bob_store.clone(), alice_address, config)?;

    // First message travels wrapped with the session setup data
    let hello = alice.encrypt(b"Hello Bob! This is Alice.")?;
    info!(
        kind = ?hello.message_type(),
        size = hello.serialize().len(),
        "alice -> bob"
    );
    let received = bob.decrypt(&mut OsRng, &hello)?;
    info!(plaintext = %text(&received), pre_keys = bob_store.pre_key_count()?, "bob received");

    // Bob's reply confirms the session
    let reply = bob.encrypt(b"Hi Alice! How are you?")?;
    info!(kind = ?reply.message_type(), "bob -> alice");
    let received = alice.decrypt(&mut OsRng, &reply)?;
    info!(plaintext = %text(&received), "alice received");

    for message in [
        b"I'm doing great!".as_slice(),
        b"How about you?".as_slice(),
        b"Want to meet up later?".as_slice(),
    ] {
        let encrypted = alice.encrypt(message)?;
        assert!(matches!(encrypted, CiphertextMessage::Plain(_)));
        let decrypted = bob.decrypt(&mut OsRng, &encrypted)?;
        info!(plaintext = %text(&decrypted), "bob received");
    }

    // Out-of-order delivery: sent 1, 2, 3 and received 3, 1, 2
    let m1 = alice.encrypt(b"Message 1")?;
    let m2 = alice.encrypt(b"Message 2")?;
    let m3 = alice.encrypt(b"Message 3")?;
    for message in [&m3, &m1, &m2] {
        let decrypted = bob.decrypt(&mut OsRng, message)?;
        info!(plaintext = %text(&decrypted), "bob received out of order");
    }

    // Replays are rejected
    match bob.decrypt(&mut OsRng, &m2) {
        Err(err) => info!(error = %err, "replay rejected"),
        Ok(_) => unreachable!("replayed message must not decrypt"),
    }

    info!(
        remote_registration_id = alice.remote_registration_id()?,
        version = alice.session_version()?,
        "session established"
    );
    Ok(())
}
