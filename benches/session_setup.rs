use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand_core::OsRng;
use whisper_session::storage::{PreKeyStore, SignedPreKeyStore};
use whisper_session::{
    IdentityKeyPair, InMemoryProtocolStore, PreKeyBundle, ProtocolAddress, ProtocolConfig,
    SessionBuilder, SessionCipher, SessionRecord, generate_pre_keys, generate_signed_pre_key,
};

fn publish(identity: &IdentityKeyPair, store: &mut InMemoryProtocolStore) -> PreKeyBundle {
    let signed = generate_signed_pre_key(&mut OsRng, identity, 1, 0).unwrap();
    let one_time = generate_pre_keys(&mut OsRng, 1, 1).remove(0);
    let bundle = PreKeyBundle {
        registration_id: 2,
        device_id: 1,
        pre_key: Some((one_time.id, one_time.key_pair.public_key)),
        signed_pre_key_id: signed.id,
        signed_pre_key_public: signed.key_pair.public_key,
        signed_pre_key_signature: signed.signature.clone(),
        identity_key: identity.public_key(),
    };
    store.store_signed_pre_key(signed).unwrap();
    store.store_pre_key(one_time).unwrap();
    bundle
}

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_generation");

    group.bench_function("identity_keypair", |b| {
        b.iter(|| black_box(IdentityKeyPair::generate(&mut OsRng)));
    });

    group.bench_function("signed_pre_key", |b| {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        b.iter(|| black_box(generate_signed_pre_key(&mut OsRng, &identity, 1, 0).unwrap()));
    });

    group.finish();
}

fn bench_session_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_setup");
    let config = ProtocolConfig::default();
    let bob_address = ProtocolAddress::new("bob", 1);

    let bob_identity = IdentityKeyPair::generate(&mut OsRng);
    let mut bob_store = InMemoryProtocolStore::new(bob_identity.clone(), 2);
    let bundle = publish(&bob_identity, &mut bob_store);

    group.bench_function("process_pre_key_bundle", |b| {
        let alice_store = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);
        let mut builder = SessionBuilder::new(alice_store, bob_address.clone(), config).unwrap();
        b.iter(|| black_box(builder.process_pre_key_bundle(&mut OsRng, &bundle).unwrap()));
    });

    group.bench_function("process_pre_key_message", |b| {
        let alice_store = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);
        SessionBuilder::new(alice_store.clone(), bob_address.clone(), config)
            .unwrap()
            .process_pre_key_bundle(&mut OsRng, &bundle)
            .unwrap();
        let mut alice = SessionCipher::new(alice_store, bob_address.clone(), config).unwrap();
        let whisper_session::CiphertextMessage::PreKeyWrapped(message) =
            alice.encrypt(b"hello").unwrap()
        else {
            unreachable!("first message is always wrapped");
        };

        // Bob's store is never written, so each iteration starts from scratch
        let builder =
            SessionBuilder::new(bob_store.clone(), ProtocolAddress::new("alice", 1), config)
                .unwrap();
        b.iter(|| {
            black_box(
                builder
                    .process_pre_key_whisper_message(&mut OsRng, SessionRecord::new_fresh(), &message)
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_signature_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_verification");

    let identity = IdentityKeyPair::generate(&mut OsRng);
    let mut store = InMemoryProtocolStore::new(identity.clone(), 2);
    let bundle = publish(&identity, &mut store);

    group.bench_function("verify_bundle_signature", |b| {
        b.iter(|| black_box(bundle.verify_signature().unwrap()));
    });

    group.finish();
}

fn bench_pre_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("pre_key_generation");

    for count in [10, 50, 100, 500, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(generate_pre_keys(&mut OsRng, 1, count)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_key_generation,
    bench_session_setup,
    bench_signature_verification,
    bench_pre_key_generation
);

criterion_main!(benches);
