//! Session-based Double Ratchet engine for the Signal/Axolotl wire protocol.
//!
//! This crate establishes end-to-end encrypted sessions from published
//! prekey bundles and then ratchets them forward message by message. It
//! speaks message version 3: Curve25519 keys, HKDF-SHA256 key derivation,
//! AES-256-CBC payloads and truncated HMAC-SHA256 authentication.
//!
//! # Security Properties
//!
//! ## Forward Secrecy
//! Message keys are derived one-way from chain keys and dropped after use.
//! Only keys for skipped, not yet received messages are cached, and that
//! cache is bounded.
//!
//! ## Break-in Recovery
//! Each reply carries a fresh ratchet key. The DH ratchet step it triggers
//! mixes new secret material into the root key, so a compromised state
//! stops being useful after one round trip.
//!
//! ## Asynchronous Operation
//! An initiator encrypts against a prekey bundle while the responder is
//! offline. Messages are wrapped with the session setup data until the
//! responder first replies.
//!
//! # Threat Model
//!
//! **Assumed adversary capabilities:**
//! - Active network attacker (inject, modify, delay, drop, replay messages)
//! - Later compromise of long-term identity keys
//!
//! **Security assumptions:**
//! - X25519 ECDH provides computational security
//! - HKDF-SHA256 and HMAC-SHA256 are secure PRFs
//! - Identity keys are verified out of band (or trusted on first use)
//! - Random number generator is cryptographically secure
//!
//! # Protocol Flow
//!
//! ```rust
//! use rand_core::OsRng;
//! use whisper_session::{
//!     CiphertextMessage, IdentityKeyPair, InMemoryProtocolStore, PreKeyBundle, ProtocolAddress,
//!     ProtocolConfig, SessionBuilder, SessionCipher, generate_pre_keys, generate_signed_pre_key,
//! };
//! use whisper_session::storage::{PreKeyStore, SignedPreKeyStore};
//!
//! let config = ProtocolConfig::default();
//! let alice_store = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);
//! let bob_identity = IdentityKeyPair::generate(&mut OsRng);
//! let mut bob_store = InMemoryProtocolStore::new(bob_identity.clone(), 2);
//!
//! // Bob publishes a bundle and keeps the private halves
//! let signed = generate_signed_pre_key(&mut OsRng, &bob_identity, 1, 0)?;
//! let one_time = generate_pre_keys(&mut OsRng, 1, 1).remove(0);
//! let bundle = PreKeyBundle {
//!     registration_id: 2,
//!     device_id: 1,
//!     pre_key: Some((one_time.id, one_time.key_pair.public_key)),
//!     signed_pre_key_id: signed.id,
//!     signed_pre_key_public: signed.key_pair.public_key,
//!     signed_pre_key_signature: signed.signature.clone(),
//!     identity_key: bob_identity.public_key(),
//! };
//! bob_store.store_signed_pre_key(signed)?;
//! bob_store.store_pre_key(one_time)?;
//!
//! // Alice builds a session from the bundle and encrypts
//! let bob = ProtocolAddress::new("bob", 1);
//! SessionBuilder::new(alice_store.clone(), bob.clone(), config)?
//!     .process_pre_key_bundle(&mut OsRng, &bundle)?;
//! let mut alice = SessionCipher::new(alice_store, bob, config)?;
//! let first = alice.encrypt(b"hello")?;
//! assert!(matches!(first, CiphertextMessage::PreKeyWrapped(_)));
//!
//! // Bob decrypts, which builds his side of the session, and replies
//! let mut bob = SessionCipher::new(bob_store, ProtocolAddress::new("alice", 1), config)?;
//! assert_eq!(bob.decrypt(&mut OsRng, &first)?, b"hello");
//! let reply = bob.encrypt(b"hi back")?;
//! assert_eq!(alice.decrypt(&mut OsRng, &reply)?, b"hi back");
//!
//! // From now on both directions use plain Whisper messages
//! assert!(matches!(alice.encrypt(b"third")?, CiphertextMessage::Plain(_)));
//! # Ok::<(), whisper_session::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`session_builder`]: session establishment from bundles and prekey messages
//! - [`session_cipher`]: encrypt/decrypt facade
//! - [`ratchet`]: root, chain and message keys; initial key agreement
//! - [`state`] / [`record`]: per-session ratchet state and per-device records
//! - [`protocol`]: wire messages
//! - [`prekey`]: bundles, prekey records and generators
//! - [`storage`]: store traits and in-memory implementations
//! - [`crypto`]: KDF, AES-CBC and MAC primitives
//! - [`keys`] / [`xeddsa`]: Curve25519 keys and signatures
//! - [`config`], [`locks`], [`address`], [`error`]

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_fields_in_debug,
    clippy::module_name_repetitions
)]

pub mod address;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod locks;
pub mod prekey;
pub mod protocol;
pub mod ratchet;
pub mod record;
pub mod session_builder;
pub mod session_cipher;
pub mod state;
pub mod storage;
pub mod xeddsa;

// Re-export main types
pub use address::ProtocolAddress;
pub use config::{CURRENT_VERSION, ProtocolConfig};
pub use error::{Error, Result};
pub use keys::{IdentityKeyPair, KeyPair, PublicKey, SecretKey};
pub use locks::SessionLocks;
pub use prekey::{
    PreKeyBundle, PreKeyRecord, SignedPreKeyRecord, generate_pre_keys, generate_registration_id,
    generate_signed_pre_key,
};
pub use protocol::{CiphertextMessage, CiphertextMessageType, PreKeyWhisperMessage, WhisperMessage};
pub use record::SessionRecord;
pub use session_builder::{PreKeyOutcome, SessionBuilder};
pub use session_cipher::SessionCipher;
pub use state::SessionState;
pub use storage::{InMemoryProtocolStore, ProtocolStore};
