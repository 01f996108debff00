//! Fuzz target for payload encryption/decryption with corrupted inputs
//!
//! Ensures decryption failures don't cause panics or memory unsafety

#![no_main]

use libfuzzer_sys::fuzz_target;
use whisper_session::crypto::{IV_SIZE, aes_256_cbc_decrypt, aes_256_cbc_encrypt, hmac_sha256, mac_matches};

fuzz_target!(|data: &[u8]| {
    if data.len() < 32 + IV_SIZE {
        return;
    }

    // Extract components from fuzz data
    let key: [u8; 32] = data[..32].try_into().unwrap();
    let iv: [u8; IV_SIZE] = data[32..32 + IV_SIZE].try_into().unwrap();
    let plaintext = &data[32 + IV_SIZE..];

    // Encryption should never fail for a well-sized key and IV
    let ciphertext = aes_256_cbc_encrypt(&key, &iv, plaintext).expect("encryption should succeed");
    assert_eq!(ciphertext.len() % IV_SIZE, 0);
    assert!(ciphertext.len() > plaintext.len());

    let decrypted = aes_256_cbc_decrypt(&key, &iv, &ciphertext).expect("decryption should succeed");
    assert_eq!(decrypted, plaintext);

    // Corrupted or truncated ciphertext must fail gracefully
    let mut corrupted = ciphertext.clone();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 1;
    let _ = aes_256_cbc_decrypt(&key, &iv, &corrupted);
    let _ = aes_256_cbc_decrypt(&key, &iv, &ciphertext[..last]);
    let _ = aes_256_cbc_decrypt(&key, &iv, plaintext);

    // A truncated MAC never matches the full tag
    let mac = hmac_sha256(&key, &[plaintext]);
    assert!(mac_matches(&mac, &mac));
    assert!(!mac_matches(&mac, &mac[..8]));
});
