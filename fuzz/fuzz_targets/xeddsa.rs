#![no_main]

use libfuzzer_sys::fuzz_target;
use whisper_session::PublicKey;
use whisper_session::xeddsa::{SIGNATURE_LENGTH, XEdDSAPublicKey};

fuzz_target!(|data: &[u8]| {
    // Wire-encoded keys must be rejected, not panic, when malformed
    let _ = PublicKey::deserialize(data);

    // Try to verify arbitrary signatures with arbitrary public keys
    if data.len() >= 32 + SIGNATURE_LENGTH {
        let public_bytes: [u8; 32] = data[0..32].try_into().unwrap();
        let signature = &data[32..32 + SIGNATURE_LENGTH];
        let message = &data[32 + SIGNATURE_LENGTH..];

        let public = PublicKey::from_bytes(public_bytes);

        // Verification should not panic, will likely fail
        let _ = public.verify_signature(message, signature);

        if let Ok(xeddsa_public) = XEdDSAPublicKey::from_x25519_public(&public) {
            let signature: [u8; SIGNATURE_LENGTH] = signature.try_into().unwrap();
            let _ = xeddsa_public.verify(message, &signature);
        }
    }
});
