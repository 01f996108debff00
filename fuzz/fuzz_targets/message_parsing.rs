//! Fuzz target for Whisper message parsing
//!
//! Tests that arbitrary message data doesn't cause panics or undefined behavior

#![no_main]

use libfuzzer_sys::fuzz_target;
use whisper_session::{CiphertextMessage, CiphertextMessageType, WhisperMessage};

const MAC_LENGTH: usize = 8;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = WhisperMessage::parse(data, MAC_LENGTH) else {
        return;
    };

    // Parsing keeps the exact wire bytes
    assert_eq!(message.serialized(), data);
    assert!(message.body().len() + MAC_LENGTH < data.len());

    // Reparsing through the envelope agrees on every field
    let roundtrip = CiphertextMessage::parse(CiphertextMessageType::Whisper, data, MAC_LENGTH)
        .expect("reparse should succeed");
    let CiphertextMessage::Plain(roundtrip) = roundtrip else {
        panic!("whisper type must parse as a plain message");
    };
    assert_eq!(message.counter(), roundtrip.counter());
    assert_eq!(message.previous_counter(), roundtrip.previous_counter());
    assert_eq!(message.sender_ratchet_key(), roundtrip.sender_ratchet_key());
});
