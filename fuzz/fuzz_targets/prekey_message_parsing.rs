//! Fuzz target for prekey message parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use whisper_session::PreKeyWhisperMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = PreKeyWhisperMessage::parse(data, 8) {
        assert_eq!(message.serialized(), data);

        // The embedded message was parsed as well and is itself consistent
        let inner = message.message();
        assert_eq!(inner.message_version(), message.message_version());
        let reparsed = whisper_session::WhisperMessage::parse(inner.serialized(), 8)
            .expect("embedded message reparse should succeed");
        assert_eq!(reparsed.counter(), inner.counter());
    }
});
