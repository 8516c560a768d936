#![no_main]

use action_protocol::core::envelope::{decode_document, Envelope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary inbound lines must decode or fail cleanly
    if let Ok(document) = decode_document(data) {
        let _ = Envelope::from_document(document);
    }
});
