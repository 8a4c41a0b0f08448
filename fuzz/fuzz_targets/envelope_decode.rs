//! Fuzz target for loopback envelope decoding
//!
//! # Invariants
//!
//! - NEVER panic on malformed CBOR
//! - Oversized bodies are rejected before parsing
//! - Anything that decodes re-encodes and decodes to the same value

#![no_main]

use echoseal_harness::wire::{self, RequestEnvelope, ResponseEnvelope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = wire::decode::<RequestEnvelope>(data) {
        let encoded = wire::encode(&request).expect("decoded request must re-encode");
        let again: RequestEnvelope = wire::decode(&encoded).expect("re-encoded request must decode");
        assert_eq!(request, again);
    }

    if let Ok(response) = wire::decode::<ResponseEnvelope>(data) {
        let encoded = wire::encode(&response).expect("decoded response must re-encode");
        let again: ResponseEnvelope = wire::decode(&encoded).expect("re-encoded response must decode");
        assert_eq!(response, again);
    }
});
