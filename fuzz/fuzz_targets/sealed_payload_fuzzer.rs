//! Fuzz target for sealed payload tampering
//!
//! # Strategy
//!
//! Seal a payload, then flip one byte of the signature, ciphertext or nonce,
//! or rename the sender.
//!
//! # Invariants
//!
//! - The untouched payload always opens to the original bytes
//! - Any tampering is rejected, never silently accepted

#![no_main]

use arbitrary::Arbitrary;
use echoseal_crypto::SymmetricCryptoContext;
use echoseal_harness::wire::{PayloadBody, open_payload, seal_payload};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Tamper {
    None,
    Signature { index: usize, mask: u8 },
    Ciphertext { index: usize, mask: u8 },
    Nonce { index: usize, mask: u8 },
    Sender { suffix: String },
}

#[derive(Debug, Arbitrary)]
struct Input {
    payload: Vec<u8>,
    encrypt: bool,
    nonce: [u8; 12],
    tamper: Tamper,
}

fuzz_target!(|input: Input| {
    let context = SymmetricCryptoContext::from_key_bytes("client", "client", &[1; 16], &[2; 32])
        .expect("static key lengths are valid");
    let nonce = input.encrypt.then_some(input.nonce);
    let mut sealed = seal_payload(&context, "client", &input.payload, nonce).expect("seal");

    let mut sender = "client".to_string();
    let tampered = match input.tamper {
        Tamper::None => false,
        Tamper::Signature { index, mask } => {
            let len = sealed.signature.len();
            sealed.signature[index % len] ^= mask;
            mask != 0
        },
        Tamper::Ciphertext { index, mask } => match &mut sealed.body {
            PayloadBody::Encrypted(envelope) => {
                let len = envelope.ciphertext.len();
                envelope.ciphertext[index % len] ^= mask;
                mask != 0
            },
            PayloadBody::Plain(bytes) if !bytes.is_empty() => {
                let len = bytes.len();
                bytes[index % len] ^= mask;
                mask != 0
            },
            PayloadBody::Plain(_) => false,
        },
        Tamper::Nonce { index, mask } => match &mut sealed.body {
            PayloadBody::Encrypted(envelope) => {
                envelope.nonce[index % 12] ^= mask;
                mask != 0
            },
            PayloadBody::Plain(_) => false,
        },
        Tamper::Sender { suffix } => {
            sender.push_str(&suffix);
            !suffix.is_empty()
        },
    };

    let opened = open_payload(&context, &sender, &sealed);
    if tampered {
        assert!(opened.is_err(), "tampered payload accepted: {opened:?}");
    } else {
        assert_eq!(opened.expect("untouched payload opens"), input.payload);
    }
});
