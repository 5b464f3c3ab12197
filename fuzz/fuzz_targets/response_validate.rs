//! Decode arbitrary bytes as a response and grade it against a fixed
//! request. Neither step may panic, whatever the peer sends.

#![no_main]

use cmpcheck_core::{
    CryptoAdapter, EncodingAdapter, Expectation, Inbound, ValidationPolicy, validate_response,
};
use cmpcheck_harness::{CborCodec, Initiator, RequestShape, SimCrypto, SimEnv, TrustedKeys, fixtures};
use cmpcheck_proto::{BodyKind, TransactionId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = CborCodec.decode(data) else {
        return;
    };

    let initiator = Initiator::new(SimEnv::with_seed(0));
    let shape = RequestShape { implicit_confirm: true, bad_pop: false };
    let request = initiator.request(BodyKind::Ir, TransactionId::new([0x5a; 16]), shape);

    let trust = TrustedKeys::new().with(&fixtures::ca_credential());
    let protection = SimCrypto.verify(&message, &trust);
    let inbound = Inbound::inspect(message, protection, &CborCodec);
    let seen = [request.header.sender_nonce.clone()];
    let expectation = Expectation { request: &request, seen_nonces: &seen, provoked: None };

    let defects = validate_response(&expectation, &inbound, &ValidationPolicy::default());
    let _ = defects.failure_info();
});
