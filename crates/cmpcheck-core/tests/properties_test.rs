//! Property tests for registry and state machine invariants.
//!
//! - Concurrent `begin` on one identifier yields exactly one success
//! - Each identity copy-through violation is reported on its own
//! - implicitConfirm appears in a response only when requested and granted
//! - A missed confirmation closes like a rejection
//! - `end` is idempotent

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use cmpcheck_core::{
    EndStatus, Environment, Inbound, MachineConfig, MachineState, OperationMachine, Outcome,
    RegistryError, SystemEnv, TransactionRegistry,
};
use cmpcheck_proto::{
    BodyKind, CertRepMessage, CertReqMsg, CertRequests, CertResponse, CertTemplate,
    CertifiedKeyPair, FailureInfo, GeneralName, Nonce, OperationKind, PkiBody, PkiHeader,
    PkiMessage, PkiStatusInfo, ProtectionAlg, TransactionId,
};
use proptest::prelude::*;

fn request(tid: TransactionId, implicit_confirm: bool) -> PkiMessage {
    let mut header = PkiHeader::new(
        GeneralName::directory("CN=ee"),
        GeneralName::directory("CN=Mock CA"),
        tid,
        Nonce::new(vec![0x11; 16]),
    )
    .with_protection(ProtectionAlg::PasswordBasedMac, b"ee".to_vec());
    header.general_info.set_implicit_confirm(implicit_confirm);
    PkiMessage::new(
        header,
        PkiBody::Cr(CertRequests::single(CertReqMsg {
            cert_req_id: 0,
            template: CertTemplate { subject: None, public_key: Some(vec![0x04]) },
            popo: None,
        })),
    )
}

fn response(request: &PkiMessage, status: PkiStatusInfo, implicit_confirm: bool) -> PkiMessage {
    let certified_key_pair = status.status.grants().then(|| CertifiedKeyPair {
        certificate: vec![0x30, 0x03, 0x02, 0x01, 0x07],
        private_key: None,
    });
    let mut header = PkiHeader::new(
        GeneralName::directory("CN=Mock CA"),
        request.header.sender.clone(),
        request.header.transaction_id,
        Nonce::new(vec![0x22; 16]),
    )
    .with_protection(ProtectionAlg::PasswordBasedMac, b"ca".to_vec())
    .with_recip_nonce(request.header.sender_nonce.clone());
    header.general_info.set_implicit_confirm(implicit_confirm);
    PkiMessage::new(
        header,
        PkiBody::Cp(CertRepMessage {
            ca_pubs: Vec::new(),
            responses: vec![CertResponse { cert_req_id: 0, status, certified_key_pair }],
        }),
    )
}

fn tid_strategy() -> impl Strategy<Value = TransactionId> {
    any::<[u8; 16]>().prop_map(TransactionId::new)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_begin_yields_exactly_one_success(tid in tid_strategy(), threads in 2usize..8) {
        let registry = TransactionRegistry::new();
        let barrier = Arc::new(Barrier::new(threads));

        let results: Vec<Result<_, RegistryError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let registry = registry.clone();
                    let barrier = Arc::clone(&barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        registry.begin(tid, OperationKind::Enrollment).map(|tx| tx.id)
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let successes = results.iter().filter(|result| result.is_ok()).count();
        prop_assert_eq!(successes, 1);
        for result in results.iter().filter(|result| result.is_err()) {
            prop_assert_eq!(result, &Err(RegistryError::DuplicateTransaction(tid)));
        }
        prop_assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn identity_violations_are_reported_independently(
        tid in tid_strategy(),
        wrong_recipient in any::<bool>(),
        wrong_tid in any::<bool>(),
        wrong_nonce in any::<bool>(),
    ) {
        let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
        let t0 = SystemEnv.now();
        let req = request(tid, true);
        machine.submit(req.clone(), t0).unwrap();

        let mut resp = response(&req, PkiStatusInfo::accepted(), true);
        let mut expected = Vec::new();
        if wrong_recipient {
            resp.header.recipient = GeneralName::directory("CN=intruder");
            expected.push("recipient_mismatch");
        }
        if wrong_tid {
            let mut bytes = *tid.as_bytes();
            bytes[0] ^= 0xff;
            resp.header.transaction_id = TransactionId::new(bytes);
            expected.push("transaction_id_mismatch");
        }
        if wrong_nonce {
            resp.header.recip_nonce = Some(Nonce::new(vec![0x99; 16]));
            expected.push("bad_recipient_nonce");
        }

        machine.receive(Inbound::trusted(resp), t0).unwrap();
        prop_assert_eq!(machine.defects().names(), expected.clone());
        let outcome = if expected.is_empty() { Outcome::AcceptedImplicit } else { Outcome::Errored };
        prop_assert_eq!(machine.state(), MachineState::Terminated(outcome));
    }

    #[test]
    fn implicit_confirm_is_biconditional(requested in any::<bool>(), granted in any::<bool>()) {
        let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
        let t0 = SystemEnv.now();
        let req = request(TransactionId::new([3; 16]), requested);
        machine.submit(req.clone(), t0).unwrap();

        machine.receive(Inbound::trusted(response(&req, PkiStatusInfo::accepted(), granted)), t0).unwrap();

        match (requested, granted) {
            (true, true) => {
                prop_assert_eq!(machine.state(), MachineState::Terminated(Outcome::AcceptedImplicit));
            },
            (false, true) => {
                prop_assert_eq!(machine.state(), MachineState::Terminated(Outcome::Errored));
                prop_assert_eq!(machine.defects().names(), vec!["unsolicited_implicit_confirm"]);
            },
            (_, false) => {
                prop_assert_eq!(machine.state(), MachineState::AwaitingCertConf);
                prop_assert!(machine.defects().is_empty());
            },
        }
    }

    #[test]
    fn rejection_never_emits_certconf(fail_bit in 0u32..27, implicit_requested in any::<bool>()) {
        let Some(fail_info) = FailureInfo::from_bit(fail_bit) else {
            return Err(TestCaseError::fail("bit outside taxonomy"));
        };
        let registry = TransactionRegistry::new();
        let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
        let t0 = SystemEnv.now();
        let req = request(TransactionId::new([4; 16]), implicit_requested);
        machine.submit(req.clone(), t0).unwrap();

        machine.receive(Inbound::trusted(response(&req, PkiStatusInfo::rejection(fail_info), false)), t0).unwrap();
        prop_assert_eq!(machine.state(), MachineState::Terminated(Outcome::Rejected));
        prop_assert!(machine.confirm(Vec::new(), Nonce::new(vec![0x33; 16]), t0).is_err());
        prop_assert!(machine.tick(t0 + Duration::from_secs(3600)).is_empty());
        prop_assert_eq!(machine.audit().sent_count(BodyKind::CertConf), 0);
        prop_assert!(!registry.is_live(&TransactionId::new([4; 16])));
    }

    #[test]
    fn end_is_idempotent(tid in tid_strategy(), repeats in 1usize..5) {
        let registry = TransactionRegistry::new();
        registry.begin(tid, OperationKind::Revocation).unwrap();
        prop_assert_eq!(registry.end(&tid, Outcome::Rejected), Ok(EndStatus::Ended));
        for _ in 0..repeats {
            prop_assert_eq!(registry.end(&tid, Outcome::AcceptedExplicit), Ok(EndStatus::AlreadyEnded));
        }
        prop_assert!(!registry.is_live(&tid));
        prop_assert_eq!(registry.outcome(&tid), Some(Outcome::Rejected));
    }
}

/// Ending by timeout and ending by rejection leave the registry and the
/// machine in the same observable shape.
#[test]
fn timeout_closes_like_rejection() {
    let t0 = SystemEnv.now();
    let rejected_tid = TransactionId::new([5; 16]);
    let timed_out_tid = TransactionId::new([6; 16]);
    let registry = TransactionRegistry::new();

    let mut rejected = OperationMachine::new(registry.clone(), MachineConfig::default());
    let req = request(rejected_tid, false);
    rejected.submit(req.clone(), t0).unwrap();
    rejected
        .receive(
            Inbound::trusted(response(&req, PkiStatusInfo::rejection(FailureInfo::BAD_POP), false)),
            t0,
        )
        .unwrap();

    let mut timed_out = OperationMachine::new(registry.clone(), MachineConfig::default());
    let req = request(timed_out_tid, false);
    timed_out.submit(req.clone(), t0).unwrap();
    timed_out.receive(Inbound::trusted(response(&req, PkiStatusInfo::accepted(), false)), t0).unwrap();
    timed_out.tick(t0 + Duration::from_secs(60));

    for (machine, tid) in [(&rejected, rejected_tid), (&timed_out, timed_out_tid)] {
        assert!(!registry.is_live(&tid));
        assert!(registry.outcome(&tid).is_some_and(Outcome::closes_without_issuance));
        assert!(machine.issued_certificates().is_empty());
        assert_eq!(machine.audit().sent_count(BodyKind::CertConf), 0);
    }
    assert_eq!(registry.live_count(), 0);
    assert_eq!(timed_out.state(), MachineState::Terminated(Outcome::TimedOut));
}
