//! Operation state machine scenarios.
//!
//! Drives the machine directly with hand-built responses, without codecs or
//! transports, covering every terminal path.

use std::time::{Duration, Instant};

use cmpcheck_core::{
    ConfigError, Environment, Inbound, MAX_WAIT, MachineAction, MachineConfig, MachineError,
    MachineState, OperationMachine, Outcome, RegistryError, SystemEnv, TransactionRegistry,
};
use cmpcheck_proto::{
    BodyKind, CertRepMessage, CertReqMsg, CertRequests, CertResponse, CertStatus, CertTemplate,
    CertifiedKeyPair, ErrorMsgContent, FailureInfo, GeneralInfo, GeneralName, InfoValue, Nonce,
    ObjectIdentifier, PkiBody, PkiHeader, PkiMessage, PkiStatus, PkiStatusInfo, ProtectionAlg,
    RevDetails, RevRepContent, TransactionId,
};
use hex_literal::hex;

const T1: TransactionId = TransactionId::new(hex!("54310000000000000000000000000001"));

fn ee() -> GeneralName {
    GeneralName::directory("CN=ee")
}

fn ca() -> GeneralName {
    GeneralName::directory("CN=Mock CA")
}

fn ir(tid: TransactionId, implicit_confirm: bool) -> PkiMessage {
    let mut header = PkiHeader::new(ee(), ca(), tid, Nonce::new(vec![0x11; 16]))
        .with_protection(ProtectionAlg::PasswordBasedMac, b"ee".to_vec());
    header.general_info.set_implicit_confirm(implicit_confirm);
    PkiMessage::new(
        header,
        PkiBody::Ir(CertRequests::single(CertReqMsg {
            cert_req_id: 0,
            template: CertTemplate { subject: Some(ee()), public_key: Some(vec![0x04, 0x01]) },
            popo: None,
        })),
    )
}

fn answer(request: &PkiMessage, nonce_byte: u8, body: PkiBody) -> PkiMessage {
    let header = PkiHeader::new(
        ca(),
        request.header.sender.clone(),
        request.header.transaction_id,
        Nonce::new(vec![nonce_byte; 16]),
    )
    .with_protection(ProtectionAlg::PasswordBasedMac, b"ca".to_vec())
    .with_recip_nonce(request.header.sender_nonce.clone());
    PkiMessage::new(header, body)
}

fn ip(request: &PkiMessage, status: PkiStatusInfo, implicit_confirm: bool) -> PkiMessage {
    let certified_key_pair = status.status.grants().then(|| CertifiedKeyPair {
        certificate: vec![0x30, 0x03, 0x02, 0x01, 0x01],
        private_key: None,
    });
    let mut message = answer(
        request,
        0x22,
        PkiBody::Ip(CertRepMessage {
            ca_pubs: Vec::new(),
            responses: vec![CertResponse { cert_req_id: 0, status, certified_key_pair }],
        }),
    );
    message.header.general_info.set_implicit_confirm(implicit_confirm);
    message
}

fn sent(actions: &[MachineAction]) -> Option<&PkiMessage> {
    actions.iter().find_map(|action| match action {
        MachineAction::Send(message) => Some(message),
        _ => None,
    })
}

fn confirmation_deadline(actions: &[MachineAction]) -> Option<Instant> {
    actions.iter().find_map(|action| match action {
        MachineAction::AwaitConfirmation { deadline } => Some(*deadline),
        _ => None,
    })
}

fn accept_all(machine: &OperationMachine) -> Vec<CertStatus> {
    machine
        .issued_certificates()
        .into_iter()
        .map(|(id, cert)| CertStatus::accept(cert.to_vec(), id))
        .collect()
}

#[test]
fn implicit_confirm_granted_accepts_without_certconf() {
    let registry = TransactionRegistry::new();
    let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, true);
    let actions = machine.submit(request.clone(), t0).unwrap();
    assert_eq!(sent(&actions), Some(&request));
    assert_eq!(machine.state(), MachineState::AwaitingResponse);
    assert!(registry.is_live(&T1));

    let response = ip(&request, PkiStatusInfo::accepted(), true);
    let actions = machine.receive(Inbound::trusted(response), t0).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::AcceptedImplicit }]);

    let verdict = machine.verdict().unwrap();
    assert!(verdict.is_compliant());
    assert_eq!(verdict.audit.sent_count(BodyKind::CertConf), 0);
    assert!(verdict.audit.visited(MachineState::ImplicitlyConfirmed));
    assert!(!registry.is_live(&T1));
}

#[test]
fn omitted_implicit_confirm_requires_explicit_confirmation() {
    let registry = TransactionRegistry::new();
    let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, true);
    machine.submit(request.clone(), t0).unwrap();
    let response = ip(&request, PkiStatusInfo::accepted(), false);
    let actions = machine.receive(Inbound::trusted(response.clone()), t0).unwrap();
    assert_eq!(machine.state(), MachineState::AwaitingCertConf);
    assert_eq!(confirmation_deadline(&actions), Some(t0 + Duration::from_secs(60)));
    assert!(machine.audit().visited(MachineState::AwaitingConfirmationDecision));

    let t1 = t0 + Duration::from_secs(5);
    let statuses = accept_all(&machine);
    let actions = machine.confirm(statuses, Nonce::new(vec![0x33; 16]), t1).unwrap();
    let certconf = sent(&actions).unwrap().clone();
    assert_eq!(certconf.kind(), BodyKind::CertConf);
    assert_eq!(certconf.header.transaction_id, T1);
    assert_eq!(certconf.header.recip_nonce, Some(response.header.sender_nonce.clone()));
    assert_eq!(certconf.header.sender, ee());
    assert_eq!(machine.state(), MachineState::AwaitingPkiConf);

    let pki_conf = answer(&certconf, 0x44, PkiBody::PkiConf);
    let actions = machine.receive(Inbound::trusted(pki_conf), t1).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::AcceptedExplicit }]);
    assert!(machine.verdict().unwrap().is_compliant());
    assert_eq!(registry.outcome(&T1), Some(Outcome::AcceptedExplicit));
}

#[test]
fn missed_confirmation_deadline_times_out() {
    let registry = TransactionRegistry::new();
    let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, true);
    machine.submit(request.clone(), t0).unwrap();
    machine.receive(Inbound::trusted(ip(&request, PkiStatusInfo::accepted(), false)), t0).unwrap();

    assert!(machine.tick(t0 + Duration::from_secs(59)).is_empty());
    let actions = machine.tick(t0 + Duration::from_secs(60));
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::TimedOut }]);
    assert_eq!(machine.state(), MachineState::Terminated(Outcome::TimedOut));
    assert!(!registry.is_live(&T1));
    assert!(machine.issued_certificates().is_empty());

    let err = machine.confirm(Vec::new(), Nonce::new(vec![0x55; 16]), t0).unwrap_err();
    assert!(matches!(err, MachineError::InvalidState { .. }));
}

#[test]
fn late_confirmation_times_out_without_sending() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    machine.receive(Inbound::trusted(ip(&request, PkiStatusInfo::accepted(), false)), t0).unwrap();
    let statuses = accept_all(&machine);

    let actions =
        machine.confirm(statuses, Nonce::new(vec![0x33; 16]), t0 + Duration::from_secs(61)).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::TimedOut }]);
    assert_eq!(machine.audit().sent_count(BodyKind::CertConf), 0);
}

#[test]
fn confirm_wait_time_shortens_deadline() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    let mut response = ip(&request, PkiStatusInfo::accepted(), false);
    response.header.general_info.insert(
        ObjectIdentifier::new(ObjectIdentifier::CONFIRM_WAIT_TIME),
        InfoValue::Integer(10),
    );

    let actions = machine.receive(Inbound::trusted(response), t0).unwrap();
    assert_eq!(confirmation_deadline(&actions), Some(t0 + Duration::from_secs(10)));
}

#[test]
fn rejection_is_terminal_and_refuses_certconf() {
    let registry = TransactionRegistry::new();
    let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, true);
    machine.submit(request.clone(), t0).unwrap();
    let response = ip(&request, PkiStatusInfo::rejection(FailureInfo::BAD_POP), false);
    let actions = machine.receive(Inbound::trusted(response), t0).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::Rejected }]);

    let err = machine.confirm(Vec::new(), Nonce::new(vec![0x33; 16]), t0).unwrap_err();
    assert_eq!(err, MachineError::InvalidState {
        state: MachineState::Terminated(Outcome::Rejected),
        operation: "confirm".to_string(),
    });
    assert_eq!(machine.audit().sent_count(BodyKind::CertConf), 0);
    assert_eq!(registry.outcome(&T1), Some(Outcome::Rejected));
}

#[test]
fn negative_confirmation_ends_rejected() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    machine.receive(Inbound::trusted(ip(&request, PkiStatusInfo::accepted(), false)), t0).unwrap();
    let statuses = machine
        .issued_certificates()
        .into_iter()
        .map(|(id, cert)| {
            CertStatus::reject(cert.to_vec(), id, PkiStatusInfo::rejection(FailureInfo::BAD_CERT_ID))
        })
        .collect();

    let actions = machine.confirm(statuses, Nonce::new(vec![0x33; 16]), t0).unwrap();
    let certconf = sent(&actions).unwrap().clone();
    let actions =
        machine.receive(Inbound::trusted(answer(&certconf, 0x44, PkiBody::PkiConf)), t0).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::Rejected }]);
}

#[test]
fn error_instead_of_pki_conf_is_errored() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    machine.receive(Inbound::trusted(ip(&request, PkiStatusInfo::accepted(), false)), t0).unwrap();
    let statuses = accept_all(&machine);
    let actions = machine.confirm(statuses, Nonce::new(vec![0x33; 16]), t0).unwrap();
    let certconf = sent(&actions).unwrap().clone();

    let error = answer(
        &certconf,
        0x44,
        PkiBody::Error(ErrorMsgContent {
            status_info: PkiStatusInfo::rejection(FailureInfo::SYSTEM_FAILURE),
            error_code: None,
            error_details: Vec::new(),
        }),
    );
    let actions = machine.receive(Inbound::trusted(error), t0).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::Errored }]);
    assert_eq!(machine.defects().names(), vec!["peer_error"]);
}

#[test]
fn reused_transaction_id_is_refused_locally() {
    let registry = TransactionRegistry::new();
    let t0 = SystemEnv.now();
    let mut first = OperationMachine::new(registry.clone(), MachineConfig::default());
    first.submit(ir(T1, true), t0).unwrap();

    let mut second = OperationMachine::new(registry.clone(), MachineConfig::default());
    let err = second.submit(ir(T1, true), t0).unwrap_err();
    assert_eq!(err, MachineError::Registry(RegistryError::DuplicateTransaction(T1)));
    assert_eq!(err.failure_info(), Some(FailureInfo::TRANSACTION_ID_IN_USE));
    assert_eq!(second.state(), MachineState::Idle);

    // The refused machine must not end the first one's transaction.
    drop(second);
    assert!(registry.is_live(&T1));
    assert_eq!(first.state(), MachineState::AwaitingResponse);
}

#[test]
fn bad_recip_nonce_is_reported_alongside_other_defects() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    let mut response = ip(&request, PkiStatusInfo::accepted(), true);
    response.header.recip_nonce = Some(Nonce::new(vec![0x99; 16]));

    let actions = machine.receive(Inbound::trusted(response), t0).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::Errored }]);
    assert_eq!(machine.defects().names(), vec![
        "bad_recipient_nonce",
        "unsolicited_implicit_confirm"
    ]);
    assert!(machine.defects().failure_info().contains(FailureInfo::BAD_RECIPIENT_NONCE));
}

#[test]
fn response_timeout_ends_errored() {
    let config = MachineConfig::default().with_response_timeout(Duration::from_secs(5));
    let mut machine = OperationMachine::new(TransactionRegistry::new(), config);
    let t0 = SystemEnv.now();

    let request = ir(T1, true);
    machine.submit(request.clone(), t0).unwrap();
    let late = t0 + Duration::from_secs(5);
    let actions =
        machine.receive(Inbound::trusted(ip(&request, PkiStatusInfo::accepted(), true)), late).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::Errored }]);
    assert_eq!(machine.defects().names(), vec!["response_timeout"]);
}

#[test]
fn waiting_status_is_not_polled() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    let response = ip(&request, PkiStatusInfo::with_status(PkiStatus::Waiting), false);
    machine.receive(Inbound::trusted(response), t0).unwrap();
    assert_eq!(machine.state(), MachineState::Terminated(Outcome::Errored));
    assert_eq!(machine.defects().names(), vec!["polling_not_supported"]);
}

#[test]
fn revocation_ends_on_first_response() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let header = PkiHeader::new(ee(), ca(), T1, Nonce::new(vec![0x11; 16]))
        .with_protection(ProtectionAlg::PasswordBasedMac, b"ee".to_vec());
    let request = PkiMessage::new(
        header,
        PkiBody::Rr(vec![RevDetails {
            serial_number: vec![0x01],
            issuer: ca(),
            reason: cmpcheck_proto::CrlReason::KeyCompromise,
        }]),
    );
    machine.submit(request.clone(), t0).unwrap();
    let response =
        answer(&request, 0x22, PkiBody::Rp(RevRepContent { status: vec![PkiStatusInfo::accepted()] }));

    let actions = machine.receive(Inbound::trusted(response), t0).unwrap();
    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::AcceptedExplicit }]);
}

#[test]
fn general_message_accepts_genp() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let header = PkiHeader::new(ee(), ca(), T1, Nonce::new(vec![0x11; 16]))
        .with_protection(ProtectionAlg::PasswordBasedMac, b"ee".to_vec());
    let request = PkiMessage::new(header, PkiBody::Genm(GeneralInfo::new()));
    machine.submit(request.clone(), t0).unwrap();

    let response = answer(&request, 0x22, PkiBody::Genp(GeneralInfo::new()));
    machine.receive(Inbound::trusted(response), t0).unwrap();
    assert_eq!(machine.state(), MachineState::Terminated(Outcome::AcceptedExplicit));
}

#[test]
fn dropping_live_machine_releases_transaction() {
    let registry = TransactionRegistry::new();
    {
        let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
        machine.submit(ir(T1, true), SystemEnv.now()).unwrap();
        assert!(registry.is_live(&T1));
    }
    assert!(!registry.is_live(&T1));
    assert_eq!(registry.outcome(&T1), Some(Outcome::Errored));
}

#[test]
fn receive_before_submit_is_invalid() {
    let mut machine = OperationMachine::new(TransactionRegistry::new(), MachineConfig::default());
    let request = ir(T1, true);
    let response = ip(&request, PkiStatusInfo::accepted(), true);
    let err = machine.receive(Inbound::trusted(response), SystemEnv.now()).unwrap_err();
    assert!(matches!(err, MachineError::InvalidState { state: MachineState::Idle, .. }));
}

#[test]
fn foreign_transaction_while_certconf_owed_ends_errored() {
    let registry = TransactionRegistry::new();
    let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    machine.receive(Inbound::trusted(ip(&request, PkiStatusInfo::accepted(), false)), t0).unwrap();
    assert_eq!(machine.state(), MachineState::AwaitingCertConf);

    let mut stray = ip(&request, PkiStatusInfo::accepted(), false);
    stray.header.transaction_id = TransactionId::new([0xee; 16]);
    let actions = machine.receive(Inbound::trusted(stray), t0).unwrap();

    assert_eq!(actions, vec![MachineAction::Finished { outcome: Outcome::Errored }]);
    let verdict = machine.verdict().unwrap();
    assert_eq!(verdict.defects.names(), vec!["transaction_id_mismatch"]);
    assert_eq!(verdict.audit.sent_count(BodyKind::CertConf), 0);
    assert!(!registry.is_live(&T1));
}

#[test]
fn matching_message_while_certconf_owed_is_ignored() {
    let registry = TransactionRegistry::new();
    let mut machine = OperationMachine::new(registry.clone(), MachineConfig::default());
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    machine.submit(request.clone(), t0).unwrap();
    let response = ip(&request, PkiStatusInfo::accepted(), false);
    machine.receive(Inbound::trusted(response.clone()), t0).unwrap();

    let actions = machine.receive(Inbound::trusted(response), t0).unwrap();
    assert!(actions.is_empty());
    assert_eq!(machine.state(), MachineState::AwaitingCertConf);
    assert!(registry.is_live(&T1));

    let statuses = accept_all(&machine);
    let actions = machine.confirm(statuses, Nonce::new(vec![0x33; 16]), t0).unwrap();
    assert!(sent(&actions).is_some());
    assert_eq!(machine.state(), MachineState::AwaitingPkiConf);
}

#[test]
fn oversized_waits_are_clamped() {
    let config = MachineConfig::default()
        .with_response_timeout(Duration::from_secs(u64::MAX))
        .with_confirm_wait(Duration::from_secs(u64::MAX));
    assert_eq!(
        config.validate(),
        Err(ConfigError::WaitTooLong {
            setting: "response_timeout",
            value: Duration::from_secs(u64::MAX),
            max: MAX_WAIT,
        })
    );
    let mut machine = OperationMachine::new(TransactionRegistry::new(), config);
    let t0 = SystemEnv.now();

    let request = ir(T1, false);
    let actions = machine.submit(request.clone(), t0).unwrap();
    assert!(actions.contains(&MachineAction::AwaitResponse { deadline: t0 + MAX_WAIT }));

    let actions =
        machine.receive(Inbound::trusted(ip(&request, PkiStatusInfo::accepted(), false)), t0).unwrap();
    assert_eq!(confirmation_deadline(&actions), Some(t0 + MAX_WAIT));
    assert_eq!(machine.tick(t0 + MAX_WAIT).len(), 1);
    assert_eq!(machine.state(), MachineState::Terminated(Outcome::TimedOut));
}
