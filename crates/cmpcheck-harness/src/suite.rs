//! Built-in conformance cases.
//!
//! Each case pairs a responder behaviour with the verdict a correct engine
//! must reach against it. Conforming responders must yield compliant
//! verdicts; each injected fault must surface as exactly the defect it
//! provokes.

use std::time::Duration;

use cmpcheck_core::{AuditEntry, ConfirmPolicy, DeadlinePurpose, MachineConfig, Outcome};
use cmpcheck_proto::FailureInfo;

use crate::{
    error::HarnessError,
    responder::{Fault, ResponderConfig},
    scenario::{
        OperationStep, RunnableScenario, Scenario, Step,
        oracle::{self, all_of},
    },
};

/// Named scenario with a fixed oracle.
#[derive(Clone, Copy)]
pub struct ConformanceCase {
    /// Case name, unique within the suite
    pub name: &'static str,
    /// One-line description
    pub summary: &'static str,
    build: fn(Scenario) -> RunnableScenario,
}

impl ConformanceCase {
    /// Build the runnable scenario for this case.
    pub fn scenario(&self, seed: u64, config: MachineConfig) -> RunnableScenario {
        (self.build)(Scenario::new(self.name).seed(seed).machine_config(config))
    }
}

impl std::fmt::Debug for ConformanceCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConformanceCase").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Look up a case by name.
///
/// # Errors
/// Returns `UnknownCase` if no case has this name
pub fn find(name: &str) -> Result<ConformanceCase, HarnessError> {
    suite()
        .into_iter()
        .find(|case| case.name == name)
        .ok_or_else(|| HarnessError::UnknownCase(name.to_string()))
}

const fn case(
    name: &'static str,
    summary: &'static str,
    build: fn(Scenario) -> RunnableScenario,
) -> ConformanceCase {
    ConformanceCase { name, summary, build }
}

/// Every conformance case, in a stable order.
pub fn suite() -> Vec<ConformanceCase> {
    vec![
        case("implicit-confirm-granted", "ir with implicit confirmation granted", |s| {
            s.step(OperationStep::enroll().implicit_confirm()).oracle(all_of(vec![
                oracle::outcome(0, Outcome::AcceptedImplicit),
                oracle::compliant(0),
                oracle::certconf_sent(0, 0),
                oracle::registry_idle(),
            ]))
        }),
        case("explicit-confirmation", "implicit confirmation refused, certConf answered", |s| {
            s.responder(ResponderConfig::default().without_implicit_confirm())
                .step(OperationStep::enroll().implicit_confirm())
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::AcceptedExplicit),
                    oracle::compliant(0),
                    oracle::certconf_sent(0, 1),
                    oracle::registry_idle(),
                    oracle::peer_idle(),
                ]))
        }),
        case("confirmation-timeout", "certConf withheld past the confirmation wait", |s| {
            s.confirm_wait(Duration::from_secs(60))
                .responder(ResponderConfig::default().without_implicit_confirm())
                .step(OperationStep::enroll().confirm(ConfirmPolicy::Withhold))
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::TimedOut),
                    oracle::compliant(0),
                    oracle::certconf_sent(0, 0),
                    oracle::registry_idle(),
                    oracle::peer_idle(),
                ]))
        }),
        case("rejection", "certificate request rejected by the peer", |s| {
            s.responder(
                ResponderConfig::default().with_fault(Fault::Reject(FailureInfo::BAD_CERT_TEMPLATE)),
            )
            .step(
                OperationStep::enroll()
                    .implicit_confirm()
                    .provoking(FailureInfo::BAD_CERT_TEMPLATE),
            )
            .oracle(all_of(vec![
                oracle::outcome(0, Outcome::Rejected),
                oracle::compliant(0),
                oracle::certconf_sent(0, 0),
                oracle::registry_idle(),
            ]))
        }),
        case("duplicate-transaction", "live transaction identifier submitted again", |s| {
            s.step(Step::DuplicateSubmit).oracle(all_of(vec![
                oracle::refused(0, FailureInfo::TRANSACTION_ID_IN_USE),
                oracle::registry_idle(),
            ]))
        }),
        case("negative-confirmation", "issued certificate refused in certConf", |s| {
            s.responder(ResponderConfig::default().without_implicit_confirm())
                .step(
                    OperationStep::certify()
                        .confirm(ConfirmPolicy::Reject(FailureInfo::BAD_CERT_TEMPLATE)),
                )
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::Rejected),
                    oracle::compliant(0),
                    oracle::certconf_sent(0, 1),
                    oracle::peer_idle(),
                ]))
        }),
        case("bad-pop-provoked", "unverifiable proof of possession rejected with badPOP", |s| {
            s.step(OperationStep::enroll().implicit_confirm().bad_pop().provoking(FailureInfo::BAD_POP))
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::Rejected),
                    oracle::compliant(0),
                    oracle::certconf_sent(0, 0),
                ]))
        }),
        case("peer-duplicate-detection", "peer refuses an identifier it still holds", |s| {
            s.confirm_wait(Duration::from_secs(60))
                .responder(
                    ResponderConfig::default()
                        .without_implicit_confirm()
                        .with_confirm_wait(Duration::from_secs(300)),
                )
                .step(OperationStep::enroll().confirm(ConfirmPolicy::Withhold))
                .step(
                    OperationStep::enroll()
                        .implicit_confirm()
                        .reusing(0)
                        .provoking(FailureInfo::TRANSACTION_ID_IN_USE),
                )
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::TimedOut),
                    oracle::outcome(1, Outcome::Rejected),
                    oracle::compliant(1),
                ]))
        }),
        case("mislabelled-duplicate", "peer refuses a held identifier with the wrong failure", |s| {
            s.confirm_wait(Duration::from_secs(60))
                .responder(
                    ResponderConfig::default()
                        .without_implicit_confirm()
                        .with_confirm_wait(Duration::from_secs(300))
                        .with_fault(Fault::WrongFailureInfo(FailureInfo::BAD_REQUEST)),
                )
                .step(OperationStep::enroll().confirm(ConfirmPolicy::Withhold))
                .step(
                    OperationStep::enroll()
                        .implicit_confirm()
                        .reusing(0)
                        .provoking(FailureInfo::TRANSACTION_ID_IN_USE),
                )
                .oracle(all_of(vec![
                    oracle::outcome(1, Outcome::Errored),
                    oracle::defects(1, &["wrong_failure_info"]),
                ]))
        }),
        case("timeout-releases-transaction", "identifier reusable once confirmation lapsed", |s| {
            s.confirm_wait(Duration::from_secs(60))
                .responder(ResponderConfig::default().without_implicit_confirm())
                .step(OperationStep::enroll().confirm(ConfirmPolicy::Withhold))
                .step(OperationStep::enroll().reusing(0))
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::TimedOut),
                    oracle::outcome(1, Outcome::AcceptedExplicit),
                    oracle::compliant(1),
                    oracle::peer_idle(),
                    oracle::check(|world| {
                        let released = world.responder().released_transactions().len();
                        if released == 1 {
                            Ok(())
                        } else {
                            Err(format!("expected one released transaction, got {released}"))
                        }
                    }),
                ]))
        }),
        case("confirm-wait-announced", "peer's confirmWaitTime shortens the wait", |s| {
            s.confirm_wait(Duration::from_secs(60))
                .responder(
                    ResponderConfig::default()
                        .without_implicit_confirm()
                        .announcing_confirm_wait(10),
                )
                .step(OperationStep::enroll().confirm(ConfirmPolicy::Withhold))
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::TimedOut),
                    oracle::compliant(0),
                    oracle::check(|world| {
                        let armed = world.verdict(0).and_then(|verdict| {
                            verdict.audit.entries().iter().find_map(|entry| match entry {
                                AuditEntry::DeadlineArmed {
                                    purpose: DeadlinePurpose::Confirmation,
                                    after,
                                } => Some(*after),
                                _ => None,
                            })
                        });
                        match armed {
                            Some(after) if after == Duration::from_secs(10) => Ok(()),
                            other => Err(format!("expected a 10s confirmation wait, got {other:?}")),
                        }
                    }),
                ]))
        }),
        case("revocation", "revocation request accepted", |s| {
            s.step(OperationStep::revoke()).oracle(all_of(vec![
                oracle::outcome(0, Outcome::AcceptedExplicit),
                oracle::compliant(0),
            ]))
        }),
        case("general-message", "genm answered with genp", |s| {
            s.step(OperationStep::general_message()).oracle(all_of(vec![
                oracle::outcome(0, Outcome::AcceptedExplicit),
                oracle::compliant(0),
            ]))
        }),
        case("key-update", "kur with implicit confirmation granted", |s| {
            s.step(OperationStep::key_update().implicit_confirm()).oracle(all_of(vec![
                oracle::outcome(0, Outcome::AcceptedImplicit),
                oracle::compliant(0),
            ]))
        }),
        case("wrong-recipient", "response addressed to someone else", |s| {
            faulty(s, Fault::WrongRecipient, &["recipient_mismatch"])
        }),
        case("wrong-transaction-id", "response under another transaction", |s| {
            faulty(s, Fault::WrongTransactionId, &["transaction_id_mismatch"])
        }),
        case("bad-recipient-nonce", "recipNonce does not echo the request", |s| {
            faulty(s, Fault::WrongRecipNonce, &["bad_recipient_nonce"])
        }),
        case("missing-recipient-nonce", "recipNonce omitted", |s| {
            faulty(s, Fault::MissingRecipNonce, &["bad_recipient_nonce"])
        }),
        case("replayed-nonce", "senderNonce replays the request's nonce", |s| {
            faulty(s, Fault::ReplayedNonce, &["replayed_sender_nonce"])
        }),
        case("rejection-with-certificate", "rejection still carries a certificate", |s| {
            faulty(
                s,
                Fault::RejectWithCertificate(FailureInfo::BAD_CERT_TEMPLATE),
                &["certificate_with_rejection"],
            )
        }),
        case("missing-certificate", "acceptance without a certificate", |s| {
            faulty(s, Fault::MissingCertificate, &["missing_certificate"])
        }),
        case("malformed-certificate", "issued certificate is not well-formed", |s| {
            faulty(s, Fault::MalformedCertificate, &["malformed_certificate"])
        }),
        case("wrong-body-type", "ir answered with genp", |s| {
            faulty(s, Fault::WrongBodyType, &["unexpected_body_type"])
        }),
        case("corrupted-protection", "protection value does not verify", |s| {
            faulty(s, Fault::CorruptProtection, &["bad_message_check"])
        }),
        case("unprotected", "response sent without protection", |s| {
            faulty(s, Fault::Unprotected, &["missing_protection"])
        }),
        case("silent-responder", "no response at all", |s| {
            faulty(s, Fault::Silent, &["response_timeout"])
        }),
        case("slow-responder", "response arrives after the deadline", |s| {
            faulty(s.response_timeout(Duration::from_secs(30)), Fault::Delay(Duration::from_secs(45)), &[
                "response_timeout",
            ])
        }),
        case("unsolicited-implicit-confirm", "implicitConfirm granted without being asked", |s| {
            s.responder(ResponderConfig::default().with_fault(Fault::UnsolicitedImplicitConfirm))
                .step(OperationStep::enroll())
                .oracle(all_of(vec![
                    oracle::outcome(0, Outcome::Errored),
                    oracle::defects(0, &["unsolicited_implicit_confirm"]),
                    oracle::certconf_sent(0, 0),
                ]))
        }),
        case("error-instead-of-pkiconf", "certConf answered with an error", |s| {
            s.responder(
                ResponderConfig::default()
                    .without_implicit_confirm()
                    .with_fault(Fault::ErrorInsteadOfPkiConf),
            )
            .step(OperationStep::enroll())
            .oracle(all_of(vec![
                oracle::outcome(0, Outcome::Errored),
                oracle::defects(0, &["peer_error"]),
                oracle::certconf_sent(0, 1),
                oracle::registry_idle(),
            ]))
        }),
    ]
}

/// An implicitly confirmed `ir` against a responder with `fault`, which
/// must end `Errored` with exactly `expected`.
fn faulty(scenario: Scenario, fault: Fault, expected: &'static [&'static str]) -> RunnableScenario {
    scenario
        .responder(ResponderConfig::default().with_fault(fault))
        .step(OperationStep::enroll().implicit_confirm())
        .oracle(all_of(vec![
            oracle::outcome(0, Outcome::Errored),
            oracle::defects(0, expected),
            oracle::certconf_sent(0, 0),
            oracle::registry_idle(),
        ]))
}
