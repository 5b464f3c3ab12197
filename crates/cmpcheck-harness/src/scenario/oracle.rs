//! Reusable oracles.
//!
//! Each helper checks one property of the final [`World`] and explains
//! what it found when the property does not hold. Compose them with
//! [`all_of`].

use cmpcheck_core::{Outcome, Verdict};
use cmpcheck_proto::{BodyKind, FailureInfo};

use crate::scenario::{OracleFn, World};

fn verdict(world: &World, step: usize) -> Result<&Verdict, String> {
    match world.step(step) {
        None => Err(format!("step {step} did not run")),
        Some(record) => record
            .result
            .as_ref()
            .map_err(|err| format!("step {step} was refused: {err}")),
    }
}

/// Every oracle must pass; the first failure is reported.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| oracles.iter().try_for_each(|oracle| oracle(world)))
}

/// The step ended with `expected`.
pub fn outcome(step: usize, expected: Outcome) -> OracleFn {
    Box::new(move |world| {
        let verdict = verdict(world, step)?;
        if verdict.outcome == expected {
            Ok(())
        } else {
            Err(format!("step {step}: expected outcome {expected}, got {verdict}"))
        }
    })
}

/// The peer showed no defects in the step.
pub fn compliant(step: usize) -> OracleFn {
    Box::new(move |world| {
        let verdict = verdict(world, step)?;
        if verdict.is_compliant() {
            Ok(())
        } else {
            Err(format!("step {step}: expected no defects, got {}", verdict.defects))
        }
    })
}

/// The step found exactly these defects, in this order.
pub fn defects(step: usize, expected: &'static [&'static str]) -> OracleFn {
    Box::new(move |world| {
        let verdict = verdict(world, step)?;
        let found = verdict.defects.names();
        if found == expected {
            Ok(())
        } else {
            Err(format!("step {step}: expected defects {expected:?}, got {found:?}"))
        }
    })
}

/// The engine refused the step with an error carrying `fail_info`.
pub fn refused(step: usize, fail_info: FailureInfo) -> OracleFn {
    Box::new(move |world| match world.refusal(step) {
        Some(err) if err.failure_info() == Some(fail_info) => Ok(()),
        Some(err) => Err(format!("step {step}: refused with {err}, expected {fail_info}")),
        None => Err(format!("step {step}: expected refusal with {fail_info}")),
    })
}

/// The step sent `count` certificate confirmations.
pub fn certconf_sent(step: usize, count: usize) -> OracleFn {
    Box::new(move |world| {
        let sent = verdict(world, step)?.audit.sent_count(BodyKind::CertConf);
        if sent == count {
            Ok(())
        } else {
            Err(format!("step {step}: expected {count} certConf sent, got {sent}"))
        }
    })
}

/// No transaction is live in the end entity's registry.
pub fn registry_idle() -> OracleFn {
    Box::new(|world| match world.registry().live_count() {
        0 => Ok(()),
        live => Err(format!("{live} transactions still live in the registry")),
    })
}

/// The responder holds no certificate waiting for confirmation.
pub fn peer_idle() -> OracleFn {
    Box::new(|world| {
        let pending = world.responder().pending_transactions();
        if pending.is_empty() {
            Ok(())
        } else {
            Err(format!("responder still awaits confirmation for {pending:?}"))
        }
    })
}

/// Ad hoc property of the world.
pub fn check(property: impl Fn(&World) -> Result<(), String> + 'static) -> OracleFn {
    Box::new(property)
}
