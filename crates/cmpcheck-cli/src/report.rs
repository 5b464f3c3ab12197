//! Suite report.
//!
//! One entry per executed case with the oracle's judgment and every
//! verdict the case produced, serialized as CBOR.

use std::path::Path;

use cmpcheck_core::Verdict;
use cmpcheck_harness::scenario::Execution;
use serde::Serialize;

use crate::CliError;

/// Outcome of one conformance case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    /// Case name
    pub name: String,
    /// Oracle accepted the final state
    pub passed: bool,
    /// Oracle's explanation when it did not
    pub failure: Option<String>,
    /// Verdicts of the steps that ran to completion
    pub verdicts: Vec<Verdict>,
    /// Errors of the steps the engine refused
    pub refusals: Vec<String>,
}

impl CaseReport {
    pub fn from_execution(execution: &Execution) -> Self {
        let mut verdicts = Vec::new();
        let mut refusals = Vec::new();
        for record in execution.world.steps() {
            match &record.result {
                Ok(verdict) => verdicts.push(verdict.clone()),
                Err(err) => refusals.push(err.to_string()),
            }
        }
        Self {
            name: execution.name.clone(),
            passed: execution.passed(),
            failure: execution.oracle.clone().err(),
            verdicts,
            refusals,
        }
    }
}

/// Every case of one suite run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    seed: u64,
    cases: Vec<CaseReport>,
}

impl Report {
    pub fn new(seed: u64) -> Self {
        Self { seed, cases: Vec::new() }
    }

    pub fn push(&mut self, case: CaseReport) {
        self.cases.push(case);
    }

    pub fn cases(&self) -> &[CaseReport] {
        &self.cases
    }

    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|case| case.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    /// One line per case, then the totals.
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .cases
            .iter()
            .map(|case| match &case.failure {
                None => format!("PASS {}", case.name),
                Some(reason) => format!("FAIL {}: {reason}", case.name),
            })
            .collect();
        lines.push(format!(
            "{} passed, {} failed (seed {})",
            self.passed(),
            self.failed(),
            self.seed
        ));
        lines.join("\n")
    }

    pub fn encode(&self) -> Result<Vec<u8>, CliError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes).map_err(|e| CliError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    pub fn write(&self, path: &Path) -> Result<(), CliError> {
        let bytes = self.encode()?;
        std::fs::write(path, bytes)
            .map_err(|source| CliError::Write { path: path.to_path_buf(), source })
    }
}
