//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern.

use std::{sync::Arc, time::Duration};

use cmpcheck_core::{
    ConfirmPolicy, Environment, Exchange, MachineConfig, MachineError, OperationMachine,
    TransactionRegistry,
};
use cmpcheck_proto::{BodyKind, FailureInfo, TransactionId};

use crate::{
    codec::CborCodec,
    crypto::{SimCrypto, TrustedKeys},
    env::{DEFAULT_SEED, SimEnv},
    error::HarnessError,
    fixtures::{self, Initiator, RequestShape},
    responder::{MockResponder, ResponderConfig, SharedResponder},
    scenario::{OracleFn, StepRecord, World},
    transport::LoopbackTransport,
};

/// One operation the end entity performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationStep {
    kind: BodyKind,
    shape: RequestShape,
    confirm: ConfirmPolicy,
    reuse: Option<usize>,
    provoked: Option<FailureInfo>,
}

impl OperationStep {
    fn new(kind: BodyKind) -> Self {
        Self {
            kind,
            shape: RequestShape::default(),
            confirm: ConfirmPolicy::Accept,
            reuse: None,
            provoked: None,
        }
    }

    /// Initialization request (`ir`).
    pub fn enroll() -> Self {
        Self::new(BodyKind::Ir)
    }

    /// Certification request (`cr`).
    pub fn certify() -> Self {
        Self::new(BodyKind::Cr)
    }

    /// Key update request (`kur`).
    pub fn key_update() -> Self {
        Self::new(BodyKind::Kur)
    }

    /// Revocation request (`rr`).
    pub fn revoke() -> Self {
        Self::new(BodyKind::Rr)
    }

    /// General message (`genm`).
    pub fn general_message() -> Self {
        Self::new(BodyKind::Genm)
    }

    /// Ask for implicit confirmation.
    #[must_use]
    pub fn implicit_confirm(mut self) -> Self {
        self.shape.implicit_confirm = true;
        self
    }

    /// Send a proof of possession that cannot verify.
    #[must_use]
    pub fn bad_pop(mut self) -> Self {
        self.shape.bad_pop = true;
        self
    }

    /// Decide the certificate confirmation this way (default: accept).
    #[must_use]
    pub fn confirm(mut self, policy: ConfirmPolicy) -> Self {
        self.confirm = policy;
        self
    }

    /// Reuse the transaction identifier of an earlier step.
    #[must_use]
    pub fn reusing(mut self, step: usize) -> Self {
        self.reuse = Some(step);
        self
    }

    /// Expect the peer to reject with `fail_info`.
    #[must_use]
    pub fn provoking(mut self, fail_info: FailureInfo) -> Self {
        self.provoked = Some(fail_info);
        self
    }
}

/// Scenario step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run one operation to its verdict
    Operation(OperationStep),
    /// Submit a request whose transaction identifier is already live in
    /// the end entity's own registry
    DuplicateSubmit,
}

impl From<OperationStep> for Step {
    fn from(step: OperationStep) -> Self {
        Self::Operation(step)
    }
}

/// Scenario builder.
///
/// Construct a scenario by configuring the responder and adding steps.
/// Must call `.oracle()` to get a RunnableScenario that can be executed.
pub struct Scenario {
    name: String,
    seed: u64,
    machine: MachineConfig,
    responder: ResponderConfig,
    steps: Vec<Step>,
}

impl Scenario {
    /// Create a new scenario with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: DEFAULT_SEED,
            machine: MachineConfig::default(),
            responder: ResponderConfig::default(),
            steps: Vec::new(),
        }
    }

    /// Seed the simulated environment.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Configure the end entity's state machines.
    pub fn machine_config(mut self, config: MachineConfig) -> Self {
        self.machine = config;
        self
    }

    /// Pin the response timeout, keeping the rest of the machine config.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.machine.response_timeout = timeout;
        self
    }

    /// Pin the confirmation wait, keeping the rest of the machine config.
    pub fn confirm_wait(mut self, wait: Duration) -> Self {
        self.machine.confirm_wait = wait;
        self
    }

    /// Configure the responder.
    pub fn responder(mut self, config: ResponderConfig) -> Self {
        self.responder = config;
        self
    }

    /// Append a step.
    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// Executed scenario with the oracle's judgment.
#[derive(Debug)]
pub struct Execution {
    /// Scenario name
    pub name: String,
    /// Final state
    pub world: World,
    /// Oracle result
    pub oracle: Result<(), String>,
}

impl Execution {
    /// True if the oracle accepted the final state.
    pub fn passed(&self) -> bool {
        self.oracle.is_ok()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.scenario.name
    }

    /// Execute the scenario and keep the final world.
    ///
    /// Steps run in order on a single-threaded runtime whose clock is
    /// paused, so waits on a silent responder end at their deadline
    /// without real time passing. After the last step the responder
    /// releases every confirmation whose deadline has passed, then the
    /// oracle runs.
    pub fn execute(self) -> Result<Execution, HarnessError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()?;

        let Scenario { name, seed, machine, responder, steps } = self.scenario;
        let env = SimEnv::with_seed(seed);
        let responder = MockResponder::new(responder, env.clone()).shared();

        let span = tracing::info_span!("scenario", name = %name, seed);
        let _guard = span.enter();
        let world = runtime.block_on(drive(&env, &machine, responder, &steps))?;
        let oracle = (self.oracle)(&world);
        match &oracle {
            Ok(()) => tracing::info!("oracle passed"),
            Err(reason) => tracing::warn!(%reason, "oracle failed"),
        }

        Ok(Execution { name, world, oracle })
    }

    /// Execute the scenario and run the oracle.
    pub fn run(self) -> Result<(), String> {
        let name = self.scenario.name.clone();
        let execution = self.execute().map_err(|e| format!("Scenario '{name}': {e}"))?;
        execution.oracle.map_err(|reason| format!("Scenario '{name}': {reason}"))
    }
}

async fn drive(
    env: &SimEnv,
    config: &MachineConfig,
    responder: SharedResponder,
    steps: &[Step],
) -> Result<World, HarnessError> {
    let registry = TransactionRegistry::new();
    let initiator = Initiator::new(env.clone());
    let transport = LoopbackTransport::new(Arc::clone(&responder));
    let codec = CborCodec;
    let crypto = SimCrypto;
    let trust = TrustedKeys::new().with(&fixtures::ca_credential());
    let exchange = Exchange {
        transport: &transport,
        env,
        codec: &codec,
        crypto: &crypto,
        credential: initiator.credential(),
        trust: &trust,
    };
    let mut world = World::new(registry.clone(), Arc::clone(&responder));

    for (index, step) in steps.iter().enumerate() {
        let record = match step {
            Step::Operation(op) => {
                let transaction_id = match op.reuse {
                    Some(target) => {
                        world
                            .step(target)
                            .map(|record| record.transaction_id)
                            .ok_or(HarnessError::UnknownStep { step: index, target })?
                    },
                    None => env.fresh_transaction_id(),
                };
                let request = initiator.request(op.kind, transaction_id, op.shape);
                let mut machine = OperationMachine::new(registry.clone(), config.clone());
                let result = match op.provoked {
                    Some(fail_info) => machine.expect_failure(fail_info),
                    None => Ok(()),
                };
                let result = match result {
                    Ok(()) => exchange.run(&mut machine, request, op.confirm).await,
                    Err(err) => Err(err),
                };
                StepRecord { transaction_id, result }
            },
            Step::DuplicateSubmit => {
                let transaction_id = env.fresh_transaction_id();
                let shape = RequestShape { implicit_confirm: true, bad_pop: false };
                let result =
                    duplicate_submit(&exchange, &registry, config, &initiator, transaction_id, shape)
                        .await;
                StepRecord { transaction_id, result }
            },
        };

        match &record.result {
            Ok(verdict) => tracing::info!(step = index, %verdict, "step finished"),
            Err(err) => tracing::info!(step = index, %err, "step refused"),
        }
        world.record(record);
    }

    world.responder().expire_pending(env.now());
    Ok(world)
}

/// Hold `transaction_id` live with one machine and submit it again with a
/// second one.
async fn duplicate_submit(
    exchange: &Exchange<'_, LoopbackTransport, SimEnv, CborCodec, SimCrypto>,
    registry: &TransactionRegistry,
    config: &MachineConfig,
    initiator: &Initiator,
    transaction_id: TransactionId,
    shape: RequestShape,
) -> Result<cmpcheck_core::Verdict, MachineError> {
    let env = exchange.env;
    let mut holder = OperationMachine::new(registry.clone(), config.clone());
    holder.submit(initiator.request(BodyKind::Ir, transaction_id, shape), env.now())?;

    let mut duplicate = OperationMachine::new(registry.clone(), config.clone());
    let request = initiator.request(BodyKind::Ir, transaction_id, shape);
    let result = exchange.run(&mut duplicate, request, ConfirmPolicy::Accept).await;
    holder.abandon();
    result
}
