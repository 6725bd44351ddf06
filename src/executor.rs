//! The phase executor: drives a process definition from its first phase to a
//! scored outcome.
//!
//! Phases run strictly in definition order. For each one the executor checks
//! for cancellation, evaluates the activation predicate against a snapshot,
//! dispatches the phase's units, commits the result into the run state, then
//! evaluates the phase's gates. The executor is the only writer of
//! [`RunState`].

use chrono::Utc;
use phasegate_common::{Decision, DecisionKind, FailureKind, UnitResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::context::RunContext;
use crate::definition::{PhaseSpec, PhaseWork, ProcessDefinition};
use crate::fanout::FanOutJoin;
use crate::gate::{BreakpointGate, DecisionProvider, GateOutcome, GateSpec};
use crate::invoker::{TaskInvoker, UnitOfWork, invoke_validated};
use crate::outcome::{AbortReason, RunOutcome, RunStatus};
use crate::score::DEFAULT_WEIGHT_TOLERANCE;
use crate::state::{PhaseRecord, PhaseStatus, RecordedError, RunState};

/// Progress events emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        process: String,
        phases: usize,
    },
    PhaseStarted {
        phase: String,
        index: usize,
        units: usize,
    },
    PhaseSkipped {
        phase: String,
    },
    UnitFinished {
        phase: String,
        unit: String,
        success: bool,
    },
    PhaseCompleted {
        phase: String,
        duration_ms: u64,
    },
    PhaseFailed {
        phase: String,
        required: bool,
        kind: FailureKind,
        message: String,
    },
    BreakpointTriggered {
        phase: String,
        gate: String,
        title: String,
    },
    BreakpointResolved {
        phase: String,
        gate: String,
        decision: DecisionKind,
    },
    RunFinished {
        status: RunStatus,
        score: Option<f64>,
        verdict: Option<String>,
    },
}

pub struct PhaseExecutor {
    invoker: Arc<dyn TaskInvoker>,
    approver: Arc<dyn DecisionProvider>,
    fan_out: FanOutJoin,
    weight_tolerance: f64,
    event_tx: Option<mpsc::Sender<RunEvent>>,
}

impl PhaseExecutor {
    pub fn new(invoker: Arc<dyn TaskInvoker>, approver: Arc<dyn DecisionProvider>) -> Self {
        Self {
            invoker,
            approver,
            fan_out: FanOutJoin::default(),
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            event_tx: None,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.fan_out = FanOutJoin::new(max_parallel);
        self
    }

    pub fn with_weight_tolerance(mut self, tolerance: f64) -> Self {
        self.weight_tolerance = tolerance.abs();
        self
    }

    /// Send progress events to `tx`.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Execute `definition` from its first phase with `input` as the initial
    /// payload. Workflow failures are reported in the outcome, never as errors.
    pub async fn run(
        &self,
        ctx: &RunContext,
        definition: &ProcessDefinition,
        input: Value,
    ) -> RunOutcome {
        self.run_phases(ctx, definition, input)
            .instrument(ctx.span().clone())
            .await
    }

    async fn run_phases(
        &self,
        ctx: &RunContext,
        definition: &ProcessDefinition,
        input: Value,
    ) -> RunOutcome {
        let mut state = RunState::new(input);
        self.emit(RunEvent::RunStarted {
            run_id: ctx.run_id(),
            process: definition.name.clone(),
            phases: definition.phases.len(),
        })
        .await;
        tracing::info!(phases = definition.phases.len(), "run started");

        if let Err(err) = definition.validate() {
            let phase = err.phase().unwrap_or(&definition.name).to_string();
            let message = err.to_string();
            state.record_error(RecordedError::fatal(
                &phase,
                None,
                FailureKind::ValidationFailure,
                &message,
            ));
            let reason = AbortReason {
                phase,
                kind: FailureKind::ValidationFailure,
                message,
            };
            return self.finish(ctx, definition, state, Some(reason)).await;
        }
        if let Some(warning) = definition.weight_warning(self.weight_tolerance) {
            tracing::warn!("{}", warning);
        }

        for (index, phase) in definition.phases.iter().enumerate() {
            if ctx.is_cancelled() {
                let message = "run cancelled before phase started".to_string();
                tracing::warn!(phase = %phase.name, "{}", message);
                state.record_error(RecordedError::fatal(
                    &phase.name,
                    None,
                    FailureKind::Cancelled,
                    &message,
                ));
                let reason = AbortReason {
                    phase: phase.name.clone(),
                    kind: FailureKind::Cancelled,
                    message,
                };
                return self.finish(ctx, definition, state, Some(reason)).await;
            }

            if let ControlFlow::Break(reason) =
                self.run_phase(ctx, definition, index, phase, &mut state).await
            {
                return self.finish(ctx, definition, state, Some(reason)).await;
            }
        }

        self.finish(ctx, definition, state, None).await
    }

    #[tracing::instrument(skip_all, fields(phase = %phase.name))]
    async fn run_phase(
        &self,
        ctx: &RunContext,
        definition: &ProcessDefinition,
        index: usize,
        phase: &PhaseSpec,
        state: &mut RunState,
    ) -> ControlFlow<AbortReason> {
        let snapshot = state.snapshot();
        if !phase.activation.evaluate(&snapshot) {
            tracing::info!(when = %phase.activation.describe(), "phase skipped");
            state.record_phase(PhaseRecord::skipped(&phase.name));
            self.emit(RunEvent::PhaseSkipped {
                phase: phase.name.clone(),
            })
            .await;
            return ControlFlow::Continue(());
        }

        let started = Instant::now();
        let units: Vec<UnitOfWork> = phase
            .work
            .units()
            .iter()
            .map(|template| template.materialize(&snapshot, &phase.name))
            .collect();
        tracing::info!(units = units.len(), "phase started");
        self.emit(RunEvent::PhaseStarted {
            phase: phase.name.clone(),
            index,
            units: units.len(),
        })
        .await;

        let results = match &phase.work {
            PhaseWork::Single(_) => {
                let mut results = Vec::with_capacity(units.len());
                for unit in &units {
                    results.push(invoke_validated(self.invoker.as_ref(), unit).await);
                }
                results
            }
            PhaseWork::FanOut { .. } => {
                self.fan_out
                    .join_all(ctx, self.invoker.as_ref(), &units)
                    .await
            }
        };
        for (unit, result) in units.iter().zip(&results) {
            self.emit(RunEvent::UnitFinished {
                phase: phase.name.clone(),
                unit: unit.name.clone(),
                success: result.is_success(),
            })
            .await;
        }

        let failed_units = results.iter().filter(|r| !r.is_success()).count();
        let duration_ms = started.elapsed().as_millis() as u64;
        let phase_failure = phase.work.policy().phase_failure(&results).cloned();
        let fatal = phase_failure.is_some() && phase.required;

        for (unit, result) in units.iter().zip(&results) {
            if let Some(failure) = result.failure_info() {
                let error = if fatal {
                    RecordedError::fatal(&phase.name, Some(&unit.name), failure.kind, &failure.message)
                } else {
                    RecordedError::warning(&phase.name, Some(&unit.name), failure.kind, &failure.message)
                };
                state.record_error(error);
            }
        }

        if let Some(failure) = phase_failure {
            let status = if phase.required {
                PhaseStatus::Aborted
            } else {
                PhaseStatus::Failed
            };
            state.record_phase(PhaseRecord {
                phase: phase.name.clone(),
                status,
                output: None,
                units: units.len(),
                failed_units,
                duration_ms,
            });
            self.emit(RunEvent::PhaseFailed {
                phase: phase.name.clone(),
                required: phase.required,
                kind: failure.kind,
                message: failure.message.clone(),
            })
            .await;

            if phase.required {
                tracing::error!(kind = %failure.kind, "required phase failed: {}", failure.message);
                return ControlFlow::Break(AbortReason {
                    phase: phase.name.clone(),
                    kind: failure.kind,
                    message: failure.message,
                });
            }
            tracing::warn!(kind = %failure.kind, "optional phase failed: {}", failure.message);
        } else {
            if failed_units > 0 {
                tracing::warn!(failed_units, "phase kept partial results");
            }
            let output = merge_output(&phase.work, &results);
            for result in &results {
                if let Some(unit_output) = result.output() {
                    state.append_artifacts(unit_output.artifacts.iter().cloned());
                }
            }
            self.register_scores(definition, phase, &output, state);
            state.record_phase(PhaseRecord {
                phase: phase.name.clone(),
                status: PhaseStatus::Completed,
                output: Some(output),
                units: units.len(),
                failed_units,
                duration_ms,
            });
            tracing::info!(duration_ms, "phase completed");
            self.emit(RunEvent::PhaseCompleted {
                phase: phase.name.clone(),
                duration_ms,
            })
            .await;
        }

        let cancelled_units = results
            .iter()
            .filter_map(UnitResult::failure_info)
            .filter(|failure| failure.kind == FailureKind::Cancelled)
            .count();
        if cancelled_units > 0 {
            let message = format!(
                "run cancelled during phase, {} of {} units not dispatched",
                cancelled_units,
                units.len()
            );
            tracing::warn!("{}", message);
            state.record_error(RecordedError::fatal(
                &phase.name,
                None,
                FailureKind::Cancelled,
                &message,
            ));
            return ControlFlow::Break(AbortReason {
                phase: phase.name.clone(),
                kind: FailureKind::Cancelled,
                message,
            });
        }

        for gate in &phase.gates {
            self.evaluate_gate(&phase.name, gate, state).await?;
        }
        ControlFlow::Continue(())
    }

    fn register_scores(
        &self,
        definition: &ProcessDefinition,
        phase: &PhaseSpec,
        output: &Value,
        state: &mut RunState,
    ) {
        for binding in &phase.scores {
            let value = output.pointer(&binding.pointer).and_then(Value::as_f64);
            match (definition.weight(&binding.component), value) {
                (Some(weight), Some(value)) => {
                    tracing::debug!(component = %binding.component, weight, value, "score registered");
                    state.add_score(&binding.component, weight, value);
                }
                (None, _) => {
                    let message = format!("score component '{}' has no weight", binding.component);
                    tracing::warn!("{}", message);
                    state.record_error(RecordedError::warning(
                        &phase.name,
                        None,
                        FailureKind::ValidationFailure,
                        &message,
                    ));
                }
                (Some(_), None) => {
                    let message = format!(
                        "score pointer '{}' for component '{}' did not resolve to a number",
                        binding.pointer, binding.component
                    );
                    tracing::warn!("{}", message);
                    state.record_error(RecordedError::warning(
                        &phase.name,
                        None,
                        FailureKind::ValidationFailure,
                        &message,
                    ));
                }
            }
        }
    }

    /// Fire `gate` if its trigger holds and wait for the decision.
    async fn evaluate_gate(
        &self,
        phase: &str,
        gate: &GateSpec,
        state: &mut RunState,
    ) -> ControlFlow<AbortReason> {
        let snapshot = state.snapshot();
        if !gate.trigger.evaluate(&snapshot) {
            tracing::debug!(gate = %gate.name, "gate not triggered");
            return ControlFlow::Continue(());
        }

        let mut machine = BreakpointGate::new(gate.clone(), phase);
        let breakpoint = match machine.trigger(snapshot.gate_context()) {
            Ok(breakpoint) => breakpoint,
            Err(err) => return ControlFlow::Break(gate_abort(phase, err.to_string())),
        };
        tracing::info!(gate = %gate.name, policy = %gate.policy, "breakpoint triggered, awaiting decision");
        self.emit(RunEvent::BreakpointTriggered {
            phase: phase.to_string(),
            gate: gate.name.clone(),
            title: gate.title.clone(),
        })
        .await;

        let decision = match self.approver.present(&breakpoint).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(gate = %gate.name, "decision provider failed: {:#}", err);
                Decision::rejected().with_notes(format!("{:#}", err))
            }
        };
        let kind = decision.kind;
        let notes = decision.notes.clone();

        let outcome = machine.resolve(decision);
        if let Some(resolved) = machine.into_breakpoint() {
            state.record_breakpoint(resolved);
        }
        self.emit(RunEvent::BreakpointResolved {
            phase: phase.to_string(),
            gate: gate.name.clone(),
            decision: kind,
        })
        .await;

        match outcome {
            Ok(GateOutcome::Resume) => {
                if kind == DecisionKind::Rejected {
                    tracing::warn!(gate = %gate.name, "advisory breakpoint rejected, continuing");
                } else {
                    tracing::info!(gate = %gate.name, "breakpoint approved");
                }
                ControlFlow::Continue(())
            }
            Ok(GateOutcome::Abort) => {
                let message = match notes {
                    Some(notes) => format!("breakpoint '{}' rejected: {}", gate.name, notes),
                    None => format!("breakpoint '{}' rejected", gate.name),
                };
                tracing::warn!(gate = %gate.name, "{}", message);
                state.record_error(RecordedError::fatal(
                    phase,
                    None,
                    FailureKind::GateRejected,
                    &message,
                ));
                ControlFlow::Break(AbortReason {
                    phase: phase.to_string(),
                    kind: FailureKind::GateRejected,
                    message,
                })
            }
            Err(err) => ControlFlow::Break(gate_abort(phase, err.to_string())),
        }
    }

    async fn finish(
        &self,
        ctx: &RunContext,
        definition: &ProcessDefinition,
        state: RunState,
        abort: Option<AbortReason>,
    ) -> RunOutcome {
        let final_score = if state.scores().is_empty() {
            None
        } else {
            Some(
                state
                    .scores()
                    .clone()
                    .with_tolerance(self.weight_tolerance)
                    .finalize(&definition.verdicts),
            )
        };
        let status = if abort.is_some() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };

        match &abort {
            Some(reason) => tracing::warn!(%status, "run aborted: {}", reason),
            None => tracing::info!(%status, "run finished"),
        }
        self.emit(RunEvent::RunFinished {
            status,
            score: final_score.as_ref().map(|s| s.score),
            verdict: final_score.as_ref().map(|s| s.verdict.clone()),
        })
        .await;

        RunOutcome {
            run_id: ctx.run_id(),
            process: definition.name.clone(),
            status,
            abort,
            state: state.snapshot(),
            final_score,
            started_at: ctx.started_at(),
            finished_at: Utc::now(),
            duration_ms: ctx.elapsed().as_millis() as u64,
        }
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

fn gate_abort(phase: &str, message: String) -> AbortReason {
    tracing::error!(phase, "{}", message);
    AbortReason {
        phase: phase.to_string(),
        kind: FailureKind::GateRejected,
        message,
    }
}

/// Phase output: the unit value for single phases, an array in unit order
/// (`null` for failed units) for fan-out phases.
fn merge_output(work: &PhaseWork, results: &[UnitResult]) -> Value {
    let mut values = results
        .iter()
        .map(|r| r.output().map(|o| o.value.clone()).unwrap_or(Value::Null));
    match work {
        PhaseWork::Single(_) => values.next().unwrap_or(Value::Null),
        PhaseWork::FanOut { .. } => Value::Array(values.collect()),
    }
}
