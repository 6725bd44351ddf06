//! Phase-gated workflow engine.
//!
//! A [`ProcessDefinition`] is an ordered list of phases. Each phase runs one
//! unit of work or fans out over several, may be skipped by an activation
//! predicate, contributes weighted score components, and may pause at
//! breakpoint gates for a human (or policy) decision. [`PhaseExecutor::run`]
//! drives a definition to a [`RunOutcome`].

pub mod config;
pub mod context;
pub mod definition;
pub mod errors;
pub mod executor;
pub mod fanout;
pub mod gate;
pub mod invoker;
pub mod ledger;
pub mod logging;
pub mod outcome;
pub mod predicate;
pub mod process_file;
pub mod score;
pub mod state;
pub mod ui;

pub use context::{CancelFlag, RunContext};
pub use definition::{PhaseSpec, PhaseWork, ProcessDefinition, ScoreBinding, UnitTemplate};
pub use errors::{DefinitionError, GateError, InvokerError};
pub use executor::{PhaseExecutor, RunEvent};
pub use fanout::{FanOutJoin, JoinPolicy};
pub use gate::{
    AutoApprover, Breakpoint, ChannelApprover, DecisionProvider, GatePolicy, GateSpec,
    InteractiveApprover,
};
pub use invoker::{CommandInvoker, CommandInvokerConfig, FnInvoker, TaskInvoker, UnitOfWork};
pub use outcome::{AbortReason, RunOutcome, RunStatus};
pub use predicate::{CompareOp, Predicate};
pub use process_file::ProcessFile;
pub use score::{FinalScore, ScoreAggregator, VerdictTable};
pub use state::{PhaseRecord, PhaseStatus, RecordedError, RunSnapshot};

pub use phasegate_common::{
    Artifact, Decision, DecisionKind, FailureKind, UnitFailure, UnitOutput, UnitResult,
};
