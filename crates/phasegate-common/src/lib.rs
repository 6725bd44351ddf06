//! Boundary types shared between the phasegate engine and its collaborators.
//!
//! Task invokers and decision channels live outside the engine; they only
//! need these value types to talk to it:
//! - [`UnitResult`] and friends: what a unit of work hands back
//! - [`Artifact`]: an opaque output record accumulated by the engine
//! - [`Decision`]: the answer to a breakpoint question

pub mod artifact;
pub mod decision;
pub mod unit;

pub use artifact::Artifact;
pub use decision::{Decision, DecisionKind};
pub use unit::{FailureKind, UnitFailure, UnitOutput, UnitResult};
