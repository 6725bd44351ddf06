//! Channel-backed decision provider.
//!
//! The executor side holds a [`ChannelApprover`]; an external actor (a UI, a
//! chat bot, a test) holds the [`BreakpointReceiver`] and answers each
//! [`PendingBreakpoint`] by calling `resolve`. The run stays suspended on a
//! oneshot receiver until then.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use phasegate_common::Decision;
use tokio::sync::{mpsc, oneshot};

use super::{Breakpoint, DecisionProvider};

/// A breakpoint handed to an external actor, with the means to answer it.
#[derive(Debug)]
pub struct PendingBreakpoint {
    breakpoint: Breakpoint,
    responder: oneshot::Sender<Decision>,
}

impl PendingBreakpoint {
    pub fn breakpoint(&self) -> &Breakpoint {
        &self.breakpoint
    }

    /// Deliver the decision and wake the suspended run.
    pub fn resolve(self, decision: Decision) -> Result<()> {
        self.responder
            .send(decision)
            .map_err(|_| anyhow!("Run waiting on breakpoint '{}' is gone", self.breakpoint.gate))
    }

    pub fn approve(self) -> Result<()> {
        self.resolve(Decision::approved())
    }

    pub fn reject(self, notes: &str) -> Result<()> {
        self.resolve(Decision::rejected().with_notes(notes))
    }
}

/// Receiving end for breakpoints raised by a run.
pub struct BreakpointReceiver {
    rx: mpsc::Receiver<PendingBreakpoint>,
}

impl BreakpointReceiver {
    /// Wait for the next breakpoint. `None` once the approver is dropped.
    pub async fn recv(&mut self) -> Option<PendingBreakpoint> {
        self.rx.recv().await
    }
}

#[derive(Clone)]
pub struct ChannelApprover {
    tx: mpsc::Sender<PendingBreakpoint>,
}

impl ChannelApprover {
    /// Create an approver and the receiver its breakpoints are delivered to.
    pub fn channel(buffer: usize) -> (Self, BreakpointReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, BreakpointReceiver { rx })
    }
}

#[async_trait]
impl DecisionProvider for ChannelApprover {
    async fn present(&self, breakpoint: &Breakpoint) -> Result<Decision> {
        let (responder, decision) = oneshot::channel();
        self.tx
            .send(PendingBreakpoint {
                breakpoint: breakpoint.clone(),
                responder,
            })
            .await
            .map_err(|_| anyhow!("No receiver for breakpoint '{}'", breakpoint.gate))?;

        decision
            .await
            .map_err(|_| anyhow!("Breakpoint '{}' was dropped without a decision", breakpoint.gate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{BreakpointGate, GateSpec};
    use phasegate_common::DecisionKind;
    use serde_json::Value;

    fn breakpoint() -> Breakpoint {
        let mut gate = BreakpointGate::new(GateSpec::checkpoint("g", "Gate", "Continue?"), "p");
        gate.trigger(Value::Null).unwrap()
    }

    #[tokio::test]
    async fn present_waits_for_resolution() {
        let (approver, mut rx) = ChannelApprover::channel(1);
        let bp = breakpoint();

        let waiter = tokio::spawn(async move { approver.present(&bp).await });
        let pending = rx.recv().await.unwrap();
        assert_eq!(pending.breakpoint().question, "Continue?");
        assert!(!waiter.is_finished());

        pending.reject("not yet").unwrap();
        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision.kind, DecisionKind::Rejected);
        assert_eq!(decision.notes.as_deref(), Some("not yet"));
    }

    #[tokio::test]
    async fn dropped_pending_breakpoint_is_an_error() {
        let (approver, mut rx) = ChannelApprover::channel(1);
        let bp = breakpoint();
        let waiter = tokio::spawn(async move { approver.present(&bp).await });
        drop(rx.recv().await.unwrap());
        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn closed_receiver_is_an_error() {
        let (approver, rx) = ChannelApprover::channel(1);
        drop(rx);
        assert!(approver.present(&breakpoint()).await.is_err());
    }
}
