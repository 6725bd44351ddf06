//! Per-run identity, clock, cancellation flag and logging span.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Cooperative cancellation flag shared between a run and whoever may cancel it.
///
/// Checked between phases and at each fan-out dispatch. Setting it never
/// interrupts a unit that is already running.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Identity and ambient handles for one workflow execution.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    process: String,
    started: Instant,
    started_at: DateTime<Utc>,
    cancel: CancelFlag,
    span: tracing::Span,
}

impl RunContext {
    pub fn new(process: &str) -> Self {
        Self::with_cancel_flag(process, CancelFlag::new())
    }

    /// Create a context that observes an externally owned cancellation flag.
    pub fn with_cancel_flag(process: &str, cancel: CancelFlag) -> Self {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, process = %process);
        Self {
            run_id,
            process: process.to_string(),
            started: Instant::now(),
            started_at: Utc::now(),
            cancel,
            span,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Logging span every event of this run is recorded under.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
