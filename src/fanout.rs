//! Bounded parallel dispatch of a phase's units.
//!
//! Every unit is waited for; a failure never short-circuits the join. Results
//! come back in unit order no matter which unit finishes first.

use futures::future::join_all;
use phasegate_common::{UnitFailure, UnitResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::context::RunContext;
use crate::invoker::{TaskInvoker, UnitOfWork, invoke_validated};

/// Default number of units in flight at once.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// How unit failures inside a fan-out phase decide the phase outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Any failed unit fails the phase.
    #[default]
    All,
    /// The phase keeps partial results and fails only if every unit failed.
    BestEffort,
}

impl JoinPolicy {
    /// The failure that fails the phase, if the policy says one does.
    pub fn phase_failure<'a>(&self, results: &'a [UnitResult]) -> Option<&'a UnitFailure> {
        let mut failures = results.iter().filter_map(UnitResult::failure_info);
        match self {
            JoinPolicy::All => failures.next(),
            JoinPolicy::BestEffort => {
                if results.iter().any(UnitResult::is_success) {
                    None
                } else {
                    failures.next()
                }
            }
        }
    }
}

impl std::fmt::Display for JoinPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinPolicy::All => write!(f, "all"),
            JoinPolicy::BestEffort => write!(f, "best_effort"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FanOutJoin {
    max_parallel: usize,
}

impl Default for FanOutJoin {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

impl FanOutJoin {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Dispatch `units` with at most `max_parallel` in flight and wait for all.
    ///
    /// The cancellation flag is checked as each unit acquires its slot: units
    /// already running finish, the rest come back as `Cancelled` failures.
    pub async fn join_all(
        &self,
        ctx: &RunContext,
        invoker: &dyn TaskInvoker,
        units: &[UnitOfWork],
    ) -> Vec<UnitResult> {
        let semaphore = Semaphore::new(self.max_parallel);
        let dispatches = units.iter().map(|unit| {
            let semaphore = &semaphore;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return UnitResult::cancelled("fan-out closed before dispatch");
                };
                if ctx.is_cancelled() {
                    return UnitResult::cancelled(format!(
                        "run cancelled before unit '{}' was dispatched",
                        unit.name
                    ));
                }
                invoke_validated(invoker, unit).await
            }
        });
        join_all(dispatches).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelFlag;
    use crate::invoker::FnInvoker;
    use phasegate_common::FailureKind;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn units(n: usize) -> Vec<UnitOfWork> {
        (0..n)
            .map(|i| UnitOfWork::new("scan", &format!("unit-{}", i), json!({"index": i})))
            .collect()
    }

    fn index(unit: &UnitOfWork) -> u64 {
        unit.input["index"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn results_follow_unit_order_not_completion_order() {
        let invoker = FnInvoker::new(|unit: UnitOfWork| async move {
            let i = index(&unit);
            tokio::time::sleep(Duration::from_millis(40 - i * 10)).await;
            UnitResult::success(json!(i))
        });
        let ctx = RunContext::new("t");
        let results = FanOutJoin::new(4).join_all(&ctx, &invoker, &units(4)).await;
        let values: Vec<Value> = results
            .iter()
            .map(|r| r.output().unwrap().value.clone())
            .collect();
        assert_eq!(values, vec![json!(0), json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn failures_do_not_short_circuit() {
        let invoker = FnInvoker::new(|unit: UnitOfWork| async move {
            match index(&unit) {
                1 | 3 => UnitResult::execution_failure("unit failed"),
                i => UnitResult::success(json!(i)),
            }
        });
        let ctx = RunContext::new("t");
        let results = FanOutJoin::default().join_all(&ctx, &invoker, &units(5)).await;
        assert_eq!(results.len(), 5);
        let ok: Vec<bool> = results.iter().map(UnitResult::is_success).collect();
        assert_eq!(ok, vec![true, false, true, false, true]);
    }

    #[tokio::test]
    async fn in_flight_units_never_exceed_the_bound() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        let invoker = FnInvoker::new(move |_unit: UnitOfWork| {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                UnitResult::success(Value::Null)
            }
        });
        let ctx = RunContext::new("t");
        let results = FanOutJoin::new(2).join_all(&ctx, &invoker, &units(7)).await;
        assert!(results.iter().all(UnitResult::is_success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_undispatched_units() {
        let flag = CancelFlag::new();
        let cancel = flag.clone();
        let invoker = FnInvoker::new(move |unit: UnitOfWork| {
            let cancel = cancel.clone();
            async move {
                if index(&unit) == 0 {
                    cancel.cancel();
                }
                UnitResult::success(json!(index(&unit)))
            }
        });
        let ctx = RunContext::with_cancel_flag("t", flag);
        let results = FanOutJoin::new(1).join_all(&ctx, &invoker, &units(3)).await;

        assert!(results[0].is_success());
        for result in &results[1..] {
            assert_eq!(result.failure_info().unwrap().kind, FailureKind::Cancelled);
        }
    }

    #[test]
    fn zero_parallelism_is_raised_to_one() {
        assert_eq!(FanOutJoin::new(0).max_parallel(), 1);
    }

    #[test]
    fn join_policies_decide_phase_failure() {
        let mixed = vec![
            UnitResult::success(json!(1)),
            UnitResult::execution_failure("boom"),
        ];
        assert!(JoinPolicy::All.phase_failure(&mixed).is_some());
        assert!(JoinPolicy::BestEffort.phase_failure(&mixed).is_none());

        let all_failed = vec![
            UnitResult::execution_failure("a"),
            UnitResult::validation_failure("b"),
        ];
        let failure = JoinPolicy::BestEffort.phase_failure(&all_failed).unwrap();
        assert_eq!(failure.message, "a");
    }
}
