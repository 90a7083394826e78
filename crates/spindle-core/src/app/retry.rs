//! Retry loop around one fallible operation.
//!
//! `RetryPolicy::decide` says what to do; this module sleeps and re-invokes.
//! Per-attempt deadlines are the caller's business (the pipeline wraps each
//! attempt in `tokio::time::timeout`).

use std::fmt;
use std::future::Future;

use tracing::{debug, warn};

use crate::domain::{Decision, ErrorKind, FormatKey, RetryPolicy, TaskId};

/// Log context for one retried operation. `task_id` is `None` for lookups
/// made outside any task.
#[derive(Debug, Clone, Copy)]
pub struct RetryScope<'a> {
    pub task_id: Option<TaskId>,
    pub stage: &'static str,
    pub format: Option<&'a FormatKey>,
}

/// Run `op` until it succeeds, fails with an error `classify` calls
/// permanent, or `policy.max_attempts` is used up. Returns the last error.
pub async fn execute<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    scope: RetryScope<'_>,
    classify: C,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorKind,
    E: fmt::Display,
{
    let task_id = scope.task_id.map(tracing::field::display);
    let format = scope.format.map(FormatKey::as_str);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let err = match op().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(
                        task_id,
                        stage = scope.stage,
                        format,
                        attempt = attempts,
                        "succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        match policy.decide(attempts, classify(&err)) {
            Decision::Retry { delay, reason } => {
                warn!(
                    task_id,
                    stage = scope.stage,
                    format,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "{reason}"
                );
                tokio::time::sleep(delay).await;
            }
            Decision::GiveUp { reason } => {
                warn!(
                    task_id,
                    stage = scope.stage,
                    format,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "giving up: {reason}"
                );
                return Err(err);
            }
        }
    }
}
