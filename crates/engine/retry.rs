//! Per-endpoint retry policy.
//!
//! Every request runs under the endpoint timeout. A failed attempt is
//! classified as a timeout or another error and the matching [`Action`]
//! decides what happens next: retry after a fixed delay, skip the unit of
//! work, or abort the migration.

use crate::error::{EndpointError, MigrationError};
use serde::Serialize;
use std::{fmt, future::Future, str::FromStr, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Retry,
    Skip,
    Abort,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(format!(
                "invalid action {other:?}: expected one of retry, skip, abort"
            )),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Abort => "abort",
        })
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Skip,
    Abort,
    Exhausted,
}

/// Result of running an operation under a policy. Aborts come back as errors.
#[derive(Debug)]
pub enum Attempted<T> {
    Done { value: T, attempts: u32 },
    Skipped { error: EndpointError, attempts: u32 },
}

impl<T> Attempted<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Done { attempts, .. } | Self::Skipped { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub role: Role,
    pub timeout: Duration,
    pub delay: Duration,
    /// Zero means no limit.
    pub max_retries: u32,
    pub on_timeout: Action,
    pub on_error: Action,
}

impl RetryPolicy {
    pub fn action_for(&self, error: &EndpointError) -> Action {
        if error.is_timeout() {
            self.on_timeout
        } else {
            self.on_error
        }
    }

    /// Decision after `attempts` failed attempts, the last one failing with `error`.
    pub fn decide(&self, error: &EndpointError, attempts: u32) -> Decision {
        match self.action_for(error) {
            Action::Skip => Decision::Skip,
            Action::Abort => Decision::Abort,
            Action::Retry => {
                let retries_done = attempts.saturating_sub(1);
                if self.max_retries != 0 && retries_done >= self.max_retries {
                    Decision::Exhausted
                } else {
                    Decision::Retry
                }
            }
        }
    }

    pub async fn run<T, O, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: O,
    ) -> Result<Attempted<T>, MigrationError>
    where
        O: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EndpointError>>,
    {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                outcome = tokio::time::timeout(self.timeout, operation()) => outcome,
            };

            let error = match outcome {
                Ok(Ok(value)) => return Ok(Attempted::Done { value, attempts }),
                Ok(Err(error)) => error,
                Err(_) => EndpointError::Timeout(format!(
                    "no response within {}ms",
                    self.timeout.as_millis()
                )),
            };

            match self.decide(&error, attempts) {
                Decision::Skip => return Ok(Attempted::Skipped { error, attempts }),
                Decision::Abort => {
                    return Err(MigrationError::Aborted {
                        role: self.role,
                        attempts,
                        source: error,
                    });
                }
                Decision::Exhausted => {
                    return Err(MigrationError::ExhaustedRetries {
                        role: self.role,
                        attempts,
                        max_retries: self.max_retries,
                        source: error,
                    });
                }
                Decision::Retry => {
                    warn!(
                        role = %self.role,
                        attempt = attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %error,
                        "request failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                        _ = tokio::time::sleep(self.delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    fn policy(on_timeout: Action, on_error: Action, max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            role: Role::Reader,
            timeout: Duration::from_secs(5),
            delay: Duration::from_millis(1),
            max_retries,
            on_timeout,
            on_error,
        }
    }

    fn timeout() -> EndpointError {
        EndpointError::Timeout("slow".to_owned())
    }

    fn other() -> EndpointError {
        EndpointError::Other("500 internal server error".to_owned())
    }

    #[test]
    fn parses_actions_case_insensitively() {
        assert_eq!("retry".parse::<Action>(), Ok(Action::Retry));
        assert_eq!("SKIP".parse::<Action>(), Ok(Action::Skip));
        assert_eq!(" abort ".parse::<Action>(), Ok(Action::Abort));
        assert!("ignore".parse::<Action>().is_err());
    }

    #[test]
    fn timeouts_and_errors_use_their_own_action() {
        let policy = policy(Action::Skip, Action::Abort, 3);
        assert_eq!(policy.decide(&timeout(), 1), Decision::Skip);
        assert_eq!(policy.decide(&other(), 1), Decision::Abort);
    }

    #[test]
    fn retries_until_max_retries_then_exhausts() {
        let policy = policy(Action::Retry, Action::Retry, 2);
        assert_eq!(policy.decide(&other(), 1), Decision::Retry);
        assert_eq!(policy.decide(&other(), 2), Decision::Retry);
        assert_eq!(policy.decide(&other(), 3), Decision::Exhausted);
    }

    #[test]
    fn zero_max_retries_never_exhausts() {
        let policy = policy(Action::Retry, Action::Retry, 0);
        assert_eq!(policy.decide(&timeout(), 10_000), Decision::Retry);
    }

    #[tokio::test]
    async fn run_returns_value_after_transient_failures() {
        let policy = policy(Action::Retry, Action::Retry, 5);
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result = policy
            .run(&cancel, || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(other())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        match result {
            Ok(Attempted::Done { value, attempts }) => {
                assert_eq!(value, 42);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_classifies_elapsed_timeout() {
        let mut policy = policy(Action::Skip, Action::Abort, 0);
        policy.timeout = Duration::from_millis(10);
        let cancel = CancellationToken::new();

        let result = policy
            .run(&cancel, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, EndpointError>(())
            })
            .await;

        match result {
            Ok(Attempted::Skipped { error, attempts }) => {
                assert!(error.is_timeout());
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_reports_exhausted_retries() {
        let policy = policy(Action::Retry, Action::Retry, 1);
        let cancel = CancellationToken::new();

        let result = policy
            .run(&cancel, || async { Err::<(), _>(other()) })
            .await;

        assert!(matches!(
            result,
            Err(MigrationError::ExhaustedRetries {
                role: Role::Reader,
                attempts: 2,
                max_retries: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn run_aborts_on_error_action_abort() {
        let policy = policy(Action::Retry, Action::Abort, 0);
        let cancel = CancellationToken::new();

        let result = policy
            .run(&cancel, || async { Err::<(), _>(other()) })
            .await;

        assert!(matches!(
            result,
            Err(MigrationError::Aborted { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts_retry_loop() {
        let mut policy = policy(Action::Retry, Action::Retry, 0);
        policy.delay = Duration::from_secs(60);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let handle = tokio::spawn(async move {
            policy
                .run(&cancel, || async { Err::<(), _>(other()) })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();

        let result = handle.await.expect("task should not panic");
        assert!(matches!(result, Err(MigrationError::Cancelled)));
    }
}
