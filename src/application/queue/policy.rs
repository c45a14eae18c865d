//! Failure classification for contract-call attempts.

use chrono::{DateTime, Utc};

use crate::domain::backoff::{RetryDecision, RetryPolicy};
use crate::error::{Error, TransactionError};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureClass {
    /// Retry with the same nonce; raise fees first if `bump_fee`.
    Transient { bump_fee: bool },
    /// Give up now.
    Permanent,
}

pub(crate) fn classify(error: &Error) -> FailureClass {
    match error {
        Error::Transaction(TransactionError::Underpriced(_)) => FailureClass::Transient { bump_fee: true },
        e if e.is_transient() => FailureClass::Transient { bump_fee: false },
        _ => FailureClass::Permanent,
    }
}

/// Next action after failed attempt `attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextStep {
    Retry { at: DateTime<Utc>, bump_fee: bool },
    Fail,
    Exhausted,
}

pub(crate) fn next_step(policy: &RetryPolicy, error: &Error, attempt: u32, now: DateTime<Utc>) -> NextStep {
    match classify(error) {
        FailureClass::Permanent => NextStep::Fail,
        FailureClass::Transient { bump_fee } => match policy.after_failure(attempt) {
            RetryDecision::Exhausted => NextStep::Exhausted,
            RetryDecision::Retry { delay } => NextStep::Retry {
                at: chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                bump_fee,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ChainError;

    #[test]
    fn underpriced_bumps_fees() {
        let err = Error::from(TransactionError::Underpriced("replacement".into()));
        assert_eq!(classify(&err), FailureClass::Transient { bump_fee: true });
    }

    #[test]
    fn connectivity_retries_without_bump() {
        let err = Error::from(ChainError::Connectivity("reset".into()));
        assert_eq!(classify(&err), FailureClass::Transient { bump_fee: false });
        assert_eq!(
            classify(&Error::timeout("transaction_receipt", 100)),
            FailureClass::Transient { bump_fee: false }
        );
    }

    #[test]
    fn reverts_are_permanent() {
        let err = Error::from(TransactionError::Reverted { reason: "closed".into() });
        assert_eq!(classify(&err), FailureClass::Permanent);
        let policy = RetryPolicy::default();
        assert_eq!(next_step(&policy, &err, 1, Utc::now()), NextStep::Fail);
    }

    #[test]
    fn retry_time_follows_policy() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5_000));
        let now = Utc::now();
        let err = Error::from(ChainError::Connectivity("reset".into()));

        assert_eq!(
            next_step(&policy, &err, 2, now),
            NextStep::Retry {
                at: now + chrono::Duration::milliseconds(10_000),
                bump_fee: false
            }
        );
        assert_eq!(next_step(&policy, &err, 3, now), NextStep::Exhausted);
    }
}
