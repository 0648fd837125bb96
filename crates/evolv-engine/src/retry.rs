//! # Retry with Exponential Backoff
//!
//! Wraps calls to the gateway and the carrier. Only errors that report
//! [`EngineError::is_retryable`] are repeated; a 4xx from the carrier
//! ("pincode not serviceable") fails the round immediately.
//!
//! ```text
//! attempt 1 ──✗──► sleep 0.5s ──► attempt 2 ──✗──► sleep 1s ──► ... ──► Exhausted
//!                                     │
//!                                     └──✓──► Ok(value)
//! ```
//!
//! A round is bounded by `max_attempts`. The caller records the attempt count
//! on the entity (retry-pending) and the sweeper starts another round later.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use evolv_core::order::FulfillmentState;
use evolv_core::Shipment;

use crate::config::RetrySettings;
use crate::error::EngineError;

/// How hard to try before giving up on one round.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
        }
    }
}

impl RetryPolicy {
    /// A policy without sleeps, for callers that must not wait.
    pub fn single_attempt() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// The round ended without success.
#[derive(Debug)]
pub struct RetryExhausted {
    /// Attempts made in this round.
    pub attempts: u32,
    pub last_error: EngineError,
}

impl RetryExhausted {
    /// True if the last failure was transient and a later round may succeed.
    pub fn is_retryable(&self) -> bool {
        self.last_error.is_retryable()
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the round's
/// attempts are used up.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut backoff = policy.create_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => {
                warn!(operation, attempt, error = %e, "Giving up");
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = backoff.next_backoff().unwrap_or(policy.max_backoff);
                warn!(operation, attempt, ?delay, error = %e, "Call failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Booking outcome folded into the retry bookkeeping.
///
/// Returns the new state and, when the booking was given up, the detail for
/// the intervention queue.
pub fn settle_booking(
    prior_attempts: u32,
    outcome: Result<Shipment, RetryExhausted>,
    give_up_after: u32,
) -> (FulfillmentState, Option<String>) {
    match outcome {
        Ok(shipment) => (FulfillmentState::Created { shipment }, None),
        Err(exhausted) => {
            let attempts = prior_attempts + exhausted.attempts;
            let last_error = exhausted.last_error.to_string();
            if exhausted.is_retryable() && attempts < give_up_after {
                (FulfillmentState::RetryPending { attempts, last_error }, None)
            } else {
                (
                    FulfillmentState::NeedsIntervention {
                        attempts,
                        last_error: last_error.clone(),
                    },
                    Some(last_error),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast(4), "create_shipment", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(EngineError::external("carrier", "503", true))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&fast(4), "create_shipment", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(EngineError::external("carrier", "pincode not serviceable", false))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_round_is_bounded() {
        let err = with_backoff(&fast(3), "refund", || async {
            Err::<(), _>(EngineError::external("gateway", "timeout", true))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_settle_booking_rounds() {
        let retryable = RetryExhausted {
            attempts: 4,
            last_error: EngineError::external("carrier", "503", true),
        };
        let (state, failed) = settle_booking(0, Err(retryable), 12);
        assert!(matches!(state, FulfillmentState::RetryPending { attempts: 4, .. }));
        assert!(failed.is_none());

        let last_round = RetryExhausted {
            attempts: 4,
            last_error: EngineError::external("carrier", "503", true),
        };
        let (state, failed) = settle_booking(8, Err(last_round), 12);
        assert!(matches!(state, FulfillmentState::NeedsIntervention { attempts: 12, .. }));
        assert!(failed.is_some());

        let permanent = RetryExhausted {
            attempts: 1,
            last_error: EngineError::external("carrier", "invalid pincode", false),
        };
        let (state, _) = settle_booking(0, Err(permanent), 12);
        assert!(matches!(state, FulfillmentState::NeedsIntervention { attempts: 1, .. }));
    }
}
