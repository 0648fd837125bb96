//! # Customer Notifications
//!
//! Fire-and-forget. [`dispatch`] spawns the send and returns immediately;
//! a failed email never rolls back the transition that triggered it.

use async_trait::async_trait;
use evolv_core::order::NotificationKind;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineResult;

/// A message for one customer about one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub customer_id: String,
    pub order_id: String,
    pub order_number: String,
    pub kind: NotificationKind,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> EngineResult<()>;
}

/// Writes notifications to the log. Used until an email/SMS provider is wired.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        info!(
            customer_id = %notification.customer_id,
            order_number = %notification.order_number,
            kind = ?notification.kind,
            "Customer notification"
        );
        Ok(())
    }
}

/// Sends in the background. Failures are logged and dropped.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&notification).await {
            warn!(
                order_id = %notification.order_id,
                kind = ?notification.kind,
                error = %e,
                "Notification failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky(AtomicUsize);

    #[async_trait]
    impl Notifier for Flaky {
        async fn send(&self, _n: &Notification) -> EngineResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::external("mailer", "smtp down", true))
        }
    }

    #[tokio::test]
    async fn test_failed_send_does_not_propagate() {
        let flaky = Arc::new(Flaky(AtomicUsize::new(0)));
        dispatch(
            flaky.clone(),
            Notification {
                customer_id: "c-1".to_string(),
                order_id: "o-1".to_string(),
                order_number: "EV-20260301-ABC123".to_string(),
                kind: NotificationKind::OrderPlaced,
            },
        );
        for _ in 0..50 {
            if flaky.0.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("notification was never attempted");
    }
}
