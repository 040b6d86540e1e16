use crate::database::payment_repository::{Payment, PaymentRepository};
use crate::payments::error::PaymentError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::machine::{self, GatewayOutcome};
use crate::services::effects::SideEffectDispatcher;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often the worker wakes up to poll the gateway. Must stay well
    /// under a minute so the 15-minute verify window is enforced with
    /// sub-minute granularity.
    pub poll_interval: Duration,
    /// Maximum number of in-flight payments fetched per cycle.
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 200,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("RECONCILER_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Single long-running polling loop that drives every in-flight payment
/// through the state machine until it reaches a terminal state.
///
/// Exactly one instance runs per process; cycles never overlap, so
/// per-payment transitions are totally ordered by cycle sequence.
pub struct PaymentReconciler {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<SideEffectDispatcher>,
    config: ReconcilerConfig,
    /// Message of the failure currently being suppressed, if any. Repeated
    /// identical cycle failures log once, then stay quiet until recovery.
    error_streak: Option<String>,
}

impl PaymentReconciler {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<SideEffectDispatcher>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            pool,
            gateway,
            dispatcher,
            config,
            error_streak: None,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            verify_window_secs = machine::MAX_VERIFY_WINDOW_SECS,
            "payment reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(()) => {
                            if let Some(previous) = self.error_streak.take() {
                                info!(previous_error = %previous, "reconcile cycle recovered");
                            }
                        }
                        Err(e) => {
                            let message = e.to_string();
                            if self.error_streak.as_deref() == Some(message.as_str()) {
                                debug!(error = %message, "reconcile cycle still failing");
                            } else {
                                warn!(error = %message, "reconcile cycle failed");
                                self.error_streak = Some(message);
                            }
                        }
                    }
                }
            }
        }

        info!("payment reconciliation worker stopped");
    }

    /// One polling cycle over a fresh repository scope. A failure anywhere in
    /// the batch fetch aborts the cycle; a failure on one payment does not
    /// stop the rest of the batch.
    async fn run_cycle(&self) -> anyhow::Result<()> {
        let repo = PaymentRepository::new(self.pool.clone());
        let batch = repo.find_in_flight(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(());
        }

        debug!(batch = batch.len(), "reconciling in-flight payments");
        for payment in batch {
            if let Err(e) = self.reconcile_one(&payment).await {
                warn!(
                    payment_id = payment.id,
                    status = %payment.status,
                    error = %e,
                    "failed to reconcile payment; will retry next cycle"
                );
            }
        }
        Ok(())
    }

    async fn reconcile_one(&self, payment: &Payment) -> anyhow::Result<()> {
        let now = chrono::Utc::now();

        // Once the verify window has elapsed the outcome no longer matters,
        // so skip the gateway round-trip entirely.
        let outcome = if machine::verify_window_elapsed(payment, now) {
            GatewayOutcome::Unreachable
        } else {
            match self.gateway.verify(payment).await {
                Ok(verify) => GatewayOutcome::Verify(verify),
                Err(e @ PaymentError::Validation { .. })
                | Err(e @ PaymentError::UnsupportedIssuer { .. }) => {
                    // A verify call cannot be fixed by waiting; surface it.
                    return Err(e.into());
                }
                Err(e) => {
                    debug!(
                        payment_id = payment.id,
                        error = %e,
                        "gateway unreachable; no state change"
                    );
                    GatewayOutcome::Unreachable
                }
            }
        };

        if let Some(transition) = machine::transition(payment, &outcome, now) {
            match self.dispatcher.settle(payment, &transition).await? {
                Some(updated) => {
                    if updated.status.is_terminal() {
                        info!(
                            payment_id = updated.id,
                            status = %updated.status,
                            reason = %updated.reason,
                            "payment reached terminal state"
                        );
                    }
                }
                None => {
                    debug!(
                        payment_id = payment.id,
                        "payment changed concurrently; skipping this cycle"
                    );
                }
            }
        }
        Ok(())
    }
}
