//! Background ledger maintenance.
//!
//! Runs the pending-proof recovery protocol and the Live-proof
//! reconciliation pass at startup and on an interval. Failures are logged
//! and retried on the next tick; the passes themselves are idempotent.

use crate::ledger::{PendingResolution, ProofLedger};
use crate::mint::MintClient;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Periodic runner for the ledger recovery and reconciliation passes.
pub struct LedgerMonitor {
    ledger: Arc<ProofLedger>,
    client: Arc<dyn MintClient>,
    check_interval: Duration,
}

impl LedgerMonitor {
    pub fn new(ledger: Arc<ProofLedger>, client: Arc<dyn MintClient>, check_interval: Duration) -> Self {
        Self {
            ledger,
            client,
            check_interval,
        }
    }

    /// Create with the default check interval (5 minutes).
    pub fn with_default_interval(ledger: Arc<ProofLedger>, client: Arc<dyn MintClient>) -> Self {
        Self::new(ledger, client, Duration::from_secs(300))
    }

    /// Run both passes once. Suitable for process start.
    pub async fn run_once(&self) -> Result<PendingResolution> {
        let resolution = self.ledger.resolve_pending(self.client.as_ref()).await?;
        self.ledger.reconcile_live(self.client.as_ref()).await?;
        Ok(resolution)
    }

    /// Run the maintenance loop until the task is dropped.
    pub async fn start(&self) {
        loop {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "ledger maintenance pass failed");
            }
            sleep(self.check_interval).await;
        }
    }
}
