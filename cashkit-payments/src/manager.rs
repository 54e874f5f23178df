//! The payment orchestrator.
//!
//! Each incoming demand moves through a fixed state machine:
//!
//! ```text
//! RECEIVED -> VALIDATED -> FEASIBLE -> {AUTO_APPROVED | AWAITING_APPROVAL}
//!          -> BUILDING -> COMPLETED | DENIED | FAILED
//! ```
//!
//! Reserved proofs are released on every failure path before the point of
//! no return (the swap reaching the mint). Past that point the ledger's
//! recovery protocol owns them, which is what makes a crash at any
//! suspension point safe. The melt flow additionally re-queries payment
//! status when the mint call itself fails, and refuses to guess when even
//! the status query fails.

use crate::approval::{ApprovalContext, ApprovalPrompt};
use crate::policy::PolicyStore;
use crate::{PayError, PaymentReply, PaymentRequestEnvelope, Result};
use cashkit_lib::proofs::total_amount;
use cashkit_lib::{
    Amount, CounterAllocator, CustodyError, MeltQuoteState, MintClient, MintSnapshot, MintUrl,
    PendingMintQuote, PendingOutgoingToken, PendingStore, Proof, ProofLedger, SecretMode,
    SendOptions, Transaction, TransactionKind, TransactionLog, TransactionStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct PaymentManagerConfig {
    /// The unit this wallet accounts in.
    pub unit: String,
    /// Bound on the interactive approval wait.
    pub approval_timeout: Duration,
    /// Use seed-derived secrets for outgoing tokens (requires a configured
    /// recovery seed in the mint client).
    pub deterministic_secrets: bool,
}

impl Default for PaymentManagerConfig {
    fn default() -> Self {
        Self {
            unit: "sat".to_string(),
            approval_timeout: Duration::from_secs(60),
            deterministic_secrets: false,
        }
    }
}

/// Result of an outbound Lightning payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeltSummary {
    pub amount: Amount,
    /// Change returned for unused fee reserve. Zero when a melt succeeded
    /// only after an error: that change is unrecoverable without a
    /// deterministic seed.
    pub change: Amount,
    pub preimage: Option<String>,
}

/// Drives payment demands through validation, policy, approval and token
/// building.
pub struct PaymentManager {
    ledger: Arc<ProofLedger>,
    client: Arc<dyn MintClient>,
    counters: Arc<CounterAllocator>,
    policy: Arc<dyn PolicyStore>,
    approval: Arc<dyn ApprovalPrompt>,
    transactions: Arc<TransactionLog>,
    pending: Arc<PendingStore>,
    config: PaymentManagerConfig,
}

impl PaymentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<ProofLedger>,
        client: Arc<dyn MintClient>,
        counters: Arc<CounterAllocator>,
        policy: Arc<dyn PolicyStore>,
        approval: Arc<dyn ApprovalPrompt>,
        transactions: Arc<TransactionLog>,
        pending: Arc<PendingStore>,
        config: PaymentManagerConfig,
    ) -> Self {
        Self {
            ledger,
            client,
            counters,
            policy,
            approval,
            transactions,
            pending,
            config,
        }
    }

    /// Handle a decoded payment demand end to end.
    ///
    /// Never returns an error: every outcome maps to a bridge reply, with
    /// policy/user decisions as `Denied` and everything else as `Failed`.
    pub async fn handle_request(&self, request: PaymentRequestEnvelope) -> PaymentReply {
        debug!(request_id = %request.request_id, origin = %request.origin, "payment demand received");

        match self.process_request(&request).await {
            Ok(token) => {
                info!(request_id = %request.request_id, "payment completed");
                PaymentReply::Token { token }
            }
            Err(PayError::Custody(CustodyError::PolicyDenied { reason })) => {
                info!(request_id = %request.request_id, %reason, "payment denied");
                PaymentReply::Denied { reason }
            }
            Err(PayError::ApprovalTimeout) => {
                info!(request_id = %request.request_id, "approval timed out");
                PaymentReply::Denied {
                    reason: "approval timed out".to_string(),
                }
            }
            Err(PayError::ApprovalClosed(reason)) => {
                info!(request_id = %request.request_id, %reason, "approval surface closed");
                PaymentReply::Denied { reason }
            }
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "payment failed");
                PaymentReply::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn process_request(&self, request: &PaymentRequestEnvelope) -> Result<String> {
        self.validate(request)?;
        debug!(request_id = %request.request_id, "validated");

        let (mint, balance) = self.choose_mint(request).await?;
        debug!(request_id = %request.request_id, mint = %mint, "feasible");

        self.check_policy(request).await?;
        self.await_approval(request, balance).await?;

        self.build_token(request, &mint).await
    }

    fn validate(&self, request: &PaymentRequestEnvelope) -> Result<()> {
        if request.amount.is_zero() {
            return Err(CustodyError::validation("amount", "must be greater than zero").into());
        }
        if request.accepted_mints.is_empty() {
            return Err(
                CustodyError::validation("accepted_mints", "at least one mint is required").into(),
            );
        }
        if request.unit != self.config.unit {
            return Err(CustodyError::validation(
                "unit",
                format!("unknown unit {:?}", request.unit),
            )
            .into());
        }
        Ok(())
    }

    /// Pick the first accepted mint with sufficient balance, in the order
    /// the requester offered them.
    async fn choose_mint(&self, request: &PaymentRequestEnvelope) -> Result<(MintUrl, Amount)> {
        let balances = self.ledger.balance_by_mint().await?;

        for mint in &request.accepted_mints {
            let balance = balances.get(mint).copied().unwrap_or(Amount::ZERO);
            if balance >= request.amount {
                return Ok((mint.clone(), balance));
            }
        }

        // No accepted mint covers the amount. Register the first accepted
        // mint we have never seen, so the user can fund it later.
        for mint in &request.accepted_mints {
            if !balances.contains_key(mint) {
                match self.client.load_mint(mint).await {
                    Ok(snapshot) => {
                        debug!(mint = %snapshot.url, "registered previously unknown mint")
                    }
                    Err(e) => warn!(mint = %mint, error = %e, "could not register mint"),
                }
                break;
            }
        }

        let available = request
            .accepted_mints
            .iter()
            .map(|m| balances.get(m).copied().unwrap_or(Amount::ZERO))
            .max()
            .unwrap_or(Amount::ZERO);
        Err(CustodyError::insufficient_funds(
            request.amount,
            available,
            request.accepted_mints.clone(),
        )
        .into())
    }

    async fn check_policy(&self, request: &PaymentRequestEnvelope) -> Result<()> {
        if let Some(limits) = self.policy.limits(&request.origin).await? {
            let today = chrono::Local::now().date_naive();
            limits
                .check(request.amount, today)
                .map_err(CustodyError::denied)?;
        }
        Ok(())
    }

    async fn await_approval(
        &self,
        request: &PaymentRequestEnvelope,
        balance: Amount,
    ) -> Result<()> {
        if self
            .policy
            .is_auto_approved(&request.origin, request.amount)
            .await?
        {
            debug!(request_id = %request.request_id, "auto-approved");
            return Ok(());
        }

        let context = ApprovalContext {
            request_id: request.request_id.clone(),
            origin: request.origin.clone(),
            accepted_mints: request.accepted_mints.clone(),
            amount: request.amount,
            unit: request.unit.clone(),
            current_balance: balance,
        };

        debug!(request_id = %request.request_id, "awaiting approval");
        let decision = timeout(
            self.config.approval_timeout,
            self.approval.request_approval(context),
        )
        .await
        .map_err(|_| PayError::ApprovalTimeout)??;

        if !decision.approved {
            return Err(CustodyError::denied("payment declined by user").into());
        }
        if decision.remember_origin {
            self.policy
                .allow_origin(&request.origin, request.amount)
                .await?;
        }
        Ok(())
    }

    /// BUILDING: reserve proofs, true up the fee, swap, encode, finalize.
    async fn build_token(&self, request: &PaymentRequestEnvelope, mint: &MintUrl) -> Result<String> {
        let amount = request.amount;
        let selection = self.ledger.select_and_mark_pending(mint, amount).await?;
        let mut chosen: Vec<Proof> = selection.chosen.iter().map(|p| p.proof.clone()).collect();
        let mut total = selection.total;

        let swap = async {
            let snapshot = self.client.load_mint(mint).await?;

            // The reservation covered the face amount; the actual network
            // fee depends on which proofs got selected. One corrective
            // reselection pass, no more.
            let mut needed = amount
                .checked_add(snapshot.input_fee(&chosen))
                .ok_or_else(|| CustodyError::Internal("amount overflow".to_string()))?;
            if total < needed {
                self.ledger.revert_pending(&chosen).await?;
                let second = self.ledger.select_and_mark_pending(mint, needed).await?;
                chosen = second.chosen.iter().map(|p| p.proof.clone()).collect();
                total = second.total;

                needed = amount
                    .checked_add(snapshot.input_fee(&chosen))
                    .ok_or_else(|| CustodyError::Internal("amount overflow".to_string()))?;
                if total < needed {
                    return Err(CustodyError::insufficient_funds(
                        needed,
                        total,
                        vec![mint.clone()],
                    )
                    .into());
                }
            }

            let keep = total.saturating_sub(needed);
            let options = self
                .send_options(&snapshot, amount, keep, request.locking_condition.clone())
                .await?;
            let outcome = self
                .client
                .swap_for_send(mint, amount, chosen.clone(), options)
                .await?;
            Ok::<_, PayError>(outcome)
        }
        .await;

        let outcome = match swap {
            Ok(outcome) => outcome,
            Err(e) => {
                // The swap never consumed the inputs; release them.
                if let Err(revert_err) = self.ledger.revert_pending(&chosen).await {
                    warn!(error = %revert_err, "failed to revert reservation; recovery will settle it");
                }
                self.transactions
                    .append(
                        Transaction::new(TransactionKind::Payment, amount, mint.clone())
                            .with_origin(&request.origin)
                            .with_status(TransactionStatus::Failed),
                    )
                    .await?;
                return Err(e);
            }
        };

        let token = self
            .client
            .encode_token(mint, &outcome.send, &request.unit, Some(&request.origin))?;

        // Past the point of no return: the inputs are spent at the mint.
        // Persist a resume record before finalizing so a crash between here
        // and the reply still leaves the token recoverable.
        self.pending
            .add_token(PendingOutgoingToken {
                token: token.clone(),
                mint_url: mint.clone(),
                amount,
                created_at: chrono::Utc::now().timestamp(),
            })
            .await?;

        let tx_id = self
            .transactions
            .append(
                Transaction::new(TransactionKind::Payment, amount, mint.clone())
                    .with_origin(&request.origin)
                    .with_token(&token),
            )
            .await?;

        self.ledger.finalize_spend(&chosen, outcome.keep, mint).await?;
        self.transactions
            .set_status(&tx_id, TransactionStatus::Completed)
            .await?;
        self.pending.remove_token(&token).await?;
        self.policy
            .record_payment(&request.origin, amount)
            .await?;

        Ok(token)
    }

    /// Build the send options, reserving deterministic-secret indices when
    /// a seed is configured.
    async fn send_options(
        &self,
        snapshot: &MintSnapshot,
        amount: Amount,
        keep: Amount,
        lock: Option<String>,
    ) -> Result<SendOptions> {
        let secret_mode = if self.config.deterministic_secrets {
            let keyset = snapshot
                .active_keysets()
                .next()
                .ok_or_else(|| {
                    CustodyError::mint_unavailable(snapshot.url.clone(), "no active keyset")
                })?;
            // One output per power-of-two denomination of the send and
            // keep amounts.
            let outputs =
                u64::from(amount.denomination_count() + keep.denomination_count()).max(1);
            let counter_start = self.counters.reserve(&keyset.id, outputs).await?;
            SecretMode::Deterministic { counter_start }
        } else {
            SecretMode::Random
        };

        Ok(SendOptions { secret_mode, lock })
    }

    /// Pay a Lightning invoice by melting proofs at a mint.
    ///
    /// When the melt call fails, the quote status decides the outcome; when
    /// the status is unknowable the reserved proofs are deliberately left
    /// for the recovery protocol instead of guessing.
    pub async fn pay_invoice(&self, mint: &MintUrl, invoice: &str) -> Result<MeltSummary> {
        let quote = self.client.create_melt_quote(mint, invoice).await?;
        let total = quote
            .amount
            .checked_add(quote.fee_reserve)
            .ok_or_else(|| CustodyError::Internal("amount overflow".to_string()))?;

        let selection = self.ledger.select_and_mark_pending(mint, total).await?;
        let chosen: Vec<Proof> = selection.chosen.iter().map(|p| p.proof.clone()).collect();

        let tx_id = self
            .transactions
            .append(Transaction::new(
                TransactionKind::Payment,
                quote.amount,
                mint.clone(),
            ))
            .await?;

        match self
            .client
            .melt(mint, &quote.quote_id, chosen.clone())
            .await
        {
            Ok(outcome) if outcome.state == MeltQuoteState::Paid => {
                let change = total_amount(&outcome.change);
                self.ledger
                    .finalize_spend(&chosen, outcome.change, mint)
                    .await?;
                self.transactions
                    .set_status(&tx_id, TransactionStatus::Completed)
                    .await?;
                Ok(MeltSummary {
                    amount: quote.amount,
                    change,
                    preimage: outcome.preimage,
                })
            }
            Ok(outcome) if outcome.state == MeltQuoteState::Unpaid => {
                self.ledger.revert_pending(&chosen).await?;
                self.transactions
                    .set_status(&tx_id, TransactionStatus::Failed)
                    .await?;
                Err(CustodyError::mint_unavailable(mint.clone(), "melt was not paid").into())
            }
            Ok(_) => {
                // Mint-side pending: leave the reservation for recovery.
                Err(CustodyError::ambiguous("melt").into())
            }
            Err(melt_err) => {
                self.settle_failed_melt(mint, &quote.quote_id, &chosen, &tx_id, quote.amount, melt_err)
                    .await
            }
        }
    }

    /// The melt call failed; re-query the quote before deciding.
    async fn settle_failed_melt(
        &self,
        mint: &MintUrl,
        quote_id: &str,
        chosen: &[Proof],
        tx_id: &str,
        amount: Amount,
        melt_err: CustodyError,
    ) -> Result<MeltSummary> {
        match self.client.melt_quote_state(mint, quote_id).await {
            Ok(MeltQuoteState::Paid) => {
                // The payment actually succeeded server-side. Finalize with
                // no change: whatever change the mint issued for the unused
                // fee reserve cannot be reconstructed without a
                // deterministic seed.
                warn!(mint = %mint, "melt errored but was paid; fee-reserve change is lost");
                self.ledger.finalize_spend(chosen, Vec::new(), mint).await?;
                self.transactions
                    .set_status(tx_id, TransactionStatus::Completed)
                    .await?;
                Ok(MeltSummary {
                    amount,
                    change: Amount::ZERO,
                    preimage: None,
                })
            }
            Ok(MeltQuoteState::Unpaid) => {
                self.ledger.revert_pending(chosen).await?;
                self.transactions
                    .set_status(tx_id, TransactionStatus::Failed)
                    .await?;
                Err(melt_err.into())
            }
            Ok(MeltQuoteState::Pending) => Err(CustodyError::ambiguous("melt").into()),
            Err(status_err) => {
                // Neither the melt nor the status query answered. Leave the
                // proofs reserved; the startup recovery protocol will settle
                // them once the mint answers again.
                warn!(mint = %mint, error = %status_err, "melt status unknown; leaving proofs reserved");
                Err(CustodyError::ambiguous("melt").into())
            }
        }
    }

    /// Redeem an incoming token into this wallet.
    pub async fn receive_token(&self, token: &str) -> Result<Amount> {
        let (mint_url, proofs) = self.client.receive(token).await?;

        for proof in &proofs {
            if !self.client.verify_dleq(proof) {
                return Err(
                    CustodyError::validation("token", "DLEQ verification failed").into(),
                );
            }
        }

        let amount = total_amount(&proofs);
        self.ledger.add_proofs(proofs, &mint_url).await?;
        self.transactions
            .append(
                Transaction::new(TransactionKind::Receive, amount, mint_url)
                    .with_status(TransactionStatus::Completed),
            )
            .await?;
        Ok(amount)
    }

    /// Request a Lightning invoice that funds new proofs at a mint. The
    /// quote is persisted so an interrupted receive can resume.
    pub async fn request_mint(&self, mint: &MintUrl, amount: Amount) -> Result<cashkit_lib::MintQuote> {
        let quote = self.client.create_mint_quote(mint, amount).await?;
        self.pending
            .add_quote(PendingMintQuote {
                quote_id: quote.quote_id.clone(),
                mint_url: mint.clone(),
                amount,
                invoice: quote.invoice.clone(),
                created_at: chrono::Utc::now().timestamp(),
            })
            .await?;
        Ok(quote)
    }

    /// Mint the proofs for a paid quote and settle the pending record.
    pub async fn complete_mint_quote(&self, mint: &MintUrl, quote_id: &str) -> Result<Amount> {
        let proofs = self.client.mint_proofs(mint, quote_id).await?;
        let amount = total_amount(&proofs);

        self.ledger.add_proofs(proofs, mint).await?;
        self.pending.remove_quote(quote_id).await?;
        self.transactions
            .append(
                Transaction::new(TransactionKind::Receive, amount, mint.clone())
                    .with_status(TransactionStatus::Completed),
            )
            .await?;
        Ok(amount)
    }

    /// Try to complete every pending mint quote. Run at process start.
    pub async fn resume_pending_quotes(&self) -> Result<Amount> {
        let mut recovered = Amount::ZERO;
        for quote in self.pending.list_quotes().await? {
            match self
                .complete_mint_quote(&quote.mint_url, &quote.quote_id)
                .await
            {
                Ok(amount) => {
                    recovered = Amount::sum([recovered, amount]);
                    info!(quote_id = %quote.quote_id, %amount, "resumed pending mint quote");
                }
                Err(e) => {
                    debug!(quote_id = %quote.quote_id, error = %e, "pending quote not ready");
                }
            }
        }
        Ok(recovered)
    }
}
