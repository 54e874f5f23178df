//! End-to-end payment demand handling against the mock mint.

use cashkit_lib::test_utils::MockMint;
use cashkit_lib::{
    Amount, CounterAllocator, KeyCustodian, MemorySessionCache, MemoryWalletStore, MintClient,
    MintUrl, PendingStore, ProofLedger, SecretMode, TransactionLog, TransactionStatus,
};
use cashkit_payments::{
    ApprovalContext, ApprovalDecision, ApprovalPrompt, MemoryPolicyStore, OriginLimits,
    PaymentManager, PaymentManagerConfig, PaymentReply, PaymentRequestEnvelope, PolicyStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn mint_url() -> MintUrl {
    MintUrl::new("https://mint.a")
}

/// Scripted approval surface.
struct TestPrompt {
    decision: Option<ApprovalDecision>,
    calls: AtomicUsize,
}

impl TestPrompt {
    fn approving() -> Self {
        Self {
            decision: Some(ApprovalDecision {
                approved: true,
                remember_origin: false,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn denying() -> Self {
        Self {
            decision: Some(ApprovalDecision {
                approved: false,
                remember_origin: false,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn remembering() -> Self {
        Self {
            decision: Some(ApprovalDecision {
                approved: true,
                remember_origin: true,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Never answers; the orchestrator's timeout must fire.
    fn unresponsive() -> Self {
        Self {
            decision: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ApprovalPrompt for TestPrompt {
    async fn request_approval(
        &self,
        _context: ApprovalContext,
    ) -> cashkit_payments::Result<ApprovalDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.decision {
            Some(decision) => Ok(decision),
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("the orchestrator must time out first")
            }
        }
    }
}

struct Harness {
    manager: PaymentManager,
    ledger: Arc<ProofLedger>,
    mint: Arc<MockMint>,
    policy: Arc<MemoryPolicyStore>,
    prompt: Arc<TestPrompt>,
    counters: Arc<CounterAllocator>,
    transactions: Arc<TransactionLog>,
}

fn harness_with(prompt: TestPrompt, config: PaymentManagerConfig) -> Harness {
    let store = Arc::new(MemoryWalletStore::new());
    let cache = Arc::new(MemorySessionCache::new());
    let custodian = Arc::new(KeyCustodian::new(store.clone(), cache));
    let ledger = Arc::new(ProofLedger::new(custodian.clone()));
    let counters = Arc::new(CounterAllocator::new(store));
    let mint = Arc::new(MockMint::new(mint_url()));
    let policy = Arc::new(MemoryPolicyStore::new());
    let prompt = Arc::new(prompt);
    let transactions = Arc::new(TransactionLog::new(custodian.clone()));
    let pending = Arc::new(PendingStore::new(custodian));

    let manager = PaymentManager::new(
        ledger.clone(),
        mint.clone(),
        counters.clone(),
        policy.clone(),
        prompt.clone(),
        transactions.clone(),
        pending,
        config,
    );

    Harness {
        manager,
        ledger,
        mint,
        policy,
        prompt,
        counters,
        transactions,
    }
}

fn harness(prompt: TestPrompt) -> Harness {
    harness_with(prompt, PaymentManagerConfig::default())
}

async fn fund(harness: &Harness, sats: u64) {
    let proofs = harness.mint.make_proofs_for(Amount::from_sats(sats));
    harness
        .ledger
        .add_proofs(proofs, &mint_url())
        .await
        .unwrap();
}

fn demand(amount: u64) -> PaymentRequestEnvelope {
    PaymentRequestEnvelope {
        request_id: "req-1".to_string(),
        origin: "https://shop.example".to_string(),
        accepted_mints: vec![mint_url()],
        amount: Amount::from_sats(amount),
        unit: "sat".to_string(),
        locking_condition: None,
    }
}

#[tokio::test]
async fn approved_demand_produces_token_and_settles_balance() {
    let h = harness(TestPrompt::approving());
    fund(&h, 100).await;

    let reply = h.manager.handle_request(demand(60)).await;
    let token = match reply {
        PaymentReply::Token { token } => token,
        other => panic!("expected token, got {:?}", other),
    };
    assert!(token.starts_with("cashuB"));

    // 100 funded, 60 paid, zero fee: balance settles at 40 and nothing
    // stays reserved.
    assert_eq!(
        h.ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(40)
    );
    assert!(h.ledger.list_pending_spend().await.unwrap().is_empty());
    assert_eq!(h.prompt.call_count(), 1);

    let log = h.transactions.list().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, TransactionStatus::Completed);
    assert_eq!(log[0].token.as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn token_covers_exactly_the_demanded_amount() {
    let h = harness(TestPrompt::approving());
    fund(&h, 100).await;

    let reply = h.manager.handle_request(demand(60)).await;
    let token = match reply {
        PaymentReply::Token { token } => token,
        other => panic!("expected token, got {:?}", other),
    };

    // Redeeming the token on the mint side yields exactly 60.
    let (_, proofs) = h.mint.receive(&token).await.unwrap();
    assert_eq!(
        cashkit_lib::proofs::total_amount(&proofs),
        Amount::from_sats(60)
    );
}

#[tokio::test]
async fn user_denial_is_denied_not_failed() {
    let h = harness(TestPrompt::denying());
    fund(&h, 100).await;

    let reply = h.manager.handle_request(demand(60)).await;
    assert!(matches!(reply, PaymentReply::Denied { .. }));

    // Nothing moved.
    assert_eq!(
        h.ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(100)
    );
    assert!(h.ledger.list_pending_spend().await.unwrap().is_empty());
}

#[tokio::test]
async fn approval_timeout_denies() {
    let h = harness_with(
        TestPrompt::unresponsive(),
        PaymentManagerConfig {
            approval_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );
    fund(&h, 100).await;

    let reply = h.manager.handle_request(demand(60)).await;
    match reply {
        PaymentReply::Denied { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected denial, got {:?}", other),
    }
    assert_eq!(
        h.ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(100)
    );
}

#[tokio::test]
async fn closed_approval_surface_denies() {
    struct ClosingPrompt;

    #[async_trait::async_trait]
    impl ApprovalPrompt for ClosingPrompt {
        async fn request_approval(
            &self,
            _context: ApprovalContext,
        ) -> cashkit_payments::Result<ApprovalDecision> {
            Err(cashkit_payments::PayError::ApprovalClosed(
                "window closed".to_string(),
            ))
        }
    }

    let store = Arc::new(MemoryWalletStore::new());
    let cache = Arc::new(MemorySessionCache::new());
    let custodian = Arc::new(KeyCustodian::new(store.clone(), cache));
    let ledger = Arc::new(ProofLedger::new(custodian.clone()));
    let mint = Arc::new(MockMint::new(mint_url()));
    let manager = PaymentManager::new(
        ledger.clone(),
        mint.clone(),
        Arc::new(CounterAllocator::new(store)),
        Arc::new(MemoryPolicyStore::new()),
        Arc::new(ClosingPrompt),
        Arc::new(TransactionLog::new(custodian.clone())),
        Arc::new(PendingStore::new(custodian)),
        PaymentManagerConfig::default(),
    );
    ledger
        .add_proofs(mint.make_proofs_for(Amount::from_sats(100)), &mint_url())
        .await
        .unwrap();

    let reply = manager.handle_request(demand(60)).await;
    match reply {
        PaymentReply::Denied { reason } => assert!(reason.contains("window closed")),
        other => panic!("expected denial, got {:?}", other),
    }
    assert_eq!(
        ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(100)
    );
}

#[tokio::test]
async fn per_payment_cap_denies_before_approval() {
    let h = harness(TestPrompt::approving());
    fund(&h, 100).await;
    h.policy.set_limits(
        "https://shop.example",
        OriginLimits::new(
            Some(Amount::from_sats(50)),
            None,
            chrono::Local::now().date_naive(),
        ),
    );

    let reply = h.manager.handle_request(demand(60)).await;
    match reply {
        PaymentReply::Denied { reason } => assert!(reason.contains("per-payment limit")),
        other => panic!("expected denial, got {:?}", other),
    }
    // Policy rejected it before the user ever saw a prompt.
    assert_eq!(h.prompt.call_count(), 0);
}

#[tokio::test]
async fn daily_cap_tracks_completed_payments() {
    let h = harness(TestPrompt::approving());
    fund(&h, 200).await;
    h.policy.set_limits(
        "https://shop.example",
        OriginLimits::new(
            None,
            Some(Amount::from_sats(100)),
            chrono::Local::now().date_naive(),
        ),
    );

    // First payment of 60 fits the daily cap.
    let reply = h.manager.handle_request(demand(60)).await;
    assert!(matches!(reply, PaymentReply::Token { .. }));

    // A second 60 would push the day to 120 > 100.
    let reply = h.manager.handle_request(demand(60)).await;
    match reply {
        PaymentReply::Denied { reason } => assert!(reason.contains("daily limit")),
        other => panic!("expected denial, got {:?}", other),
    }
}

#[tokio::test]
async fn insufficient_funds_fails_with_context() {
    let h = harness(TestPrompt::approving());
    fund(&h, 30).await;

    let reply = h.manager.handle_request(demand(60)).await;
    match reply {
        PaymentReply::Failed { error } => {
            assert!(error.contains("insufficient funds"));
            assert!(error.contains("need 60"));
            assert!(error.contains("have 30"));
            assert!(error.contains("https://mint.a"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.prompt.call_count(), 0);
}

#[tokio::test]
async fn invalid_demand_fails_validation() {
    let h = harness(TestPrompt::approving());
    fund(&h, 100).await;

    let mut zero = demand(0);
    zero.amount = Amount::ZERO;
    assert!(matches!(
        h.manager.handle_request(zero).await,
        PaymentReply::Failed { .. }
    ));

    let mut no_mints = demand(60);
    no_mints.accepted_mints.clear();
    assert!(matches!(
        h.manager.handle_request(no_mints).await,
        PaymentReply::Failed { .. }
    ));

    let mut bad_unit = demand(60);
    bad_unit.unit = "usd".to_string();
    assert!(matches!(
        h.manager.handle_request(bad_unit).await,
        PaymentReply::Failed { .. }
    ));
}

#[tokio::test]
async fn swap_failure_reverts_reservation() {
    let h = harness(TestPrompt::approving());

    // Fund with a single proof, then burn it at the mint behind the
    // ledger's back so the swap is guaranteed to fail.
    let proof = h.mint.make_proof(64);
    h.ledger
        .add_proofs(vec![proof.clone()], &mint_url())
        .await
        .unwrap();
    h.mint.mark_spent(&proof);

    let reply = h.manager.handle_request(demand(60)).await;
    assert!(matches!(reply, PaymentReply::Failed { .. }));

    // The reservation was released; recovery can reconcile the proof away
    // later, but nothing is stuck in PendingSpend.
    assert!(h.ledger.list_pending_spend().await.unwrap().is_empty());

    let log = h.transactions.list().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn auto_approved_origin_skips_prompt() {
    let h = harness(TestPrompt::approving());
    fund(&h, 100).await;
    h.policy
        .allow_origin("https://shop.example", Amount::from_sats(100))
        .await
        .unwrap();

    let reply = h.manager.handle_request(demand(60)).await;
    assert!(matches!(reply, PaymentReply::Token { .. }));
    assert_eq!(h.prompt.call_count(), 0);
}

#[tokio::test]
async fn remember_origin_auto_approves_next_payment() {
    let h = harness(TestPrompt::remembering());
    fund(&h, 200).await;

    let reply = h.manager.handle_request(demand(60)).await;
    assert!(matches!(reply, PaymentReply::Token { .. }));
    assert_eq!(h.prompt.call_count(), 1);

    // Second demand at or below the remembered ceiling: no prompt.
    let mut second = demand(50);
    second.request_id = "req-2".to_string();
    let reply = h.manager.handle_request(second).await;
    assert!(matches!(reply, PaymentReply::Token { .. }));
    assert_eq!(h.prompt.call_count(), 1);
}

#[tokio::test]
async fn fee_triggers_single_reselection() {
    // 200 ppk: one input costs a 1-sat fee.
    let store = Arc::new(MemoryWalletStore::new());
    let cache = Arc::new(MemorySessionCache::new());
    let custodian = Arc::new(KeyCustodian::new(store.clone(), cache));
    let ledger = Arc::new(ProofLedger::new(custodian.clone()));
    let counters = Arc::new(CounterAllocator::new(store));
    let mint = Arc::new(MockMint::new(mint_url()).with_fee_ppk(200));
    let policy = Arc::new(MemoryPolicyStore::new());
    let prompt = Arc::new(TestPrompt::approving());
    let transactions = Arc::new(TransactionLog::new(custodian.clone()));
    let pending = Arc::new(PendingStore::new(custodian));
    let manager = PaymentManager::new(
        ledger.clone(),
        mint.clone(),
        counters,
        policy,
        prompt,
        transactions,
        pending,
        PaymentManagerConfig::default(),
    );

    // Exactly 64 available; a demand of 64 selects it, then the fee makes
    // the reservation short and the corrected total cannot be covered.
    let proof = mint.make_proof(64);
    ledger.add_proofs(vec![proof], &mint_url()).await.unwrap();

    let reply = manager
        .handle_request(PaymentRequestEnvelope {
            request_id: "req-1".to_string(),
            origin: "https://shop.example".to_string(),
            accepted_mints: vec![mint_url()],
            amount: Amount::from_sats(64),
            unit: "sat".to_string(),
            locking_condition: None,
        })
        .await;
    assert!(matches!(reply, PaymentReply::Failed { .. }));
    assert!(ledger.list_pending_spend().await.unwrap().is_empty());

    // With 64 + 32 available the reselection covers amount plus fee.
    let extra = mint.make_proof(32);
    ledger.add_proofs(vec![extra], &mint_url()).await.unwrap();

    let reply = manager
        .handle_request(PaymentRequestEnvelope {
            request_id: "req-2".to_string(),
            origin: "https://shop.example".to_string(),
            accepted_mints: vec![mint_url()],
            amount: Amount::from_sats(64),
            unit: "sat".to_string(),
            locking_condition: None,
        })
        .await;
    assert!(matches!(reply, PaymentReply::Token { .. }));

    // 96 funded, 64 paid, 1 sat fee for two inputs.
    assert_eq!(
        ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(31)
    );
}

#[tokio::test]
async fn deterministic_secrets_reserve_counters() {
    let h = harness_with(
        TestPrompt::approving(),
        PaymentManagerConfig {
            deterministic_secrets: true,
            ..Default::default()
        },
    );
    fund(&h, 100).await;

    let reply = h.manager.handle_request(demand(60)).await;
    assert!(matches!(reply, PaymentReply::Token { .. }));

    let options = h.mint.last_send_options().unwrap();
    assert!(matches!(
        options.secret_mode,
        SecretMode::Deterministic { counter_start: 0 }
    ));

    // The reservation advanced the keyset counter.
    let counters = h.counters.snapshot().await.unwrap();
    assert!(counters.get(&h.mint.keyset_id()).copied().unwrap_or(0) > 0);
}

#[tokio::test]
async fn locking_condition_reaches_the_mint() {
    let h = harness(TestPrompt::approving());
    fund(&h, 100).await;

    let mut request = demand(60);
    request.locking_condition = Some("p2pk:02deadbeef".to_string());
    let reply = h.manager.handle_request(request).await;
    assert!(matches!(reply, PaymentReply::Token { .. }));

    let options = h.mint.last_send_options().unwrap();
    assert_eq!(options.lock.as_deref(), Some("p2pk:02deadbeef"));
}

#[tokio::test]
async fn receive_token_adds_funds_and_logs() {
    let h = harness(TestPrompt::approving());

    let proofs = vec![h.mint.make_proof(32), h.mint.make_proof(8)];
    let token = h
        .mint
        .encode_token(&mint_url(), &proofs, "sat", None)
        .unwrap();

    let amount = h.manager.receive_token(&token).await.unwrap();
    assert_eq!(amount, Amount::from_sats(40));
    assert_eq!(
        h.ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(40)
    );

    let log = h.transactions.list().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, TransactionStatus::Completed);
}

#[tokio::test]
async fn mint_quote_resumes_after_payment() {
    let h = harness(TestPrompt::approving());

    let quote = h
        .manager
        .request_mint(&mint_url(), Amount::from_sats(100))
        .await
        .unwrap();

    // Not paid yet: resume finds nothing mintable.
    assert_eq!(
        h.manager.resume_pending_quotes().await.unwrap(),
        Amount::ZERO
    );

    h.mint.pay_mint_quote(&quote.quote_id);
    assert_eq!(
        h.manager.resume_pending_quotes().await.unwrap(),
        Amount::from_sats(100)
    );
    assert_eq!(
        h.ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(100)
    );

    // The settled quote is gone; resuming again is a no-op.
    assert_eq!(
        h.manager.resume_pending_quotes().await.unwrap(),
        Amount::ZERO
    );
}
