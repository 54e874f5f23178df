//! Crash-recovery and reconciliation behavior of the proof ledger.
//!
//! These tests drive the ledger together with the mock mint to cover the
//! interrupted-operation cases: a spend that succeeded at the mint but
//! never finalized locally, a spend that never reached the mint, and
//! proofs spent by another wallet sharing the same seed.

use cashkit_lib::test_utils::MockMint;
use cashkit_lib::{
    Amount, KeyCustodian, LedgerMonitor, MemorySessionCache, MemoryWalletStore, MintUrl,
    PendingResolution, ProofLedger,
};
use std::sync::Arc;

fn mint_url() -> MintUrl {
    MintUrl::new("https://mint.a")
}

fn setup() -> (Arc<ProofLedger>, Arc<MockMint>) {
    let store = Arc::new(MemoryWalletStore::new());
    let cache = Arc::new(MemorySessionCache::new());
    let custodian = Arc::new(KeyCustodian::new(store, cache));
    let ledger = Arc::new(ProofLedger::new(custodian));
    let mint = Arc::new(MockMint::new(mint_url()));
    (ledger, mint)
}

#[tokio::test]
async fn interrupted_finalize_removes_spent_proofs() {
    let (ledger, mint) = setup();

    let proof = mint.make_proof(64);
    ledger.add_proofs(vec![proof.clone()], &mint_url()).await.unwrap();
    ledger.mark_pending_spend(&[proof.clone()]).await.unwrap();

    // The swap went through at the mint, but the local finalize never ran.
    mint.mark_spent(&proof);

    let resolution = ledger.resolve_pending(mint.as_ref()).await.unwrap();
    assert_eq!(
        resolution,
        PendingResolution {
            removed: 1,
            reverted: 0
        }
    );
    assert_eq!(
        ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::ZERO
    );
    assert!(ledger.list_pending_spend().await.unwrap().is_empty());
}

#[tokio::test]
async fn aborted_spend_reverts_to_live() {
    let (ledger, mint) = setup();

    let proof = mint.make_proof(64);
    ledger.add_proofs(vec![proof.clone()], &mint_url()).await.unwrap();
    ledger.mark_pending_spend(&[proof.clone()]).await.unwrap();

    // The operation never completed at the mint: proof is still unspent.
    let resolution = ledger.resolve_pending(mint.as_ref()).await.unwrap();
    assert_eq!(
        resolution,
        PendingResolution {
            removed: 0,
            reverted: 1
        }
    );
    assert_eq!(
        ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(64)
    );
}

#[tokio::test]
async fn recovery_is_idempotent() {
    let (ledger, mint) = setup();

    let spent = mint.make_proof(64);
    let aborted = mint.make_proof(32);
    ledger
        .add_proofs(vec![spent.clone(), aborted.clone()], &mint_url())
        .await
        .unwrap();
    ledger
        .mark_pending_spend(&[spent.clone(), aborted.clone()])
        .await
        .unwrap();
    mint.mark_spent(&spent);

    ledger.resolve_pending(mint.as_ref()).await.unwrap();
    let balance_after_first = ledger.balance_for_mint(&mint_url()).await.unwrap();

    // Running the protocol again must not change anything.
    let second = ledger.resolve_pending(mint.as_ref()).await.unwrap();
    assert_eq!(second, PendingResolution::default());
    assert_eq!(
        ledger.balance_for_mint(&mint_url()).await.unwrap(),
        balance_after_first
    );
    assert_eq!(balance_after_first, Amount::from_sats(32));
}

#[tokio::test]
async fn mint_side_pending_proofs_are_left_reserved() {
    let (ledger, mint) = setup();

    let proof = mint.make_proof(64);
    ledger.add_proofs(vec![proof.clone()], &mint_url()).await.unwrap();
    ledger.mark_pending_spend(&[proof.clone()]).await.unwrap();

    // An in-flight melt shows as pending at the mint; don't guess.
    mint.mark_mint_pending(&proof);

    let resolution = ledger.resolve_pending(mint.as_ref()).await.unwrap();
    assert_eq!(resolution, PendingResolution::default());
    assert_eq!(ledger.list_pending_spend().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reconciliation_removes_externally_spent_proofs() {
    let (ledger, mint) = setup();

    let local = mint.make_proof(32);
    let elsewhere = mint.make_proof(64);
    ledger
        .add_proofs(vec![local.clone(), elsewhere.clone()], &mint_url())
        .await
        .unwrap();

    // Another device restored the same seed and spent this proof.
    mint.mark_spent(&elsewhere);

    let removed = ledger.reconcile_live(mint.as_ref()).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(
        ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(32)
    );
}

#[tokio::test]
async fn monitor_run_once_covers_both_passes() {
    let (ledger, mint) = setup();

    let stuck = mint.make_proof(16);
    let stale = mint.make_proof(8);
    ledger
        .add_proofs(vec![stuck.clone(), stale.clone()], &mint_url())
        .await
        .unwrap();
    ledger.mark_pending_spend(&[stuck.clone()]).await.unwrap();
    mint.mark_spent(&stale);

    let monitor = LedgerMonitor::with_default_interval(ledger.clone(), mint.clone());
    let resolution = monitor.run_once().await.unwrap();

    // The stuck reservation reverted, the stale proof reconciled away.
    assert_eq!(resolution.reverted, 1);
    assert_eq!(
        ledger.balance_for_mint(&mint_url()).await.unwrap(),
        Amount::from_sats(16)
    );
}

#[tokio::test]
async fn conservation_over_mixed_operations() {
    let (ledger, mint) = setup();

    let a = mint.make_proof(64);
    let b = mint.make_proof(32);
    let c = mint.make_proof(16);
    ledger
        .add_proofs(vec![a.clone(), b.clone(), c.clone()], &mint_url())
        .await
        .unwrap();

    // Reserve and revert: value must be conserved.
    ledger.mark_pending_spend(&[a.clone()]).await.unwrap();
    ledger.revert_pending(&[a.clone()]).await.unwrap();

    // Spend a with 4 in change.
    ledger.mark_pending_spend(&[a.clone()]).await.unwrap();
    let change = mint.make_proof(4);
    ledger
        .finalize_spend(&[a.clone()], vec![change], &mint_url())
        .await
        .unwrap();

    // Added 112, finalized away 64, got 4 change.
    let live = ledger.balance_for_mint(&mint_url()).await.unwrap();
    let pending = cashkit_lib::proofs::total_stored_amount(
        &ledger.list_pending_spend().await.unwrap(),
    );
    assert_eq!(Amount::sum([live, pending]), Amount::from_sats(52));
}
