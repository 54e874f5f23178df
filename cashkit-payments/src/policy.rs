//! Per-origin spending policy.
//!
//! An origin can carry a per-payment cap and a rolling daily cap. The daily
//! counter resets at the local-date boundary, not on a 24h timer, matching
//! how users think about "per day". A cap breach is a policy decision, not
//! an error: callers surface it as a denial.

use crate::Result;
use cashkit_lib::Amount;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Spending limits for one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginLimits {
    /// Cap on any single payment.
    pub max_per_payment: Option<Amount>,
    /// Cap on the rolling daily total.
    pub max_per_day: Option<Amount>,
    /// Spent so far on `last_reset_date`.
    pub spent_today: Amount,
    /// Local date the daily counter belongs to.
    pub last_reset_date: NaiveDate,
}

impl OriginLimits {
    pub fn new(
        max_per_payment: Option<Amount>,
        max_per_day: Option<Amount>,
        today: NaiveDate,
    ) -> Self {
        Self {
            max_per_payment,
            max_per_day,
            spent_today: Amount::ZERO,
            last_reset_date: today,
        }
    }

    /// The daily total that applies on `today`, rolling the counter over
    /// if the stored date is stale.
    fn spent_on(&self, today: NaiveDate) -> Amount {
        if self.last_reset_date == today {
            self.spent_today
        } else {
            Amount::ZERO
        }
    }

    /// Check a prospective payment against both caps.
    ///
    /// Returns the denial reason on breach.
    pub fn check(&self, amount: Amount, today: NaiveDate) -> std::result::Result<(), String> {
        if let Some(cap) = self.max_per_payment {
            if amount > cap {
                return Err(format!(
                    "amount {} exceeds per-payment limit {}",
                    amount, cap
                ));
            }
        }
        if let Some(cap) = self.max_per_day {
            let spent = self.spent_on(today);
            let would_be = spent.checked_add(amount).unwrap_or(Amount(u64::MAX));
            if would_be > cap {
                return Err(format!(
                    "amount {} would exceed daily limit {} ({} already spent today)",
                    amount, cap, spent
                ));
            }
        }
        Ok(())
    }

    /// Record a completed payment against the daily counter.
    pub fn record(&mut self, amount: Amount, today: NaiveDate) {
        let spent = self.spent_on(today);
        self.spent_today = spent.checked_add(amount).unwrap_or(Amount(u64::MAX));
        self.last_reset_date = today;
    }
}

/// Store for origin policies: allowlisted auto-approval ceilings and
/// spending limits.
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Whether payments from this origin up to `amount` skip interactive
    /// approval.
    async fn is_auto_approved(&self, origin: &str, amount: Amount) -> Result<bool>;

    /// The origin's spending limits, if any are configured.
    async fn limits(&self, origin: &str) -> Result<Option<OriginLimits>>;

    /// Record a completed payment against the origin's daily counter.
    async fn record_payment(&self, origin: &str, amount: Amount) -> Result<()>;

    /// Allowlist an origin for auto-approval up to `ceiling`.
    async fn allow_origin(&self, origin: &str, ceiling: Amount) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct OriginPolicy {
    auto_approve_ceiling: Option<Amount>,
    limits: Option<OriginLimits>,
}

/// In-memory policy store.
pub struct MemoryPolicyStore {
    policies: RwLock<HashMap<String, OriginPolicy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Configure spending limits for an origin.
    pub fn set_limits(&self, origin: &str, limits: OriginLimits) {
        let mut policies = self.policies.write().expect("policy lock poisoned");
        policies.entry(origin.to_string()).or_default().limits = Some(limits);
    }

    fn today() -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

impl Default for MemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn is_auto_approved(&self, origin: &str, amount: Amount) -> Result<bool> {
        let policies = self.policies.read().expect("policy lock poisoned");
        Ok(policies
            .get(origin)
            .and_then(|p| p.auto_approve_ceiling)
            .map(|ceiling| amount <= ceiling)
            .unwrap_or(false))
    }

    async fn limits(&self, origin: &str) -> Result<Option<OriginLimits>> {
        let policies = self.policies.read().expect("policy lock poisoned");
        Ok(policies.get(origin).and_then(|p| p.limits.clone()))
    }

    async fn record_payment(&self, origin: &str, amount: Amount) -> Result<()> {
        let mut policies = self.policies.write().expect("policy lock poisoned");
        if let Some(limits) = policies
            .get_mut(origin)
            .and_then(|p| p.limits.as_mut())
        {
            limits.record(amount, Self::today());
        }
        Ok(())
    }

    async fn allow_origin(&self, origin: &str, ceiling: Amount) -> Result<()> {
        let mut policies = self.policies.write().expect("policy lock poisoned");
        policies
            .entry(origin.to_string())
            .or_default()
            .auto_approve_ceiling = Some(ceiling);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, d).unwrap()
    }

    #[test]
    fn test_per_payment_cap() {
        let limits = OriginLimits::new(Some(Amount::from_sats(100)), None, day(1));

        assert!(limits.check(Amount::from_sats(100), day(1)).is_ok());
        assert!(limits.check(Amount::from_sats(101), day(1)).is_err());
    }

    #[test]
    fn test_daily_cap_accumulates() {
        let mut limits = OriginLimits::new(None, Some(Amount::from_sats(500)), day(1));

        limits.record(Amount::from_sats(300), day(1));
        assert!(limits.check(Amount::from_sats(200), day(1)).is_ok());
        assert!(limits.check(Amount::from_sats(201), day(1)).is_err());
    }

    #[test]
    fn test_daily_cap_resets_at_date_boundary() {
        let mut limits = OriginLimits::new(None, Some(Amount::from_sats(500)), day(1));
        limits.record(Amount::from_sats(500), day(1));
        assert!(limits.check(Amount::from_sats(1), day(1)).is_err());

        // Next local date: the counter rolls over.
        assert!(limits.check(Amount::from_sats(500), day(2)).is_ok());
        limits.record(Amount::from_sats(100), day(2));
        assert_eq!(limits.spent_today, Amount::from_sats(100));
        assert_eq!(limits.last_reset_date, day(2));
    }

    #[tokio::test]
    async fn test_auto_approval_ceiling() {
        let store = MemoryPolicyStore::new();
        store
            .allow_origin("https://shop.example", Amount::from_sats(100))
            .await
            .unwrap();

        assert!(store
            .is_auto_approved("https://shop.example", Amount::from_sats(50))
            .await
            .unwrap());
        assert!(!store
            .is_auto_approved("https://shop.example", Amount::from_sats(150))
            .await
            .unwrap());
        assert!(!store
            .is_auto_approved("https://other.example", Amount::from_sats(10))
            .await
            .unwrap());
    }
}
