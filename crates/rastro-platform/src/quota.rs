//! Plans, capabilities and the monthly tracking quota.
//!
//! Usage is always derived (count of trackings created this calendar month), never stored,
//! so there is no counter to drift. The check and the insert that consumes it share one
//! IMMEDIATE transaction.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, TimeZone};
use rastro_core::config::{PlanConfig, RastroConfig};
use rastro_core::error::{RastroError, Result};
use rastro_core::types::{CapabilitySet, Instant};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{PlatformDb, get_user_in};
use crate::trackings::count_created_in;

/// Plan catalog from config.
#[derive(Debug, Clone)]
pub struct Plans {
    plans: BTreeMap<String, PlanConfig>,
    default_plan: String,
}

impl Plans {
    pub fn new(plans: BTreeMap<String, PlanConfig>, default_plan: impl Into<String>) -> Self {
        Self {
            plans,
            default_plan: default_plan.into(),
        }
    }

    pub fn from_config(config: &RastroConfig) -> Self {
        Self::new(config.plans.clone(), config.default_plan.clone())
    }

    pub fn default_plan(&self) -> &str {
        &self.default_plan
    }

    /// Plan by name. Unknown names fall back to the default plan, then to no allowance.
    pub fn resolve(&self, name: &str) -> PlanConfig {
        if let Some(plan) = self.plans.get(name) {
            return plan.clone();
        }
        tracing::warn!("⚠️ Unknown plan '{}', using '{}'", name, self.default_plan);
        self.plans
            .get(&self.default_plan)
            .cloned()
            .unwrap_or(PlanConfig {
                monthly_limit: Some(0),
                features: Vec::new(),
            })
    }

    pub fn capabilities(&self, name: &str) -> CapabilitySet {
        CapabilitySet::new(self.resolve(name).features)
    }
}

/// Proof that one tracking creation fits the owner's allowance. Only the ledger mints
/// these, and inserting a tracking consumes one.
#[derive(Debug)]
pub struct ReservationToken {
    owner_id: String,
    usage_after: u32,
}

impl ReservationToken {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Monthly usage once the reserved tracking is inserted.
    pub fn usage_after(&self) -> u32 {
        self.usage_after
    }
}

/// Snapshot of an owner's allowance for the current month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    pub monthly_usage: u32,
    /// `None` for unlimited plans.
    pub plan_limit: Option<u32>,
    pub referral_credits: u32,
}

impl QuotaState {
    /// Plan limit plus referral credits; `None` means unlimited.
    pub fn total_allowed(&self) -> Option<u32> {
        self.plan_limit
            .map(|limit| limit.saturating_add(self.referral_credits))
    }

    pub fn remaining(&self) -> Option<u32> {
        self.total_allowed()
            .map(|total| total.saturating_sub(self.monthly_usage))
    }
}

/// `[first instant of the month, first instant of the next month)` in local time.
pub fn month_bounds(now: Instant) -> (Instant, Instant) {
    let offset = *now.offset();
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .unwrap_or_else(|| now.date_naive());
    let next = (first + Duration::days(32))
        .with_day(1)
        .unwrap_or(first + Duration::days(31));
    let midnight = |date: NaiveDate| {
        date.and_hms_opt(0, 0, 0)
            .and_then(|local| offset.from_local_datetime(&local).single())
    };
    // A fixed offset maps every local time exactly once.
    match (midnight(first), midnight(next)) {
        (Some(start), Some(end)) => (start, end),
        _ => (now, now),
    }
}

/// Monthly allowance enforcement.
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    plans: Plans,
}

impl QuotaLedger {
    pub fn new(plans: Plans) -> Self {
        Self { plans }
    }

    pub fn plans(&self) -> &Plans {
        &self.plans
    }

    /// Current allowance, read-only.
    pub fn state(&self, db: &PlatformDb, owner_id: &str, now: Instant) -> Result<QuotaState> {
        self.state_in(&*db.conn()?, owner_id, now)
    }

    fn state_in(&self, conn: &Connection, owner_id: &str, now: Instant) -> Result<QuotaState> {
        let user = get_user_in(conn, owner_id)?;
        let plan = self.plans.resolve(&user.plan);
        let (start, end) = month_bounds(now);
        Ok(QuotaState {
            monthly_usage: count_created_in(conn, owner_id, start, end)?,
            plan_limit: plan.monthly_limit,
            referral_credits: user.referral_credits,
        })
    }

    /// Reserve one creation. Must run inside the IMMEDIATE transaction that will insert the
    /// tracking, so concurrent creations for one owner serialize on the write lock.
    pub fn reserve(&self, tx: &Connection, owner_id: &str, now: Instant) -> Result<ReservationToken> {
        let state = self.state_in(tx, owner_id, now)?;
        if let Some(limit) = state.total_allowed() {
            if state.monthly_usage >= limit {
                tracing::info!(
                    "🚫 Quota exceeded for {}: {} of {}",
                    owner_id,
                    state.monthly_usage,
                    limit
                );
                return Err(RastroError::QuotaExceeded {
                    usage: state.monthly_usage,
                    limit,
                });
            }
        }
        Ok(ReservationToken {
            owner_id: owner_id.to_string(),
            usage_after: state.monthly_usage + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{at, temp_db};
    use rastro_core::types::Feature;

    fn plans() -> Plans {
        let mut map = BTreeMap::new();
        map.insert(
            "starter".to_string(),
            PlanConfig {
                monthly_limit: Some(60),
                features: vec![Feature::EmailAutomation],
            },
        );
        map.insert(
            "unlimited".to_string(),
            PlanConfig {
                monthly_limit: None,
                features: vec![Feature::EmailAutomation, Feature::WhatsAppAutomation],
            },
        );
        Plans::new(map, "starter")
    }

    #[test]
    fn test_month_bounds() {
        let (start, end) = month_bounds(at(10, 19, 10));
        assert_eq!(start, at(10, 1, 0));
        assert_eq!(end, at(11, 1, 0));

        let (start, end) = month_bounds(at(12, 31, 23));
        assert_eq!(start, at(12, 1, 0));
        assert_eq!(end.format("%Y-%m-%d %H:%M").to_string(), "2027-01-01 00:00");
    }

    #[test]
    fn test_unknown_plan_falls_back_to_default() {
        let plans = plans();
        assert_eq!(plans.resolve("gold").monthly_limit, Some(60));
        assert!(plans.capabilities("gold").allows(Feature::EmailAutomation));
        assert!(!plans.capabilities("starter").allows(Feature::WhatsAppAutomation));
        assert!(plans.capabilities("unlimited").allows(Feature::WhatsAppAutomation));
    }

    #[test]
    fn test_total_allowed() {
        let state = QuotaState {
            monthly_usage: 61,
            plan_limit: Some(60),
            referral_credits: 15,
        };
        assert_eq!(state.total_allowed(), Some(75));
        assert_eq!(state.remaining(), Some(14));

        let unlimited = QuotaState {
            plan_limit: None,
            ..state
        };
        assert_eq!(unlimited.total_allowed(), None);
    }

    #[test]
    fn test_reserve_without_trackings() {
        let db = temp_db();
        let ledger = QuotaLedger::new(plans());
        let owner = db.create_user("a@loja.com", "starter", at(10, 19, 10)).unwrap();
        let token = db
            .immediate(|tx| ledger.reserve(tx, &owner, at(10, 19, 10)))
            .unwrap();
        assert_eq!(token.owner_id(), owner);
        assert_eq!(token.usage_after(), 1);

        assert!(matches!(
            db.immediate(|tx| ledger.reserve(tx, "ghost", at(10, 19, 10))),
            Err(RastroError::NotFound(_))
        ));
    }
}
