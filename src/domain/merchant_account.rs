//! Connected merchant account as mirrored from the processor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::payout::PayoutHealth;
use super::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingState {
    NotStarted,
    Incomplete,
    PendingVerification,
    Restricted,
    Disabled,
    Active,
}

impl OnboardingState {
    pub const ALL: [OnboardingState; 6] = [
        OnboardingState::NotStarted,
        OnboardingState::Incomplete,
        OnboardingState::PendingVerification,
        OnboardingState::Restricted,
        OnboardingState::Disabled,
        OnboardingState::Active,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingState::NotStarted => "not_started",
            OnboardingState::Incomplete => "incomplete",
            OnboardingState::PendingVerification => "pending_verification",
            OnboardingState::Restricted => "restricted",
            OnboardingState::Disabled => "disabled",
            OnboardingState::Active => "active",
        }
    }
}

impl fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnboardingState {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OnboardingState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownStatus::new("onboarding state", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub currently_due: Vec<String>,
    #[serde(default)]
    pub eventually_due: Vec<String>,
    #[serde(default)]
    pub past_due: Vec<String>,
    #[serde(default)]
    pub disabled_reason: Option<String>,
}

impl Requirements {
    fn is_disabled(&self) -> bool {
        self.disabled_reason
            .as_deref()
            .map(|reason| !reason.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Normalizes the processor's capability flags and requirement lists.
///
/// Priority order matters: an account that is both disabled and has past-due
/// items is `Disabled`.
pub fn derive_onboarding_state(
    details_submitted: bool,
    charges_enabled: bool,
    payouts_enabled: bool,
    requirements: &Requirements,
) -> OnboardingState {
    if !details_submitted {
        return OnboardingState::NotStarted;
    }
    if requirements.is_disabled() {
        return OnboardingState::Disabled;
    }
    if !requirements.past_due.is_empty() {
        return OnboardingState::Restricted;
    }
    if charges_enabled && payouts_enabled {
        return if requirements.currently_due.is_empty() {
            OnboardingState::Active
        } else {
            OnboardingState::PendingVerification
        };
    }
    if !requirements.currently_due.is_empty() {
        return OnboardingState::Incomplete;
    }
    OnboardingState::PendingVerification
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub id: String,
    pub last4: Option<String>,
    /// `bank_account` or `card`.
    pub account_type: Option<String>,
    pub status: Option<String>,
}

/// Everything the processor tells us about a connected account at one
/// point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub processor_account_id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements: Requirements,
    pub external_account: Option<ExternalAccount>,
}

impl AccountSnapshot {
    pub fn onboarding_state(&self) -> OnboardingState {
        derive_onboarding_state(
            self.details_submitted,
            self.charges_enabled,
            self.payouts_enabled,
            &self.requirements,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantAccount {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub processor_account_id: String,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements: Requirements,
    pub onboarding_state: OnboardingState,
    pub external_account: Option<ExternalAccount>,
    pub payout_health: PayoutHealth,
    pub pending_stale_sync: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MerchantAccount {
    /// Builds the stored row for a snapshot. `onboarding_state` always comes
    /// from the derivation.
    pub fn from_snapshot(
        organization_id: Uuid,
        snapshot: AccountSnapshot,
        payout_health: PayoutHealth,
        synced_at: DateTime<Utc>,
    ) -> Self {
        let onboarding_state = snapshot.onboarding_state();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            processor_account_id: snapshot.processor_account_id,
            charges_enabled: snapshot.charges_enabled,
            payouts_enabled: snapshot.payouts_enabled,
            details_submitted: snapshot.details_submitted,
            requirements: snapshot.requirements,
            onboarding_state,
            external_account: snapshot.external_account,
            payout_health,
            pending_stale_sync: false,
            last_synced_at: Some(synced_at),
            created_at: synced_at,
            updated_at: synced_at,
        }
    }

    pub fn external_account_id(&self) -> Option<&str> {
        self.external_account.as_ref().map(|ext| ext.id.as_str())
    }

    /// True when cached data must not be served: the pending-sync marker is
    /// set, the account never synced, or the last sync is older than `ttl`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.pending_stale_sync {
            return true;
        }
        match self.last_synced_at {
            Some(synced) => now - synced > ttl,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reqs(currently_due: &[&str], past_due: &[&str], disabled: Option<&str>) -> Requirements {
        Requirements {
            currently_due: currently_due.iter().map(|s| s.to_string()).collect(),
            eventually_due: Vec::new(),
            past_due: past_due.iter().map(|s| s.to_string()).collect(),
            disabled_reason: disabled.map(str::to_string),
        }
    }

    #[test]
    fn test_details_not_submitted_is_not_started_regardless_of_flags() {
        let loaded = reqs(&["external_account"], &["tos_acceptance"], Some("rejected.fraud"));
        for charges in [true, false] {
            for payouts in [true, false] {
                for requirements in [Requirements::default(), loaded.clone()] {
                    assert_eq!(
                        derive_onboarding_state(false, charges, payouts, &requirements),
                        OnboardingState::NotStarted
                    );
                }
            }
        }
    }

    #[test]
    fn test_fully_enabled_with_nothing_due_is_active() {
        let state = derive_onboarding_state(true, true, true, &Requirements::default());
        assert_eq!(state, OnboardingState::Active);
    }

    #[test]
    fn test_disabled_wins_over_restricted() {
        let requirements = reqs(&[], &["individual.id_number"], Some("requirements.past_due"));
        assert_eq!(
            derive_onboarding_state(true, true, true, &requirements),
            OnboardingState::Disabled
        );
    }

    #[test]
    fn test_blank_disabled_reason_is_ignored() {
        let requirements = reqs(&[], &[], Some("  "));
        assert_eq!(
            derive_onboarding_state(true, true, true, &requirements),
            OnboardingState::Active
        );
    }

    #[test]
    fn test_past_due_is_restricted() {
        let requirements = reqs(&["a"], &["b"], None);
        assert_eq!(
            derive_onboarding_state(true, true, true, &requirements),
            OnboardingState::Restricted
        );
    }

    #[test]
    fn test_enabled_with_items_due_is_pending_verification() {
        let requirements = reqs(&["company.tax_id"], &[], None);
        assert_eq!(
            derive_onboarding_state(true, true, true, &requirements),
            OnboardingState::PendingVerification
        );
    }

    #[test]
    fn test_not_enabled_with_items_due_is_incomplete() {
        let requirements = reqs(&["external_account"], &[], None);
        assert_eq!(
            derive_onboarding_state(true, true, false, &requirements),
            OnboardingState::Incomplete
        );
    }

    #[test]
    fn test_not_enabled_with_nothing_due_is_pending_verification() {
        assert_eq!(
            derive_onboarding_state(true, false, false, &Requirements::default()),
            OnboardingState::PendingVerification
        );
    }

    #[test]
    fn test_derivation_is_deterministic_over_all_inputs() {
        let requirement_sets = [
            Requirements::default(),
            reqs(&["x"], &[], None),
            reqs(&[], &["y"], None),
            reqs(&[], &[], Some("listed")),
            reqs(&["x"], &["y"], Some("listed")),
        ];
        for details in [true, false] {
            for charges in [true, false] {
                for payouts in [true, false] {
                    for requirements in &requirement_sets {
                        let first = derive_onboarding_state(details, charges, payouts, requirements);
                        let second =
                            derive_onboarding_state(details, charges, payouts, &requirements.clone());
                        assert_eq!(first, second);
                    }
                }
            }
        }
    }

    fn account(pending: bool, last_synced_at: Option<DateTime<Utc>>) -> MerchantAccount {
        let snapshot = AccountSnapshot {
            processor_account_id: "acct_1".to_string(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
            requirements: Requirements::default(),
            external_account: None,
        };
        let mut account =
            MerchantAccount::from_snapshot(Uuid::new_v4(), snapshot, PayoutHealth::none(), Utc::now());
        account.pending_stale_sync = pending;
        account.last_synced_at = last_synced_at;
        account
    }

    #[test]
    fn test_fresh_account_is_served_from_cache() {
        let now = Utc::now();
        let account = account(false, Some(now - Duration::seconds(30)));
        assert!(!account.needs_refresh(now, Duration::minutes(5)));
    }

    #[test]
    fn test_expired_ttl_forces_refresh() {
        let now = Utc::now();
        let account = account(false, Some(now - Duration::minutes(6)));
        assert!(account.needs_refresh(now, Duration::minutes(5)));
    }

    #[test]
    fn test_pending_marker_forces_refresh() {
        let now = Utc::now();
        let account = account(true, Some(now));
        assert!(account.needs_refresh(now, Duration::minutes(5)));
    }

    #[test]
    fn test_never_synced_forces_refresh() {
        assert!(account(false, None).needs_refresh(Utc::now(), Duration::minutes(5)));
    }
}
