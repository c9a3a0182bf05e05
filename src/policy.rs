//! Reachability policy resolution (SPEC_FULL §4.3).
//!
//! The teacher (`server/negotiation.rs`) checked the `allow_*_sha1_in_want`
//! booleans ad hoc, per want, inside `validate_wants` — and did so
//! incorrectly (`allow_tip_sha1_in_want` was checked three times, while
//! `allow_any_sha1_in_want` was never checked at all, so a client enabling
//! only "any" was wrongly rejected). This module resolves the booleans into
//! a single [`RequestPolicy`] once per session and applies it uniformly.

use crate::{
    config::ServerOptions,
    error::{Error, Result},
    reachability::ReachabilityOracle,
    types::RequestPolicy,
};
use gix_hash::ObjectId;

impl RequestPolicy {
    /// Resolve the effective policy from a set of configuration booleans.
    /// Git itself treats "reachable" as a superset of "tip", and the most
    /// permissive flag set by the operator wins.
    pub fn from_options(options: &ServerOptions) -> Self {
        if options.allow_any_sha1_in_want {
            Self::Any
        } else if options.allow_reachable_sha1_in_want {
            Self::ReachableCommitTip
        } else if options.allow_tip_sha1_in_want {
            Self::Tip
        } else {
            Self::Advertised
        }
    }

    /// Check a single `want`/`want-ref` target oid against this policy.
    ///
    /// `advertised` is the set of oids at the tip of a reference the client
    /// was actually shown (after ref-hiding); `all_tips` is every tip in the
    /// repository regardless of hiding. `Tip`/`ReachableCommitTip` check
    /// against `all_tips` per SPEC_FULL §4.3 ("tip among the full,
    /// unfiltered set of refs") — a hidden ref's object is still a valid
    /// want target under those policies, it's just never advertised.
    /// `oracle` answers ancestry queries for the `ReachableCommit*` variants.
    pub fn validate(
        &self,
        oid: ObjectId,
        advertised: &std::collections::HashSet<ObjectId>,
        all_tips: &std::collections::HashSet<ObjectId>,
        oracle: &dyn ReachabilityOracle,
    ) -> Result<()> {
        let allowed = match self {
            Self::Advertised => advertised.contains(&oid),
            Self::Tip => all_tips.contains(&oid),
            Self::ReachableCommit => {
                let tips: Vec<_> = advertised.iter().copied().collect();
                oracle.is_ancestor_of_any(oid, &tips)?
            }
            Self::ReachableCommitTip => {
                if all_tips.contains(&oid) {
                    true
                } else {
                    let tips: Vec<_> = all_tips.iter().copied().collect();
                    oracle.is_ancestor_of_any(oid, &tips)?
                }
            }
            Self::Any => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(Error::PolicyDenied { oid })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct AlwaysFalse;
    impl ReachabilityOracle for AlwaysFalse {
        fn is_ancestor_of_any(&self, _candidate: ObjectId, _tips: &[ObjectId]) -> Result<bool> {
            Ok(false)
        }
    }

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_bytes_or_panic(&[b; 20])
    }

    #[test]
    fn default_options_resolve_to_advertised_only() {
        let options = ServerOptions::default();
        assert_eq!(RequestPolicy::from_options(&options), RequestPolicy::Advertised);
    }

    #[test]
    fn any_wins_over_other_flags() {
        let mut options = ServerOptions::default();
        options.allow_tip_sha1_in_want = true;
        options.allow_any_sha1_in_want = true;
        assert_eq!(RequestPolicy::from_options(&options), RequestPolicy::Any);
    }

    #[test]
    fn advertised_rejects_non_tip() {
        let advertised: HashSet<_> = [oid(1)].into_iter().collect();
        let all_tips = advertised.clone();
        let policy = RequestPolicy::Advertised;
        assert!(policy.validate(oid(1), &advertised, &all_tips, &AlwaysFalse).is_ok());
        assert!(policy.validate(oid(2), &advertised, &all_tips, &AlwaysFalse).is_err());
    }

    #[test]
    fn tip_policy_allows_hidden_ref_not_in_advertised_set() {
        let advertised: HashSet<_> = [oid(1)].into_iter().collect();
        let all_tips: HashSet<_> = [oid(1), oid(2)].into_iter().collect();
        let policy = RequestPolicy::Tip;
        assert!(policy.validate(oid(2), &advertised, &all_tips, &AlwaysFalse).is_ok());
        assert!(policy.validate(oid(3), &advertised, &all_tips, &AlwaysFalse).is_err());
    }

    #[test]
    fn any_accepts_everything() {
        let advertised = HashSet::new();
        assert!(RequestPolicy::Any.validate(oid(9), &advertised, &advertised, &AlwaysFalse).is_ok());
    }
}
