//! Pre-authentication access decision for subjects no mapping rule matched.

use crate::{attributes::AttributeSet, mapping::MappedBy, observability::metrics};

/// Authentication refused because the subject is not mapped to a local
/// role or login. An expected outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("You are not authorized to access this content")]
pub struct AuthDenied;

impl AuthDenied {
    /// Stable error code surfaced to the protocol engine.
    pub const CODE: &'static str = "unmapped_user_denied";

    pub fn code(&self) -> &'static str {
        Self::CODE
    }
}

/// Decide whether authentication may proceed.
///
/// Must run before any local account is created or updated. With
/// `deny_unmapped` unset this always succeeds; otherwise it succeeds only
/// when the mapping evaluator recorded a role or user marker.
pub fn decide(attrs: &AttributeSet, deny_unmapped: bool) -> Result<(), AuthDenied> {
    if !deny_unmapped || MappedBy::from_attributes(attrs).is_some() {
        metrics::record_access_decision("allowed");
        return Ok(());
    }

    tracing::warn!(
        code = AuthDenied::CODE,
        attribute_count = attrs.len(),
        "Denying authentication for unmapped subject"
    );
    metrics::record_access_decision("denied");
    Err(AuthDenied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{
        Directive, MARKER_ATTRIBUTE, MappingOutcome, MappingPolicy, MappingTable, evaluate,
    };

    #[test]
    fn test_allows_everything_when_policy_disabled() {
        assert!(decide(&AttributeSet::new(), false).is_ok());
    }

    #[test]
    fn test_denies_without_marker() {
        let attrs: AttributeSet = [("eppn", vec!["jdoe@example.edu"])].into_iter().collect();
        let err = decide(&attrs, true).unwrap_err();
        assert_eq!(err.code(), "unmapped_user_denied");
        assert_eq!(
            err.to_string(),
            "You are not authorized to access this content"
        );
    }

    #[test]
    fn test_allows_with_marker() {
        let mut attrs = AttributeSet::new();
        let policy = MappingPolicy {
            default_user: Some("guest".into()),
            ..MappingPolicy::default()
        };
        let outcome = evaluate(&mut attrs, &MappingTable::new(), &policy);

        assert_eq!(outcome, MappingOutcome::MappedUser("guest".into()));
        assert!(decide(&attrs, true).is_ok());
    }

    #[test]
    fn test_unrecognised_marker_value_denied() {
        let attrs: AttributeSet = [(MARKER_ATTRIBUTE, vec!["yes"])].into_iter().collect();
        assert!(decide(&attrs, true).is_err());
    }

    #[test]
    fn test_asserted_marker_does_not_pass_after_evaluation() {
        let table = MappingTable::new().with_rule(
            "entitlement",
            "itlab:staff",
            Directive::Role("administrator".into()),
        );
        let mut attrs: AttributeSet = [
            ("entitlement", vec!["nothing:matches"]),
            (MARKER_ATTRIBUTE, vec!["role"]),
        ]
        .into_iter()
        .collect();

        let outcome = evaluate(&mut attrs, &table, &MappingPolicy::default());

        assert_eq!(outcome, MappingOutcome::Unmapped);
        assert_eq!(decide(&attrs, true), Err(AuthDenied));
    }
}
