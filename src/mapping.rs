//! Attribute-value → role/user mapping rules.
//!
//! A [`MappingTable`] is an ordered list of attributes, each with an ordered
//! list of `value → Directive` rules. Evaluation walks the table in definition
//! order and checks every rule against the (possibly multi-valued) attribute
//! by membership. Role directives accumulate; user directives select a single
//! local login. Any matched role wins over any matched user.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeSet;

/// Synthetic attribute recording which branch of the mapping fired.
pub const MARKER_ATTRIBUTE: &str = "mapped_by";

/// Attribute the computed role list is written to.
pub const ROLE_ATTRIBUTE: &str = "role";

/// Names only [`evaluate`] may write. Values asserted under these names are
/// discarded before evaluation.
pub const RESERVED_ATTRIBUTES: [&str; 2] = [MARKER_ATTRIBUTE, ROLE_ATTRIBUTE];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&name)
}

/// Remove the marker and role attributes. Returns whether any were present.
pub fn clear_decision(attrs: &mut AttributeSet) -> bool {
    RESERVED_ATTRIBUTES
        .iter()
        .fold(false, |cleared, name| attrs.remove(name).is_some() || cleared)
}

/// What a matched rule grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Directive {
    /// Grant a local role.
    Role(String),
    /// Map the subject onto an existing local login.
    User(String),
}

/// Errors from parsing a `[prefix:]value` directive string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("directive is empty")]
    Empty,

    #[error("directive '{prefix}:' has no value")]
    EmptyValue { prefix: String },

    #[error("unknown directive prefix '{prefix}' (expected role, user or eppn)")]
    UnknownPrefix { prefix: String },
}

impl FromStr for Directive {
    type Err = DirectiveError;

    /// Parse `role:NAME`, `user:LOGIN`, `eppn:LOGIN` or a bare `NAME` (a role).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DirectiveError::Empty);
        }

        let Some((prefix, value)) = s.split_once(':') else {
            return Ok(Directive::Role(s.to_string()));
        };

        let value = value.trim();
        let prefix = prefix.trim();
        if value.is_empty() {
            return Err(DirectiveError::EmptyValue {
                prefix: prefix.to_string(),
            });
        }

        match prefix {
            "role" => Ok(Directive::Role(value.to_string())),
            "user" | "eppn" => Ok(Directive::User(value.to_string())),
            other => Err(DirectiveError::UnknownPrefix {
                prefix: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Role(name) => write!(f, "role:{}", name),
            Directive::User(login) => write!(f, "user:{}", login),
        }
    }
}

/// Rules for one attribute, in definition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeRules {
    pub attribute: String,
    pub rules: Vec<(String, Directive)>,
}

/// Ordered attribute → value → directive table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MappingTable {
    attributes: Vec<AttributeRules>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Rules for an attribute already in the table are
    /// appended to that attribute's list, keeping its original position.
    pub fn push(&mut self, attribute: &str, value: impl Into<String>, directive: Directive) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.attribute == attribute) {
            Some(entry) => entry.rules.push((value, directive)),
            None => self.attributes.push(AttributeRules {
                attribute: attribute.to_string(),
                rules: vec![(value, directive)],
            }),
        }
    }

    /// Builder form of [`push`](Self::push).
    pub fn with_rule(mut self, attribute: &str, value: &str, directive: Directive) -> Self {
        self.push(attribute, value, directive);
        self
    }

    pub fn attributes(&self) -> &[AttributeRules] {
        &self.attributes
    }

    /// Total number of rules across all attributes.
    pub fn rule_count(&self) -> usize {
        self.attributes.iter().map(|a| a.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Which user directive wins when several match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum UserPrecedence {
    /// The first matching user directive is kept.
    First,
    /// Each matching user directive overwrites the previous one.
    #[default]
    Last,
}

/// Evaluation knobs that come from configuration rather than the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingPolicy {
    /// Login assigned when no rule matches. Empty strings are ignored.
    pub default_user: Option<String>,
    pub user_precedence: UserPrecedence,
    /// Canonical attribute the mapped login is written to.
    pub login_attribute: String,
}

impl Default for MappingPolicy {
    fn default() -> Self {
        Self {
            default_user: None,
            user_precedence: UserPrecedence::default(),
            login_attribute: crate::alias::EPPN.to_string(),
        }
    }
}

/// Result of evaluating the mapping table for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum MappingOutcome {
    /// At least one role matched. Encounter order, duplicates preserved.
    Roles(Vec<String>),
    /// No role matched; the subject maps to this local login.
    MappedUser(String),
    Unmapped,
}

impl MappingOutcome {
    /// Label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            MappingOutcome::Roles(_) => "role",
            MappingOutcome::MappedUser(_) => "user",
            MappingOutcome::Unmapped => "unmapped",
        }
    }

    pub fn is_mapped(&self) -> bool {
        !matches!(self, MappingOutcome::Unmapped)
    }
}

/// Branch recorded in [`MARKER_ATTRIBUTE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedBy {
    Role,
    User,
}

impl MappedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappedBy::Role => "role",
            MappedBy::User => "user",
        }
    }

    /// Read the marker from `attrs`, if a mapping fired for this event.
    pub fn from_attributes(attrs: &AttributeSet) -> Option<Self> {
        match attrs.first(MARKER_ATTRIBUTE)? {
            "role" => Some(MappedBy::Role),
            "user" => Some(MappedBy::User),
            _ => None,
        }
    }
}

/// Evaluate `table` against `attrs` and record the decision in `attrs`.
///
/// Any [`RESERVED_ATTRIBUTES`] already in `attrs` are dropped first, whether
/// the IdP asserted them or an earlier evaluation wrote them. Then
/// [`MARKER_ATTRIBUTE`] plus either [`ROLE_ATTRIBUTE`] or the policy's login
/// attribute is written; [`MappingOutcome::Unmapped`] leaves both absent.
/// The outcome depends only on the table and the non-synthetic attributes,
/// so re-running it yields the same result.
pub fn evaluate(
    attrs: &mut AttributeSet,
    table: &MappingTable,
    policy: &MappingPolicy,
) -> MappingOutcome {
    if clear_decision(attrs) {
        tracing::debug!("Discarded existing mapping decision attributes");
    }

    let mut roles: Vec<String> = Vec::new();
    let mut user: Option<&str> = None;

    for entry in table.attributes() {
        let Some(values) = attrs.get(&entry.attribute) else {
            continue;
        };
        for (value, directive) in &entry.rules {
            if !values.iter().any(|v| v == value) {
                continue;
            }
            tracing::debug!(
                attribute = %entry.attribute,
                value = %value,
                directive = %directive,
                "Mapping rule matched"
            );
            match directive {
                Directive::Role(name) => roles.push(name.clone()),
                Directive::User(login) => match policy.user_precedence {
                    UserPrecedence::Last => user = Some(login.as_str()),
                    UserPrecedence::First => {
                        user.get_or_insert(login.as_str());
                    }
                },
            }
        }
    }

    let default_user = policy
        .default_user
        .as_deref()
        .filter(|login| !login.is_empty());

    let outcome = if !roles.is_empty() {
        MappingOutcome::Roles(roles)
    } else if let Some(login) = user.or(default_user) {
        MappingOutcome::MappedUser(login.to_string())
    } else {
        MappingOutcome::Unmapped
    };

    match &outcome {
        MappingOutcome::Roles(roles) => {
            attrs.insert(ROLE_ATTRIBUTE, roles.clone());
            attrs.insert_one(MARKER_ATTRIBUTE, MappedBy::Role.as_str());
        }
        MappingOutcome::MappedUser(login) => {
            attrs.insert_one(policy.login_attribute.as_str(), login.as_str());
            attrs.insert_one(MARKER_ATTRIBUTE, MappedBy::User.as_str());
        }
        MappingOutcome::Unmapped => {}
    }

    tracing::debug!(outcome = outcome.kind(), "Mapping evaluated");
    outcome
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn entitlement(values: &[&str]) -> AttributeSet {
        [("entitlement", values.iter().copied())].into_iter().collect()
    }

    fn sample_table() -> MappingTable {
        MappingTable::new()
            .with_rule(
                "entitlement",
                "itlab:staff",
                Directive::Role("administrator".into()),
            )
            .with_rule("entitlement", "test:staff", Directive::Role("author".into()))
            .with_rule(
                "entitlement",
                "test:faculty",
                Directive::User("general-user".into()),
            )
            .with_rule(
                "entitlement",
                "test:student",
                Directive::Role("contributor".into()),
            )
    }

    #[rstest]
    #[case::role_prefix("role:administrator", Directive::Role("administrator".into()))]
    #[case::bare("editor", Directive::Role("editor".into()))]
    #[case::user_prefix("user:general-user", Directive::User("general-user".into()))]
    #[case::eppn_prefix("eppn:subscriber", Directive::User("subscriber".into()))]
    #[case::whitespace("  role: author ", Directive::Role("author".into()))]
    fn test_parse_directive(#[case] input: &str, #[case] expected: Directive) {
        assert_eq!(input.parse::<Directive>().unwrap(), expected);
    }

    #[rstest]
    #[case::empty("", DirectiveError::Empty)]
    #[case::blank("   ", DirectiveError::Empty)]
    #[case::no_value("role:", DirectiveError::EmptyValue { prefix: "role".into() })]
    #[case::typo("rol:admin", DirectiveError::UnknownPrefix { prefix: "rol".into() })]
    fn test_parse_directive_errors(#[case] input: &str, #[case] expected: DirectiveError) {
        assert_eq!(input.parse::<Directive>().unwrap_err(), expected);
    }

    #[test]
    fn test_role_match_sets_marker_and_role_attribute() {
        let mut attrs = entitlement(&["itlab:staff"]);
        let outcome = evaluate(&mut attrs, &sample_table(), &MappingPolicy::default());

        assert_eq!(outcome, MappingOutcome::Roles(vec!["administrator".into()]));
        assert_eq!(attrs.get(ROLE_ATTRIBUTE).unwrap(), ["administrator"]);
        assert_eq!(MappedBy::from_attributes(&attrs), Some(MappedBy::Role));
    }

    #[test]
    fn test_multi_valued_attribute_matched_by_membership_in_table_order() {
        let mut attrs = entitlement(&["test:student", "other", "itlab:staff"]);
        let outcome = evaluate(&mut attrs, &sample_table(), &MappingPolicy::default());
        assert_eq!(
            outcome,
            MappingOutcome::Roles(vec!["administrator".into(), "contributor".into()])
        );
    }

    #[test]
    fn test_roles_take_precedence_over_users() {
        let mut attrs = entitlement(&["test:faculty", "test:staff"]);
        let outcome = evaluate(&mut attrs, &sample_table(), &MappingPolicy::default());

        assert_eq!(outcome, MappingOutcome::Roles(vec!["author".into()]));
        assert!(!attrs.contains("eppn"));
    }

    #[test]
    fn test_user_directive_writes_login_attribute() {
        let table = MappingTable::new().with_rule(
            "entitlement",
            "test:student",
            "eppn:subscriber".parse().unwrap(),
        );
        let mut attrs = entitlement(&["test:student"]);
        attrs.insert_one("eppn", "student@example.edu");

        let outcome = evaluate(&mut attrs, &table, &MappingPolicy::default());

        assert_eq!(outcome, MappingOutcome::MappedUser("subscriber".into()));
        assert_eq!(attrs.first("eppn"), Some("subscriber"));
        assert_eq!(MappedBy::from_attributes(&attrs), Some(MappedBy::User));
        assert!(!attrs.contains(ROLE_ATTRIBUTE));
    }

    #[rstest]
    #[case::last_wins(UserPrecedence::Last, "second")]
    #[case::first_wins(UserPrecedence::First, "first")]
    fn test_user_precedence(#[case] precedence: UserPrecedence, #[case] expected: &str) {
        let table = MappingTable::new()
            .with_rule("entitlement", "a", Directive::User("first".into()))
            .with_rule("entitlement", "b", Directive::User("second".into()));
        let policy = MappingPolicy {
            user_precedence: precedence,
            ..MappingPolicy::default()
        };
        let mut attrs = entitlement(&["a", "b"]);

        let outcome = evaluate(&mut attrs, &table, &policy);
        assert_eq!(outcome, MappingOutcome::MappedUser(expected.into()));
    }

    #[test]
    fn test_default_user_used_when_nothing_matches() {
        let policy = MappingPolicy {
            default_user: Some("guest".into()),
            ..MappingPolicy::default()
        };
        let mut attrs = AttributeSet::new();
        let outcome = evaluate(&mut attrs, &sample_table(), &policy);

        assert_eq!(outcome, MappingOutcome::MappedUser("guest".into()));
        assert_eq!(attrs.first("eppn"), Some("guest"));
    }

    #[test]
    fn test_empty_default_user_is_ignored() {
        let policy = MappingPolicy {
            default_user: Some(String::new()),
            ..MappingPolicy::default()
        };
        let mut attrs = AttributeSet::new();
        assert_eq!(
            evaluate(&mut attrs, &sample_table(), &policy),
            MappingOutcome::Unmapped
        );
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let mut attrs = entitlement(&["itlab:staff", "test:staff", "test:faculty"]);
        let table = sample_table();
        let policy = MappingPolicy::default();

        let first = evaluate(&mut attrs, &table, &policy);
        let snapshot = attrs.clone();
        let second = evaluate(&mut attrs, &table, &policy);

        assert_eq!(first, second);
        assert_eq!(attrs, snapshot);
    }

    #[rstest]
    #[case::no_match(&["nothing:matches"], MappingOutcome::Unmapped)]
    #[case::user_match(&["test:faculty"], MappingOutcome::MappedUser("general-user".into()))]
    fn test_asserted_decision_attributes_are_discarded(
        #[case] entitlements: &[&str],
        #[case] expected: MappingOutcome,
    ) {
        let mut attrs = entitlement(entitlements);
        attrs.insert_one(MARKER_ATTRIBUTE, "role");
        attrs.insert_one(ROLE_ATTRIBUTE, "administrator");

        let outcome = evaluate(&mut attrs, &sample_table(), &MappingPolicy::default());

        assert_eq!(outcome, expected);
        assert!(!attrs.contains(ROLE_ATTRIBUTE));
        assert_ne!(MappedBy::from_attributes(&attrs), Some(MappedBy::Role));
    }

    #[test]
    fn test_stale_marker_cleared_when_reevaluated_unmapped() {
        let mut attrs = entitlement(&["itlab:staff"]);
        evaluate(&mut attrs, &sample_table(), &MappingPolicy::default());
        assert_eq!(MappedBy::from_attributes(&attrs), Some(MappedBy::Role));

        let outcome = evaluate(&mut attrs, &MappingTable::new(), &MappingPolicy::default());

        assert_eq!(outcome, MappingOutcome::Unmapped);
        assert!(!attrs.contains(MARKER_ATTRIBUTE));
        assert!(!attrs.contains(ROLE_ATTRIBUTE));
    }

    #[test]
    fn test_duplicate_roles_are_preserved() {
        let table = MappingTable::new()
            .with_rule("entitlement", "a", Directive::Role("editor".into()))
            .with_rule("affiliation", "staff", Directive::Role("editor".into()));
        let mut attrs = entitlement(&["a"]);
        attrs.insert_one("affiliation", "staff");

        let outcome = evaluate(&mut attrs, &table, &MappingPolicy::default());
        assert_eq!(
            outcome,
            MappingOutcome::Roles(vec!["editor".into(), "editor".into()])
        );
    }

    #[test]
    fn test_push_keeps_attribute_position() {
        let mut table = MappingTable::new();
        table.push("a", "1", Directive::Role("r1".into()));
        table.push("b", "1", Directive::Role("r2".into()));
        table.push("a", "2", Directive::Role("r3".into()));

        let names: Vec<_> = table.attributes().iter().map(|a| a.attribute.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(table.rule_count(), 3);
    }
}
