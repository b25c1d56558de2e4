use std::sync::Arc;

use rstest::rstest;

use crate::{
    attributes::AttributeSet,
    config::RolemapConfig,
    hooks::{Integration, Reconciliation},
    mapping::MappingOutcome,
    options::Options,
    pipeline::{LoginError, login},
    reconcile::{Account, Profile},
    settings::Settings,
    store::{AccountStore, MemoryAccountStore},
};

const STAFF_RULES: &str = r#"
[[mapping.attribute_map]]
attribute = "entitlement"
rules = [
  { value = "itlab:staff", directive = "role:administrator" },
  { value = "test:staff", directive = "author" },
  { value = "test:student", directive = "eppn:subscriber" },
]
"#;

fn setup(
    config_toml: &str,
    accounts: impl IntoIterator<Item = Account>,
) -> (Integration, Arc<MemoryAccountStore>) {
    let config = RolemapConfig::from_str(config_toml).unwrap();
    let settings = Settings::from_options(&Options::new().with_override(config)).unwrap();
    let store = Arc::new(MemoryAccountStore::with_accounts(accounts));
    (Integration::new(settings, store.clone()), store)
}

fn attrs(pairs: &[(&str, &[&str])]) -> AttributeSet {
    pairs
        .iter()
        .map(|(name, values)| (*name, values.iter().copied()))
        .collect()
}

fn account(login: &str, roles: &[&str]) -> Account {
    Account {
        login: login.into(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        profile: Profile::default(),
    }
}

#[tokio::test]
async fn test_staff_entitlement_replaces_roles() {
    let (integration, store) = setup(
        STAFF_RULES,
        [account("jdoe@example.edu", &["subscriber", "author"])],
    );

    let report = login(
        &integration,
        attrs(&[
            ("eppn", &["jdoe@example.edu"]),
            ("entitlement", &["itlab:staff"]),
        ]),
    )
    .await
    .unwrap();

    assert_eq!(
        report.outcome,
        MappingOutcome::Roles(vec!["administrator".into()])
    );
    assert_eq!(report.attributes.first("mapped_by"), Some("role"));
    assert!(!report.provisioned);
    assert_eq!(report.account.roles, vec!["administrator"]);
    assert_eq!(store.update_count(), 1);
}

#[tokio::test]
async fn test_student_mapped_to_existing_user_without_reconciliation() {
    let (integration, store) = setup(STAFF_RULES, [account("subscriber", &["subscriber"])]);

    let report = login(
        &integration,
        attrs(&[
            ("eppn", &["student@example.edu"]),
            ("entitlement", &["test:student"]),
            ("displayName", &["A. Student"]),
        ]),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, MappingOutcome::MappedUser("subscriber".into()));
    assert_eq!(report.attributes.first("eppn"), Some("subscriber"));
    assert_eq!(report.reconciliation, Reconciliation::Skipped);
    assert_eq!(report.account, account("subscriber", &["subscriber"]));
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_role_beats_user_directive() {
    let (integration, _store) = setup(STAFF_RULES, []);

    let report = login(
        &integration,
        attrs(&[
            ("eppn", &["ta@example.edu"]),
            ("entitlement", &["test:student", "test:staff"]),
        ]),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, MappingOutcome::Roles(vec!["author".into()]));
    assert_eq!(report.account.login, "ta@example.edu");
}

#[tokio::test]
async fn test_unmapped_denied_before_provisioning() {
    let (integration, store) = setup(
        &format!("[mapping]\ndeny_unmapped_users = true\n{STAFF_RULES}"),
        [],
    );

    let err = login(
        &integration,
        attrs(&[("eppn", &["stranger@example.edu"])]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, LoginError::Denied(_)));
    assert_eq!(err.code(), Some("unmapped_user_denied"));
    assert_eq!(err.to_string(), "You are not authorized to access this content");
    assert!(
        store
            .get_account("stranger@example.edu")
            .await
            .unwrap()
            .is_none()
    );
}

#[rstest]
#[case::denied_without_default(true, None, false)]
#[case::default_user_allows(true, Some("guest"), true)]
#[case::policy_off(false, None, true)]
#[tokio::test]
async fn test_empty_attributes(
    #[case] deny: bool,
    #[case] default_user: Option<&str>,
    #[case] allowed: bool,
) {
    let mut toml = format!("[mapping]\ndeny_unmapped_users = {deny}\n");
    if let Some(user) = default_user {
        toml.push_str(&format!("default_user = \"{user}\"\n"));
    }
    let (integration, _store) = setup(&toml, [account("guest", &[])]);

    let result = login(&integration, AttributeSet::new()).await;
    match (allowed, default_user) {
        (true, Some(user)) => {
            let report = result.unwrap();
            assert_eq!(report.outcome, MappingOutcome::MappedUser(user.into()));
            assert_eq!(report.account.login, user);
        }
        // Gate passes, but nothing identifies the account.
        (true, None) => assert!(matches!(result, Err(LoginError::MissingLogin(_)))),
        (false, _) => assert!(matches!(result, Err(LoginError::Denied(_)))),
    }
}

#[tokio::test]
async fn test_new_role_mapped_account_provisioned_then_synced() {
    let (integration, store) = setup(STAFF_RULES, []);

    let report = login(
        &integration,
        attrs(&[
            ("eppn", &["new@example.edu"]),
            ("entitlement", &["test:staff", "itlab:staff"]),
            ("givenName", &["New"]),
            ("sn", &["Hire"]),
        ]),
    )
    .await
    .unwrap();

    assert!(report.provisioned);
    assert!(matches!(report.reconciliation, Reconciliation::Updated { .. }));
    // Rules fire in table order, not attribute order.
    assert_eq!(report.account.roles, vec!["administrator", "author"]);
    assert_eq!(report.account.profile.given_name.as_deref(), Some("New"));
    assert_eq!(report.account.profile.family_name.as_deref(), Some("Hire"));
    assert_eq!(store.update_count(), 1);
}

#[tokio::test]
async fn test_oid_attributes_and_legacy_fallbacks() {
    let (integration, _store) = setup(
        r#"
        [mapping]
        group_attribute = "entitlement"
        groups_to_roles = { "urn:mace:example.edu:staff" = "editor" }
        "#,
        [],
    );

    let report = login(
        &integration,
        attrs(&[
            ("eduPersonPrincipalName", &["jdoe@example.edu"]),
            (
                "urn:oid:1.3.6.1.4.1.5923.1.1.1.7",
                &["urn:mace:example.edu:staff"],
            ),
        ]),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, MappingOutcome::Roles(vec!["editor".into()]));
    assert_eq!(report.account.login, "jdoe@example.edu");
    // mail derived from eppn
    assert_eq!(
        report.account.profile.email.as_deref(),
        Some("jdoe@example.edu")
    );
}

#[tokio::test]
async fn test_fallbacks_disabled() {
    let (integration, _store) = setup(
        r#"
        [fallbacks]
        mail_from_eppn = false

        [[aliases]]
        canonical = "eppn"
        alternates = ["urn:oid:1.3.6.1.4.1.5923.1.1.1.6"]
        "#,
        [],
    );

    let report = login(
        &integration,
        attrs(&[("urn:oid:1.3.6.1.4.1.5923.1.1.1.6", &["jdoe@example.edu"])]),
    )
    .await
    .unwrap();

    assert_eq!(report.account.login, "jdoe@example.edu");
    assert!(!report.attributes.contains("mail"));
    assert_eq!(report.account.profile.email, None);
}

#[tokio::test]
async fn test_repeat_login_is_stable() {
    let (integration, store) = setup(STAFF_RULES, [account("jdoe@example.edu", &["subscriber"])]);
    let asserted = attrs(&[
        ("eppn", &["jdoe@example.edu"]),
        ("entitlement", &["itlab:staff"]),
        ("displayName", &["Jane Doe"]),
    ]);

    let first = login(&integration, asserted.clone()).await.unwrap();
    let second = login(&integration, asserted).await.unwrap();

    assert!(matches!(first.reconciliation, Reconciliation::Updated { .. }));
    assert_eq!(first.outcome, second.outcome);
    assert_eq!(first.account, second.account);
    assert_eq!(second.reconciliation, Reconciliation::Unchanged);
    assert_eq!(store.update_count(), 1);
}

fn forged(eppn: &str) -> AttributeSet {
    attrs(&[
        ("eppn", &[eppn]),
        ("entitlement", &["nothing:matches"]),
        ("mapped_by", &["role"]),
        ("role", &["administrator"]),
    ])
}

#[tokio::test]
async fn test_asserted_marker_cannot_pass_deny_gate() {
    let (integration, store) = setup(
        &format!("[mapping]\ndeny_unmapped_users = true\n{STAFF_RULES}"),
        [account("mallory@example.edu", &["subscriber"])],
    );

    let err = login(&integration, forged("mallory@example.edu"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("unmapped_user_denied"));
    let stored = store
        .get_account("mallory@example.edu")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.roles, vec!["subscriber"]);
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_asserted_role_never_reaches_existing_account() {
    let (integration, store) = setup(STAFF_RULES, [account("mallory@example.edu", &["subscriber"])]);

    let report = login(&integration, forged("mallory@example.edu"))
        .await
        .unwrap();

    assert_eq!(report.outcome, MappingOutcome::Unmapped);
    assert_eq!(report.reconciliation, Reconciliation::Skipped);
    assert!(!report.attributes.contains("mapped_by"));
    assert!(!report.attributes.contains("role"));
    assert_eq!(report.account.roles, vec!["subscriber"]);
    assert_eq!(store.update_count(), 0);
}

#[tokio::test]
async fn test_asserted_role_never_reaches_provisioning() {
    let (integration, _store) = setup(STAFF_RULES, []);

    let report = login(&integration, forged("mallory@example.edu"))
        .await
        .unwrap();

    assert!(report.provisioned);
    assert_eq!(report.reconciliation, Reconciliation::Skipped);
    assert!(report.account.roles.is_empty());
}

#[tokio::test]
async fn test_duplicate_role_matches_stored_once() {
    let (integration, store) = setup(
        r#"
        [[mapping.attribute_map]]
        attribute = "entitlement"
        rules = [{ value = "a", directive = "editor" }]

        [[mapping.attribute_map]]
        attribute = "affiliation"
        rules = [{ value = "staff", directive = "editor" }]
        "#,
        [account("jdoe@example.edu", &["subscriber"])],
    );

    let report = login(
        &integration,
        attrs(&[
            ("eppn", &["jdoe@example.edu"]),
            ("entitlement", &["a"]),
            ("affiliation", &["staff"]),
        ]),
    )
    .await
    .unwrap();

    assert_eq!(
        report.outcome,
        MappingOutcome::Roles(vec!["editor".into(), "editor".into()])
    );
    assert_eq!(report.account.roles, vec!["editor"]);
    assert_eq!(store.update_count(), 1);
}
