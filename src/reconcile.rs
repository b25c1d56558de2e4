//! Account reconciliation for role-mapped subjects.
//!
//! On every login of a subject mapped by role, the local account's role set
//! is replaced with the mapped roles and its profile is brought in line with
//! the IdP. Subjects mapped to an explicit local login are presumed to be
//! provisioned correctly and are left alone.

use serde::{Deserialize, Serialize};

use crate::{
    attributes::AttributeSet,
    mapping::{MappedBy, ROLE_ATTRIBUTE},
};

/// Which IdP attribute feeds each local account field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct AttributeNames {
    /// Attribute holding the local login identifier.
    #[serde(default = "default_login")]
    pub login: String,

    #[serde(default = "default_email")]
    pub email: String,

    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Given name. Not the same thing as "first name" in every culture.
    #[serde(default = "default_given_name")]
    pub given_name: String,

    /// Family name / surname. Not necessarily the "last name".
    #[serde(default = "default_family_name")]
    pub family_name: String,
}

impl Default for AttributeNames {
    fn default() -> Self {
        Self {
            login: default_login(),
            email: default_email(),
            display_name: default_display_name(),
            given_name: default_given_name(),
            family_name: default_family_name(),
        }
    }
}

fn default_login() -> String {
    "eppn".to_string()
}

fn default_email() -> String {
    "mail".to_string()
}

fn default_display_name() -> String {
    "displayName".to_string()
}

fn default_given_name() -> String {
    "givenName".to_string()
}

fn default_family_name() -> String {
    "sn".to_string()
}

/// Profile fields kept in sync with the IdP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

impl Profile {
    /// Profile asserted by the IdP, first value of each configured attribute.
    pub fn from_attributes(attrs: &AttributeSet, names: &AttributeNames) -> Self {
        let mut profile = Profile::default();
        for field in ProfileField::ALL {
            if let Some(value) = attrs.first(field.attribute(names)) {
                *field.slot(&mut profile) = Some(value.to_string());
            }
        }
        profile
    }
}

/// A local account as read from the account store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Immutable once provisioned.
    pub login: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub profile: Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    DisplayName,
    Email,
    GivenName,
    FamilyName,
}

impl ProfileField {
    pub const ALL: [ProfileField; 4] = [
        ProfileField::DisplayName,
        ProfileField::Email,
        ProfileField::GivenName,
        ProfileField::FamilyName,
    ];

    /// The IdP attribute configured for this field.
    pub fn attribute<'a>(&self, names: &'a AttributeNames) -> &'a str {
        match self {
            ProfileField::DisplayName => &names.display_name,
            ProfileField::Email => &names.email,
            ProfileField::GivenName => &names.given_name,
            ProfileField::FamilyName => &names.family_name,
        }
    }

    fn get<'a>(&self, profile: &'a Profile) -> Option<&'a str> {
        match self {
            ProfileField::DisplayName => profile.display_name.as_deref(),
            ProfileField::Email => profile.email.as_deref(),
            ProfileField::GivenName => profile.given_name.as_deref(),
            ProfileField::FamilyName => profile.family_name.as_deref(),
        }
    }

    fn slot<'a>(&self, profile: &'a mut Profile) -> &'a mut Option<String> {
        match self {
            ProfileField::DisplayName => &mut profile.display_name,
            ProfileField::Email => &mut profile.email,
            ProfileField::GivenName => &mut profile.given_name,
            ProfileField::FamilyName => &mut profile.family_name,
        }
    }
}

/// Staged profile changes. `Some` fields are set, `None` fields are left as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChanges(Profile);

impl ProfileChanges {
    pub fn set(&mut self, field: ProfileField, value: impl Into<String>) {
        *field.slot(&mut self.0) = Some(value.into());
    }

    pub fn get(&self, field: ProfileField) -> Option<&str> {
        field.get(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == Profile::default()
    }

    /// Overlay the staged values onto `profile`.
    pub fn apply_to(&self, profile: &mut Profile) {
        for field in ProfileField::ALL {
            if let Some(value) = self.get(field) {
                *field.slot(profile) = Some(value.to_string());
            }
        }
    }
}

/// The single combined write issued to the account store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountUpdate {
    pub login: String,
    /// Replaces the account's entire role set.
    pub roles: Vec<String>,
    pub profile: ProfileChanges,
    /// Whether `roles` differs from the account's current roles.
    pub roles_changed: bool,
}

impl AccountUpdate {
    /// Nothing would change if this update were written.
    pub fn is_noop(&self) -> bool {
        !self.roles_changed && self.profile.is_empty()
    }
}

/// Compute the update for `account` after a login described by `attrs`.
///
/// Returns `None` unless the subject was mapped by role. The login
/// identifier is never part of the update.
pub fn reconcile(
    account: &Account,
    attrs: &AttributeSet,
    names: &AttributeNames,
) -> Option<AccountUpdate> {
    if MappedBy::from_attributes(attrs) != Some(MappedBy::Role) {
        return None;
    }

    let roles = match attrs.get(ROLE_ATTRIBUTE) {
        Some(roles) if !roles.is_empty() => dedup_roles(roles),
        _ => {
            tracing::warn!(
                login = %account.login,
                "Role-mapped subject has no role attribute, skipping reconciliation"
            );
            return None;
        }
    };

    let mut profile = ProfileChanges::default();
    for field in ProfileField::ALL {
        let Some(asserted) = attrs.first(field.attribute(names)) else {
            continue;
        };
        if field.get(&account.profile) != Some(asserted) {
            profile.set(field, asserted);
        }
    }

    let roles_changed = roles != account.roles;
    Some(AccountUpdate {
        login: account.login.clone(),
        roles,
        profile,
        roles_changed,
    })
}

/// Role set in first-seen order.
fn dedup_roles(roles: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(roles.len());
    for role in roles {
        if !unique.contains(role) {
            unique.push(role.clone());
        }
    }
    unique
}
