//! Immutable settings compiled once from [`Options`] at startup.
//!
//! Every pure function in the pipeline takes what it needs from here, so
//! nothing consults the configuration surface per login.

use crate::{
    alias::{AliasTable, Fallbacks},
    config::ConfigError,
    mapping::{Directive, MappingPolicy, MappingTable, UserPrecedence},
    options::{Options, keys},
    reconcile::AttributeNames,
};

/// Pass-through settings for the SAML protocol engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub entity_id: Option<String>,
    pub idp: Option<String>,
    pub sp_cert_file: Option<String>,
    pub sp_key_file: Option<String>,
    pub permit_password_login: bool,
    pub login_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub aliases: AliasTable,
    pub fallbacks: Fallbacks,
    /// `attribute_map` followed by the compiled legacy group rules.
    pub mapping: MappingTable,
    pub policy: MappingPolicy,
    pub deny_unmapped_users: bool,
    pub names: AttributeNames,
    pub engine: EngineSettings,
}

impl Settings {
    /// Read every recognised option once.
    pub fn from_options(options: &Options) -> Result<Self, ConfigError> {
        let names = AttributeNames {
            login: options.require_text(keys::USER_LOGIN_ATTRIBUTE)?,
            email: options.require_text(keys::USER_EMAIL_ATTRIBUTE)?,
            display_name: options.require_text(keys::DISPLAY_NAME_ATTRIBUTE)?,
            given_name: options.require_text(keys::FIRST_NAME_ATTRIBUTE)?,
            family_name: options.require_text(keys::LAST_NAME_ATTRIBUTE)?,
        };

        let user_precedence = match options.get_text(keys::USER_PRECEDENCE)?.as_deref() {
            None | Some("last") => UserPrecedence::Last,
            Some("first") => UserPrecedence::First,
            Some(other) => {
                return Err(ConfigError::Validation(format!(
                    "option '{}' must be \"first\" or \"last\", found \"{}\"",
                    keys::USER_PRECEDENCE,
                    other
                )));
            }
        };

        let mut mapping = options.get_attribute_map(keys::ATTRIBUTE_MAP)?;
        if let Some(group_attribute) = options.get_text(keys::GROUP_ATTRIBUTE)? {
            compile_group_rules(
                &mut mapping,
                &group_attribute,
                &options.get_map(keys::GROUPS_TO_ROLES)?,
                &options.get_map(keys::GROUPS_TO_USERS)?,
            );
        }

        let settings = Self {
            aliases: options.get_aliases(keys::ALIASES)?,
            fallbacks: Fallbacks {
                eppn_from_principal_name: options.get_bool(keys::EPPN_FROM_PRINCIPAL_NAME)?,
                mail_from_eppn: options.get_bool(keys::MAIL_FROM_EPPN)?,
            },
            policy: MappingPolicy {
                default_user: options.get_text(keys::DEFAULT_USER)?,
                user_precedence,
                login_attribute: names.login.clone(),
            },
            mapping,
            deny_unmapped_users: options.get_bool(keys::DENY_UNMAPPED_USERS)?,
            names,
            engine: EngineSettings {
                entity_id: options.get_text(keys::ENTITY_ID)?,
                idp: options.get_text(keys::IDP)?,
                sp_cert_file: options.get_text(keys::SP_CERT_FILE)?,
                sp_key_file: options.get_text(keys::SP_KEY_FILE)?,
                permit_password_login: options.get_bool(keys::PERMIT_PASSWORD_LOGIN)?,
                login_title: options.get_text(keys::LOGIN_TITLE)?,
            },
        };

        tracing::info!(
            rules = settings.mapping.rule_count(),
            aliases = settings.aliases.iter().count(),
            deny_unmapped_users = settings.deny_unmapped_users,
            default_user = settings.policy.default_user.is_some(),
            "Settings loaded"
        );
        Ok(settings)
    }
}

/// Append legacy group rules for `attribute`. A group listed in both maps
/// only gets its user rule.
fn compile_group_rules(
    table: &mut MappingTable,
    attribute: &str,
    groups_to_roles: &[(String, String)],
    groups_to_users: &[(String, String)],
) {
    for (group, role) in groups_to_roles {
        if groups_to_users.iter().any(|(g, _)| g == group) {
            tracing::debug!(group = %group, "Group mapped to both a role and a user, keeping the user");
            continue;
        }
        table.push(attribute, group.as_str(), Directive::Role(role.clone()));
    }
    for (group, login) in groups_to_users {
        table.push(attribute, group.as_str(), Directive::User(login.clone()));
    }
}
