//! Configuration surface.
//!
//! Every recognised option has a built-in default. A host may register a
//! single override provider that sees each lookup and can replace the value
//! per option name. The configuration file is the usual provider, but any
//! `Fn(&str, OptionValue) -> OptionValue` works.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    alias::{AliasTable, Fallbacks},
    config::ConfigError,
    mapping::MappingTable,
    reconcile::AttributeNames,
};

/// Recognised option names.
pub mod keys {
    pub const ATTRIBUTE_MAP: &str = "attribute_map";
    pub const DENY_UNMAPPED_USERS: &str = "deny_unmapped_users";
    pub const DEFAULT_USER: &str = "default_user";
    pub const USER_PRECEDENCE: &str = "user_precedence";
    pub const GROUP_ATTRIBUTE: &str = "group_attribute";
    pub const GROUPS_TO_ROLES: &str = "groups_to_roles";
    pub const GROUPS_TO_USERS: &str = "groups_to_users";
    pub const ALIASES: &str = "aliases";
    pub const EPPN_FROM_PRINCIPAL_NAME: &str = "eppn_from_principal_name";
    pub const MAIL_FROM_EPPN: &str = "mail_from_eppn";

    pub const USER_LOGIN_ATTRIBUTE: &str = "user_login_attribute";
    pub const USER_EMAIL_ATTRIBUTE: &str = "user_email_attribute";
    pub const DISPLAY_NAME_ATTRIBUTE: &str = "display_name_attribute";
    pub const FIRST_NAME_ATTRIBUTE: &str = "first_name_attribute";
    pub const LAST_NAME_ATTRIBUTE: &str = "last_name_attribute";

    pub const ENTITY_ID: &str = "entityId";
    pub const IDP: &str = "idp";
    pub const SP_CERT_FILE: &str = "sp_cert_file";
    pub const SP_KEY_FILE: &str = "sp_key_file";
    pub const PERMIT_PASSWORD_LOGIN: &str = "permit_password_login";
    pub const LOGIN_TITLE: &str = "login_title";
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Null,
    Bool(bool),
    Text(String),
    /// Ordered string → string pairs (legacy group mappings).
    Map(Vec<(String, String)>),
    AttributeMap(MappingTable),
    Aliases(AliasTable),
}

impl OptionValue {
    pub fn is_null(&self) -> bool {
        matches!(self, OptionValue::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Null => "null",
            OptionValue::Bool(_) => "bool",
            OptionValue::Text(_) => "text",
            OptionValue::Map(_) => "map",
            OptionValue::AttributeMap(_) => "attribute map",
            OptionValue::Aliases(_) => "alias table",
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl<T: Into<OptionValue>> From<Option<T>> for OptionValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(OptionValue::Null, Into::into)
    }
}

/// Host-supplied hook that may replace any option value.
pub trait OptionOverride: Send + Sync {
    /// Return the value to use for `name`, given the current `value`.
    fn override_option(&self, name: &str, value: OptionValue) -> OptionValue;
}

impl<F> OptionOverride for F
where
    F: Fn(&str, OptionValue) -> OptionValue + Send + Sync,
{
    fn override_option(&self, name: &str, value: OptionValue) -> OptionValue {
        self(name, value)
    }
}

/// Defaults table plus at most one override provider.
pub struct Options {
    defaults: HashMap<&'static str, OptionValue>,
    provider: Option<Arc<dyn OptionOverride>>,
}

impl Options {
    pub fn new() -> Self {
        let names = AttributeNames::default();
        let fallbacks = Fallbacks::default();
        let defaults = HashMap::from([
            (keys::ATTRIBUTE_MAP, OptionValue::AttributeMap(MappingTable::new())),
            (keys::DENY_UNMAPPED_USERS, false.into()),
            (keys::DEFAULT_USER, OptionValue::Null),
            (keys::USER_PRECEDENCE, "last".into()),
            (keys::GROUP_ATTRIBUTE, "eduPersonEntitlement".into()),
            (keys::GROUPS_TO_ROLES, OptionValue::Map(Vec::new())),
            (keys::GROUPS_TO_USERS, OptionValue::Map(Vec::new())),
            (keys::ALIASES, OptionValue::Aliases(AliasTable::eduperson())),
            (
                keys::EPPN_FROM_PRINCIPAL_NAME,
                fallbacks.eppn_from_principal_name.into(),
            ),
            (keys::MAIL_FROM_EPPN, fallbacks.mail_from_eppn.into()),
            (keys::USER_LOGIN_ATTRIBUTE, names.login.into()),
            (keys::USER_EMAIL_ATTRIBUTE, names.email.into()),
            (keys::DISPLAY_NAME_ATTRIBUTE, names.display_name.into()),
            (keys::FIRST_NAME_ATTRIBUTE, names.given_name.into()),
            (keys::LAST_NAME_ATTRIBUTE, names.family_name.into()),
            (keys::ENTITY_ID, OptionValue::Null),
            (keys::IDP, OptionValue::Null),
            (keys::SP_CERT_FILE, OptionValue::Null),
            (keys::SP_KEY_FILE, OptionValue::Null),
            (keys::PERMIT_PASSWORD_LOGIN, false.into()),
            (keys::LOGIN_TITLE, OptionValue::Null),
        ]);
        Self {
            defaults,
            provider: None,
        }
    }

    /// Builder form of [`register_override`](Self::register_override) for
    /// a fresh `Options`.
    pub fn with_override(mut self, provider: impl OptionOverride + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Register the override provider. Only one may be registered.
    pub fn register_override(
        &mut self,
        provider: Arc<dyn OptionOverride>,
    ) -> Result<(), ConfigError> {
        if self.provider.is_some() {
            return Err(ConfigError::Validation(
                "an option override provider is already registered".into(),
            ));
        }
        self.provider = Some(provider);
        Ok(())
    }

    pub fn has_override(&self) -> bool {
        self.provider.is_some()
    }

    /// Look up `name`: the built-in default (or `Null`), then the override.
    pub fn get_option(&self, name: &str) -> OptionValue {
        let value = self.defaults.get(name).cloned().unwrap_or(OptionValue::Null);
        match &self.provider {
            Some(provider) => provider.override_option(name, value),
            None => value,
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ConfigError> {
        match self.get_option(name) {
            OptionValue::Bool(value) => Ok(value),
            OptionValue::Null => Ok(false),
            other => Err(type_mismatch(name, "bool", &other)),
        }
    }

    /// Text option; `Null` and empty strings read as `None`.
    pub fn get_text(&self, name: &str) -> Result<Option<String>, ConfigError> {
        match self.get_option(name) {
            OptionValue::Text(value) if value.is_empty() => Ok(None),
            OptionValue::Text(value) => Ok(Some(value)),
            OptionValue::Null => Ok(None),
            other => Err(type_mismatch(name, "text", &other)),
        }
    }

    /// Text option that must be present.
    pub fn require_text(&self, name: &str) -> Result<String, ConfigError> {
        self.get_text(name)?
            .ok_or_else(|| ConfigError::Validation(format!("option '{}' must be set", name)))
    }

    pub fn get_map(&self, name: &str) -> Result<Vec<(String, String)>, ConfigError> {
        match self.get_option(name) {
            OptionValue::Map(pairs) => Ok(pairs),
            OptionValue::Null => Ok(Vec::new()),
            other => Err(type_mismatch(name, "map", &other)),
        }
    }

    pub fn get_attribute_map(&self, name: &str) -> Result<MappingTable, ConfigError> {
        match self.get_option(name) {
            OptionValue::AttributeMap(table) => Ok(table),
            OptionValue::Null => Ok(MappingTable::new()),
            other => Err(type_mismatch(name, "attribute map", &other)),
        }
    }

    pub fn get_aliases(&self, name: &str) -> Result<AliasTable, ConfigError> {
        match self.get_option(name) {
            OptionValue::Aliases(table) => Ok(table),
            OptionValue::Null => Ok(AliasTable::new()),
            other => Err(type_mismatch(name, "alias table", &other)),
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("defaults", &self.defaults.len())
            .field("has_override", &self.has_override())
            .finish()
    }
}

fn type_mismatch(name: &str, expected: &str, found: &OptionValue) -> ConfigError {
    ConfigError::Validation(format!(
        "option '{}' must be a {}, found {}",
        name,
        expected,
        found.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_override() {
        let options = Options::new();
        assert!(!options.has_override());
        assert_eq!(
            options.get_option(keys::GROUP_ATTRIBUTE),
            OptionValue::Text("eduPersonEntitlement".into())
        );
        assert!(!options.get_bool(keys::DENY_UNMAPPED_USERS).unwrap());
        assert_eq!(options.get_text(keys::DEFAULT_USER).unwrap(), None);
    }

    #[test]
    fn test_unknown_option_is_null() {
        assert!(Options::new().get_option("no_such_option").is_null());
    }

    #[test]
    fn test_override_sees_default_and_name() {
        let options = Options::new().with_override(|name: &str, value: OptionValue| {
            match name {
                keys::DEFAULT_USER => "guest".into(),
                keys::IDP => OptionValue::Text(format!("{:?}", value)),
                _ => value,
            }
        });

        assert!(options.has_override());
        assert_eq!(
            options.get_text(keys::DEFAULT_USER).unwrap().as_deref(),
            Some("guest")
        );
        assert_eq!(options.get_text(keys::IDP).unwrap().as_deref(), Some("Null"));
        // Untouched options pass through.
        assert!(!options.get_bool(keys::PERMIT_PASSWORD_LOGIN).unwrap());
    }

    #[test]
    fn test_second_override_rejected() {
        let mut options = Options::new();
        let provider: Arc<dyn OptionOverride> =
            Arc::new(|_: &str, value: OptionValue| value);
        options.register_override(provider.clone()).unwrap();
        assert!(options.register_override(provider).is_err());
    }

    #[test]
    fn test_type_mismatch_is_config_error() {
        let options =
            Options::new().with_override(|_: &str, _: OptionValue| OptionValue::Bool(true));
        let err = options.get_text(keys::DEFAULT_USER).unwrap_err();
        assert!(err.to_string().contains("default_user"));
    }

    #[test]
    fn test_empty_text_reads_as_none() {
        let options = Options::new().with_override(|name: &str, value: OptionValue| {
            if name == keys::DEFAULT_USER { "".into() } else { value }
        });
        assert_eq!(options.get_text(keys::DEFAULT_USER).unwrap(), None);
        assert!(options.require_text(keys::DEFAULT_USER).is_err());
    }
}
