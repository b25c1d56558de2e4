//! Configuration file for the SSO role mapper.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax. A loaded [`RolemapConfig`] is
//! the usual override provider for [`Options`](crate::options::Options).
//!
//! # Example
//!
//! ```toml
//! [sso]
//! entity_id = "https://wp.example.edu"
//! sp_key_file = "${SP_KEY_PATH}"
//!
//! [[mapping.attribute_map]]
//! attribute = "entitlement"
//! rules = [{ value = "itlab:staff", directive = "role:administrator" }]
//! ```

mod mapping;
mod observability;
mod sso;

use std::{path::Path, sync::LazyLock};

pub use mapping::*;
pub use observability::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
pub(crate) use sso::check_files;
pub use sso::*;

use crate::{
    alias::{AliasTable, Fallbacks},
    mapping::{DirectiveError, UserPrecedence, is_reserved},
    options::{OptionOverride, OptionValue, keys},
    reconcile::AttributeNames,
};

/// Root configuration.
///
/// Every section is optional; an empty file yields the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RolemapConfig {
    /// Pass-through settings for the SAML protocol engine.
    #[serde(default)]
    pub sso: SsoConfig,

    /// Role/user mapping rules and policy.
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Canonical attribute → alternate names, resolved in the order
    /// written. Replaces the built-in eduPerson table when set.
    #[serde(default)]
    pub aliases: Option<Vec<AliasConfig>>,

    /// Legacy eppn/mail derivation.
    #[serde(default)]
    pub fallbacks: Fallbacks,

    /// IdP attributes feeding local account fields.
    #[serde(default)]
    pub attribute_names: AttributeNames,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// One `[[aliases]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct AliasConfig {
    pub canonical: String,
    /// Names consulted in order until one is present.
    pub alternates: Vec<String>,
}

impl RolemapConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let mut config: RolemapConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and compile the mapping table.
    fn validate(&mut self) -> Result<(), ConfigError> {
        self.sso.validate()?;
        self.mapping.compile()?;

        if let Some(aliases) = &self.aliases {
            validate_aliases(aliases)?;
        }

        if self.attribute_names.login.trim().is_empty() {
            return Err(ConfigError::Validation(
                "attribute_names.login must not be empty".into(),
            ));
        }

        if self.mapping.deny_unmapped_users
            && self.mapping.table().is_empty()
            && self.mapping.groups_to_roles.is_empty()
            && self.mapping.groups_to_users.is_empty()
            && self.mapping.default_user.is_none()
        {
            tracing::warn!(
                "mapping.deny_unmapped_users is set but no mapping rules or default user \
                 are configured. Every login will be denied."
            );
        }

        Ok(())
    }

    /// Generate the JSON schema for the configuration file.
    #[cfg(feature = "json-schema")]
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RolemapConfig)
    }

    /// Generate the JSON schema as a pretty-printed JSON string.
    #[cfg(feature = "json-schema")]
    pub fn json_schema_string() -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&Self::json_schema())?)
    }
}

impl OptionOverride for RolemapConfig {
    fn override_option(&self, name: &str, value: OptionValue) -> OptionValue {
        let mapping = &self.mapping;
        let names = &self.attribute_names;
        match name {
            keys::ATTRIBUTE_MAP => OptionValue::AttributeMap(mapping.table().clone()),
            keys::DENY_UNMAPPED_USERS => mapping.deny_unmapped_users.into(),
            keys::DEFAULT_USER => mapping.default_user.clone().into(),
            keys::USER_PRECEDENCE => match mapping.user_precedence {
                UserPrecedence::First => "first".into(),
                UserPrecedence::Last => "last".into(),
            },
            keys::GROUP_ATTRIBUTE => mapping.group_attribute.clone().into(),
            keys::GROUPS_TO_ROLES => OptionValue::Map(
                mapping
                    .groups_to_roles
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            keys::GROUPS_TO_USERS => OptionValue::Map(
                mapping
                    .groups_to_users
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            keys::ALIASES => match &self.aliases {
                Some(aliases) => OptionValue::Aliases(
                    aliases
                        .iter()
                        .map(|entry| (entry.canonical.clone(), entry.alternates.clone()))
                        .collect::<AliasTable>(),
                ),
                None => value,
            },
            keys::EPPN_FROM_PRINCIPAL_NAME => self.fallbacks.eppn_from_principal_name.into(),
            keys::MAIL_FROM_EPPN => self.fallbacks.mail_from_eppn.into(),
            keys::USER_LOGIN_ATTRIBUTE => names.login.clone().into(),
            keys::USER_EMAIL_ATTRIBUTE => names.email.clone().into(),
            keys::DISPLAY_NAME_ATTRIBUTE => names.display_name.clone().into(),
            keys::FIRST_NAME_ATTRIBUTE => names.given_name.clone().into(),
            keys::LAST_NAME_ATTRIBUTE => names.family_name.clone().into(),
            keys::ENTITY_ID => self.sso.entity_id.clone().into(),
            keys::IDP => self.sso.idp.clone().into(),
            keys::SP_CERT_FILE => self.sso.sp_cert_file.clone().into(),
            keys::SP_KEY_FILE => self.sso.sp_key_file.clone().into(),
            keys::PERMIT_PASSWORD_LOGIN => self.sso.permit_password_login.into(),
            keys::LOGIN_TITLE => self.sso.login_title.clone().into(),
            _ => value,
        }
    }
}

fn validate_aliases(aliases: &[AliasConfig]) -> Result<(), ConfigError> {
    for (index, entry) in aliases.iter().enumerate() {
        let canonical = entry.canonical.trim();
        if canonical.is_empty() {
            return Err(ConfigError::Validation(format!(
                "aliases[{}].canonical must not be empty",
                index
            )));
        }
        if is_reserved(canonical) {
            return Err(ConfigError::Validation(format!(
                "aliases.{} is reserved for mapping results",
                canonical
            )));
        }
        if entry.alternates.iter().all(|alt| alt.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "aliases.{} must list at least one alternate name",
                canonical
            )));
        }
        if aliases[..index].iter().any(|e| e.canonical.trim() == canonical) {
            return Err(ConfigError::Validation(format!(
                "aliases.{} is defined more than once",
                canonical
            )));
        }
    }
    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Invalid directive for {attribute} = \"{value}\": {source}")]
    Directive {
        attribute: String,
        value: String,
        #[source]
        source: DirectiveError,
    },
}

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_RE.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };
            if comment_pos.is_some_and(|pos| whole.start() >= pos) {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

/// Commented starter configuration written by `rolemap init`.
pub const STARTER_CONFIG: &str = r#"# rolemap configuration

[sso]
# entity_id = "https://www.example.edu"
# idp = "itlab"
# sp_cert_file = "${SP_CERT_FILE}"
# sp_key_file = "${SP_KEY_FILE}"
permit_password_login = false
login_title = "Use Single Sign-On:"

[mapping]
# Refuse logins that no rule maps (and no default_user catches).
deny_unmapped_users = false
# default_user = "guest"
user_precedence = "last"

# Legacy group mapping on a single attribute.
group_attribute = "eduPersonEntitlement"
# groups_to_roles = { "itlab:staff" = "editor" }
# groups_to_users = { "itlab:faculty" = "general-user" }

# Rules are evaluated in the order written. A directive is
# "role:NAME", "user:LOGIN", "eppn:LOGIN" or a bare role NAME.
[[mapping.attribute_map]]
attribute = "entitlement"
rules = [
  { value = "itlab:staff", directive = "role:administrator" },
]

[fallbacks]
eppn_from_principal_name = true
mail_from_eppn = true

[attribute_names]
login = "eppn"
email = "mail"
display_name = "displayName"
given_name = "givenName"
family_name = "sn"

[observability.logging]
level = "info"
format = "compact"

[observability.metrics]
enabled = false
"#;

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;
    use crate::{mapping::Directive, options::Options};

    #[test]
    fn test_empty_config() {
        let config = RolemapConfig::from_str("").unwrap();
        assert!(!config.mapping.deny_unmapped_users);
        assert!(config.aliases.is_none());
        assert_eq!(config.attribute_names, AttributeNames::default());
    }

    #[test]
    fn test_starter_config_parses() {
        let config = RolemapConfig::from_str(STARTER_CONFIG).unwrap();
        assert_eq!(config.mapping.table().rule_count(), 1);
        assert_eq!(config.sso.login_title.as_deref(), Some("Use Single Sign-On:"));
        assert!(!config.observability.metrics.enabled);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RolemapConfig::from_str(
            r#"
            [mapping]
            deny_unmaped_users = true
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_directive_prefix_rejected() {
        let err = RolemapConfig::from_str(
            r#"
            [[mapping.attribute_map]]
            attribute = "entitlement"
            rules = [{ value = "itlab:staff", directive = "rol:administrator" }]
        "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Directive { source, .. } => assert_eq!(
                source,
                DirectiveError::UnknownPrefix {
                    prefix: "rol".into()
                }
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[case::no_alternates("canonical = \"eppn\"\nalternates = []", "aliases.eppn")]
    #[case::marker_name("canonical = \"mapped_by\"\nalternates = [\"x\"]", "reserved")]
    #[case::role_name("canonical = \"role\"\nalternates = [\"memberOf\"]", "reserved")]
    fn test_invalid_alias_entry_rejected(#[case] entry: &str, #[case] expected: &str) {
        let err = RolemapConfig::from_str(&format!("[[aliases]]\n{entry}\n")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn test_repeated_alias_rejected() {
        let err = RolemapConfig::from_str(
            r#"
            [[aliases]]
            canonical = "uid"
            alternates = ["a"]

            [[aliases]]
            canonical = "uid"
            alternates = ["b"]
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_aliases_keep_definition_order() {
        let config = RolemapConfig::from_str(
            r#"
            [[aliases]]
            canonical = "uid"
            alternates = ["urn:oid:0.9.2342.19200300.100.1.1"]

            [[aliases]]
            canonical = "eppn"
            alternates = ["uid"]
        "#,
        )
        .unwrap();
        let table = Options::new()
            .with_override(config)
            .get_aliases(keys::ALIASES)
            .unwrap();

        let names: Vec<_> = table.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["uid", "eppn"]);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [mapping]
            default_user = "guest"
        "#
        )
        .unwrap();

        let config = RolemapConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mapping.default_user.as_deref(), Some("guest"));
    }

    #[test]
    fn test_from_missing_file() {
        let err = RolemapConfig::from_file("/nonexistent/rolemap.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn test_config_as_override_provider() {
        let config = RolemapConfig::from_str(
            r#"
            [sso]
            entity_id = "https://wp.example.edu"

            [mapping]
            deny_unmapped_users = true
            groups_to_roles = { "staff" = "editor" }

            [[mapping.attribute_map]]
            attribute = "entitlement"
            rules = [{ value = "itlab:staff", directive = "administrator" }]

            [attribute_names]
            display_name = "cn"
        "#,
        )
        .unwrap();
        let options = Options::new().with_override(config);

        assert!(options.get_bool(keys::DENY_UNMAPPED_USERS).unwrap());
        assert_eq!(
            options.get_text(keys::ENTITY_ID).unwrap().as_deref(),
            Some("https://wp.example.edu")
        );
        assert_eq!(
            options.get_text(keys::DISPLAY_NAME_ATTRIBUTE).unwrap().as_deref(),
            Some("cn")
        );
        assert_eq!(
            options.get_map(keys::GROUPS_TO_ROLES).unwrap(),
            vec![("staff".to_string(), "editor".to_string())]
        );
        let table = options.get_attribute_map(keys::ATTRIBUTE_MAP).unwrap();
        assert_eq!(
            table.attributes()[0].rules[0].1,
            Directive::Role("administrator".into())
        );
        // Unset aliases fall through to the built-in table.
        assert_eq!(
            options.get_aliases(keys::ALIASES).unwrap(),
            AliasTable::eduperson()
        );
        // Unknown options pass through.
        assert!(options.get_option("no_such_option").is_null());
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_SP_KEY", Some("/etc/sso/sp.key"), || {
            let result = expand_env_vars("sp_key_file = \"${TEST_SP_KEY}\"").unwrap();
            assert_eq!(result, "sp_key_file = \"/etc/sso/sp.key\"");
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# sp_key_file = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# sp_key_file = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("idp = \"itlab\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "idp = \"itlab\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_missing_env_var() {
        temp_env::with_var_unset("ROLEMAP_TEST_UNSET", || {
            let err = RolemapConfig::from_str("[sso]\nidp = \"${ROLEMAP_TEST_UNSET}\"")
                .unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "ROLEMAP_TEST_UNSET"));
        });
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }
}
