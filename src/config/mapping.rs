use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ConfigError;
use crate::mapping::{Directive, MappingTable, UserPrecedence, is_reserved};

/// Role/user mapping configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Refuse authentication for subjects no rule (and no default user) maps.
    #[serde(default)]
    pub deny_unmapped_users: bool,

    /// Local login assigned when no rule matches.
    #[serde(default)]
    pub default_user: Option<String>,

    /// Which user directive wins when several match.
    #[serde(default)]
    pub user_precedence: UserPrecedence,

    /// Attribute consulted by `groups_to_roles` / `groups_to_users`.
    #[serde(default = "default_group_attribute")]
    pub group_attribute: String,

    /// Legacy group → role mapping. Evaluated after `attribute_map`.
    #[serde(default)]
    pub groups_to_roles: BTreeMap<String, String>,

    /// Legacy group → local login mapping. Wins over `groups_to_roles`
    /// for the same group.
    #[serde(default)]
    pub groups_to_users: BTreeMap<String, String>,

    /// Ordered rules. An array of tables so definition order survives.
    #[serde(default)]
    #[validate(nested)]
    pub attribute_map: Vec<AttributeRulesConfig>,

    #[serde(skip)]
    compiled: MappingTable,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            deny_unmapped_users: false,
            default_user: None,
            user_precedence: UserPrecedence::default(),
            group_attribute: default_group_attribute(),
            groups_to_roles: BTreeMap::new(),
            groups_to_users: BTreeMap::new(),
            attribute_map: Vec::new(),
            compiled: MappingTable::new(),
        }
    }
}

fn default_group_attribute() -> String {
    "eduPersonEntitlement".to_string()
}

/// Rules for a single IdP attribute.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct AttributeRulesConfig {
    /// Canonical attribute name, e.g. `entitlement`.
    #[validate(length(min = 1))]
    pub attribute: String,

    #[validate(nested)]
    pub rules: Vec<RuleConfig>,
}

/// `value` → `[role:|user:|eppn:]name`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[validate(length(min = 1))]
    pub value: String,
    pub directive: String,
}

impl MappingConfig {
    /// Validate and parse every directive into the compiled table.
    pub(crate) fn compile(&mut self) -> Result<(), ConfigError> {
        Validate::validate(self).map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.group_attribute.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mapping.group_attribute must not be empty".into(),
            ));
        }
        for (section, map) in [
            ("groups_to_roles", &self.groups_to_roles),
            ("groups_to_users", &self.groups_to_users),
        ] {
            if let Some((group, _)) = map.iter().find(|(_, v)| v.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "mapping.{}.\"{}\" must not be empty",
                    section, group
                )));
            }
        }

        if let Some(attribute) = std::iter::once(&self.group_attribute)
            .chain(self.attribute_map.iter().map(|entry| &entry.attribute))
            .find(|name| is_reserved(name.trim()))
        {
            return Err(ConfigError::Validation(format!(
                "mapping rules cannot match on '{}': it is reserved for mapping results",
                attribute
            )));
        }

        let mut table = MappingTable::new();
        for entry in &self.attribute_map {
            for rule in &entry.rules {
                let directive: Directive =
                    rule.directive
                        .parse()
                        .map_err(|source| ConfigError::Directive {
                            attribute: entry.attribute.clone(),
                            value: rule.value.clone(),
                            source,
                        })?;
                table.push(&entry.attribute, rule.value.as_str(), directive);
            }
        }

        tracing::debug!(
            attributes = table.attributes().len(),
            rules = table.rule_count(),
            "Compiled attribute map"
        );
        self.compiled = table;
        Ok(())
    }

    /// The parsed `attribute_map`, without legacy group rules.
    pub fn table(&self) -> &MappingTable {
        &self.compiled
    }
}
