use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Settings handed through to the SAML protocol engine.
///
/// Certificate and key paths are opaque here; they are only checked for
/// existence by [`SsoConfig::check_key_material`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SsoConfig {
    /// Service provider entity ID.
    #[serde(default)]
    pub entity_id: Option<String>,

    /// Identity provider selector understood by the protocol engine.
    #[serde(default)]
    pub idp: Option<String>,

    /// Path to the SP certificate (PEM).
    #[serde(default)]
    pub sp_cert_file: Option<String>,

    /// Path to the SP private key (PEM).
    #[serde(default)]
    pub sp_key_file: Option<String>,

    /// Keep the local username/password form available alongside SSO.
    #[serde(default)]
    pub permit_password_login: bool,

    /// Title shown above the SSO button on the login form.
    #[serde(default)]
    pub login_title: Option<String>,
}

impl SsoConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("sso.entity_id", &self.entity_id),
            ("sso.idp", &self.idp),
            ("sso.sp_cert_file", &self.sp_cert_file),
            ("sso.sp_key_file", &self.sp_key_file),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "{} must not be empty when set",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Verify that configured certificate and key files exist.
    pub fn check_key_material(&self) -> Result<(), ConfigError> {
        check_files(self.sp_cert_file.as_deref(), self.sp_key_file.as_deref())
    }
}

/// Shared by config checks and activation.
pub(crate) fn check_files(cert: Option<&str>, key: Option<&str>) -> Result<(), ConfigError> {
    for (label, path) in [("certificate", cert), ("private key", key)] {
        if let Some(path) = path
            && !Path::new(path).is_file()
        {
            return Err(ConfigError::Validation(format!(
                "SP {} file not found: {}",
                label, path
            )));
        }
    }
    Ok(())
}
