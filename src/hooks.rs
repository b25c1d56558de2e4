//! Host adapter.
//!
//! [`AuthHooks`] lists the extension points a host's SSO login flow calls
//! into, in the order it calls them:
//!
//! 1. [`fix_attributes`](AuthHooks::fix_attributes) after the protocol engine
//!    decodes the assertion
//! 2. [`pre_authenticate`](AuthHooks::pre_authenticate) before any account
//!    lookup or provisioning
//! 3. [`insert_user`](AuthHooks::insert_user) when a new account is about to
//!    be created
//! 4. [`user_authenticated`](AuthHooks::user_authenticated) once the local
//!    account exists
//!
//! plus two filters the host consults while rendering and configuring the
//! protocol engine. [`Integration`] implements them on top of [`Settings`]
//! and an [`AccountStore`](crate::store::AccountStore).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    alias,
    attributes::AttributeSet,
    config,
    gate::{self, AuthDenied},
    mapping::{self, MappedBy, MappingOutcome, ROLE_ATTRIBUTE},
    observability::metrics,
    options::{OptionValue, Options, keys},
    reconcile::{self, Account, AccountUpdate},
    settings::Settings,
    store::{ProvisioningParams, SharedAccountStore, StoreResult},
};

/// Protocol-engine option: create local accounts on first login.
pub const AUTO_PROVISION: &str = "auto_provision";
/// Protocol-engine option: how the engine looks up existing accounts.
pub const GET_USER_BY: &str = "get_user_by";
/// Login form string replaced by [`AuthHooks::login_strings`].
pub const LOGIN_TITLE_STRING: &str = "title";

/// What reconciliation did for one login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reconciliation {
    /// A combined update was written to the account store.
    Updated { update: AccountUpdate },
    /// Role-mapped, but the account already matched the IdP.
    Unchanged,
    /// Not role-mapped; the account was left alone.
    Skipped,
}

impl Reconciliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reconciliation::Updated { .. } => "updated",
            Reconciliation::Unchanged => "unchanged",
            Reconciliation::Skipped => "skipped",
        }
    }
}

/// Named extension points registered with the host.
#[async_trait]
pub trait AuthHooks: Send + Sync {
    /// Resolve aliases and evaluate the mapping rules, recording the result
    /// in `attrs`.
    fn fix_attributes(&self, attrs: &mut AttributeSet) -> MappingOutcome;

    /// Decide whether authentication may proceed.
    fn pre_authenticate(&self, attrs: &AttributeSet) -> Result<(), AuthDenied>;

    /// Adjust provisioning parameters before a new account is created.
    fn insert_user(&self, params: &mut ProvisioningParams, attrs: &AttributeSet);

    /// Bring an existing or freshly provisioned account in line with the IdP.
    async fn user_authenticated(
        &self,
        account: &Account,
        attrs: &AttributeSet,
    ) -> StoreResult<Reconciliation>;

    /// Filter a protocol-engine option value.
    fn engine_option(&self, name: &str, value: OptionValue) -> OptionValue;

    /// Filter the strings shown on the login form.
    fn login_strings(&self, strings: &mut BTreeMap<String, String>);
}

/// The identity-attribute layer wired to an account store.
pub struct Integration {
    settings: Settings,
    store: SharedAccountStore,
}

impl Integration {
    pub fn new(settings: Settings, store: SharedAccountStore) -> Self {
        Self { settings, store }
    }

    /// Run the activation checks and build the integration if they pass.
    ///
    /// Any error-level notice disables single sign-on for the whole site: no
    /// integration is returned, so no extension point gets registered.
    pub fn activate(
        options: &Options,
        store: SharedAccountStore,
        host: &HostEnvironment,
    ) -> Activation {
        let mut notices = Vec::new();

        if !host.engine_available {
            notices.push(AdminNotice::error(
                "The SAML protocol engine is not available. Install and enable it to use \
                 single sign-on.",
            ));
        }

        if host.require_override && !options.has_override() {
            notices.push(AdminNotice::error(
                "No configuration override is registered. Single sign-on needs a site \
                 configuration providing the IdP, certificates and mapping rules.",
            ));
        }

        let settings = match Settings::from_options(options) {
            Ok(settings) => Some(settings),
            Err(e) => {
                notices.push(AdminNotice::error(format!(
                    "Single sign-on configuration is invalid: {}",
                    e
                )));
                None
            }
        };

        if let Some(settings) = &settings
            && let Err(e) = config::check_files(
                settings.engine.sp_cert_file.as_deref(),
                settings.engine.sp_key_file.as_deref(),
            )
        {
            notices.push(AdminNotice::error(e.to_string()));
        }

        if let Some(settings) = &settings
            && settings.deny_unmapped_users
            && settings.mapping.is_empty()
            && settings.policy.default_user.is_none()
        {
            notices.push(AdminNotice::warning(
                "Unmapped users are denied but no mapping rules or default user are \
                 configured. Every single sign-on login will be refused.",
            ));
        }

        for notice in &notices {
            tracing::warn!(
                level = ?notice.level,
                message = %notice.message,
                "Single sign-on activation notice"
            );
        }

        let blocked = notices.iter().any(|n| n.level == NoticeLevel::Error);
        let integration = match settings {
            Some(settings) if !blocked => {
                tracing::info!("Single sign-on enabled");
                Some(Integration::new(settings, store))
            }
            _ => None,
        };

        Activation {
            integration,
            notices,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &SharedAccountStore {
        &self.store
    }
}

#[async_trait]
impl AuthHooks for Integration {
    fn fix_attributes(&self, attrs: &mut AttributeSet) -> MappingOutcome {
        let settings = &self.settings;
        alias::resolve(attrs, &settings.aliases, settings.fallbacks);
        let outcome = mapping::evaluate(attrs, &settings.mapping, &settings.policy);

        metrics::record_mapping_outcome(outcome.kind());
        tracing::info!(
            outcome = outcome.kind(),
            role_count = match &outcome {
                MappingOutcome::Roles(roles) => roles.len(),
                _ => 0,
            },
            "Attributes mapped"
        );
        outcome
    }

    fn pre_authenticate(&self, attrs: &AttributeSet) -> Result<(), AuthDenied> {
        gate::decide(attrs, self.settings.deny_unmapped_users)
    }

    fn insert_user(&self, params: &mut ProvisioningParams, attrs: &AttributeSet) {
        if MappedBy::from_attributes(attrs) != Some(MappedBy::Role) {
            return;
        }
        if let Some(role) = attrs.first(ROLE_ATTRIBUTE) {
            tracing::debug!(login = %params.login, role = %role, "Provisioning with initial role");
            params.role = Some(role.to_string());
        }
    }

    async fn user_authenticated(
        &self,
        account: &Account,
        attrs: &AttributeSet,
    ) -> StoreResult<Reconciliation> {
        let Some(update) = reconcile::reconcile(account, attrs, &self.settings.names) else {
            metrics::record_reconciliation("skipped");
            return Ok(Reconciliation::Skipped);
        };

        if update.is_noop() {
            tracing::debug!(login = %update.login, "Account already in sync");
            metrics::record_reconciliation("unchanged");
            return Ok(Reconciliation::Unchanged);
        }

        if let Err(e) = self
            .store
            .update_account(&update.login, &update.roles, &update.profile)
            .await
        {
            tracing::error!(login = %update.login, error = %e, "Account update failed");
            metrics::record_reconciliation("error");
            return Err(e);
        }

        tracing::info!(
            login = %update.login,
            role_count = update.roles.len(),
            roles_changed = update.roles_changed,
            profile_changed = !update.profile.is_empty(),
            "Account reconciled"
        );
        metrics::record_reconciliation("updated");
        Ok(Reconciliation::Updated { update })
    }

    fn engine_option(&self, name: &str, value: OptionValue) -> OptionValue {
        let engine = &self.settings.engine;
        let names = &self.settings.names;

        match name {
            AUTO_PROVISION => true.into(),
            GET_USER_BY => "login".into(),
            keys::PERMIT_PASSWORD_LOGIN => engine.permit_password_login.into(),
            keys::USER_LOGIN_ATTRIBUTE => names.login.clone().into(),
            keys::USER_EMAIL_ATTRIBUTE => names.email.clone().into(),
            keys::DISPLAY_NAME_ATTRIBUTE => names.display_name.clone().into(),
            keys::FIRST_NAME_ATTRIBUTE => names.given_name.clone().into(),
            keys::LAST_NAME_ATTRIBUTE => names.family_name.clone().into(),
            keys::ENTITY_ID => text_or(&engine.entity_id, value),
            keys::IDP => text_or(&engine.idp, value),
            keys::SP_CERT_FILE => text_or(&engine.sp_cert_file, value),
            keys::SP_KEY_FILE => text_or(&engine.sp_key_file, value),
            _ => value,
        }
    }

    fn login_strings(&self, strings: &mut BTreeMap<String, String>) {
        if let Some(title) = &self.settings.engine.login_title {
            strings.insert(LOGIN_TITLE_STRING.to_string(), title.clone());
        }
    }
}

fn text_or(configured: &Option<String>, fallback: OptionValue) -> OptionValue {
    configured.clone().map_or(fallback, OptionValue::Text)
}

/// What the host reports about itself at activation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostEnvironment {
    /// The SAML protocol engine is installed and loadable.
    pub engine_available: bool,
    /// This deployment must be configured through an override provider.
    pub require_override: bool,
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self {
            engine_available: true,
            require_override: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Error,
    Warning,
}

/// Message surfaced to the site operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminNotice {
    pub level: NoticeLevel,
    pub message: String,
}

impl AdminNotice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }
}

/// Result of [`Integration::activate`].
pub struct Activation {
    /// `None` when single sign-on is disabled.
    pub integration: Option<Integration>,
    pub notices: Vec<AdminNotice>,
}

impl Activation {
    pub fn is_enabled(&self) -> bool {
        self.integration.is_some()
    }
}
