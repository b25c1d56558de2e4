//! Reference login flow.
//!
//! Drives the [`AuthHooks`] in the order a protocol engine calls them:
//! fix attributes, gate, look up or provision the account, reconcile. Used
//! by the `evaluate` command and as the end-to-end path in tests.

use serde::Serialize;

use crate::{
    attributes::AttributeSet,
    gate::AuthDenied,
    hooks::{AuthHooks, Integration, Reconciliation},
    mapping::MappingOutcome,
    reconcile::{Account, Profile},
    store::{ProvisioningParams, StoreError},
};

/// Everything one login produced.
#[derive(Debug, Clone, Serialize)]
pub struct LoginReport {
    pub outcome: MappingOutcome,
    /// Attributes after alias resolution and mapping.
    pub attributes: AttributeSet,
    /// Whether the account was created by this login.
    pub provisioned: bool,
    pub reconciliation: Reconciliation,
    /// The account as stored after the login.
    pub account: Account,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error(transparent)]
    Denied(#[from] AuthDenied),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No '{0}' attribute to identify the local account")]
    MissingLogin(String),
}

impl LoginError {
    /// Stable code for denials, `None` for faults.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            LoginError::Denied(denied) => Some(denied.code()),
            _ => None,
        }
    }
}

/// Run one login for the asserted `attrs`.
///
/// Nothing is read from or written to the store before the access gate
/// passes.
pub async fn login(
    integration: &Integration,
    mut attrs: AttributeSet,
) -> Result<LoginReport, LoginError> {
    let outcome = integration.fix_attributes(&mut attrs);
    integration.pre_authenticate(&attrs)?;

    let names = &integration.settings().names;
    let login = attrs
        .first(&names.login)
        .ok_or_else(|| LoginError::MissingLogin(names.login.clone()))?
        .to_string();

    let store = integration.store();
    let (account, provisioned) = match store.get_account(&login).await? {
        Some(account) => (account, false),
        None => {
            let mut params = ProvisioningParams {
                login: login.clone(),
                profile: Profile::from_attributes(&attrs, names),
                role: None,
            };
            integration.insert_user(&mut params, &attrs);
            tracing::info!(login = %login, role = ?params.role, "Provisioning account");
            (store.create_account(params).await?, true)
        }
    };

    let reconciliation = integration.user_authenticated(&account, &attrs).await?;
    let account = match &reconciliation {
        Reconciliation::Updated { .. } => store
            .get_account(&login)
            .await?
            .ok_or_else(|| StoreError::NotFound(login.clone()))?,
        _ => account,
    };

    Ok(LoginReport {
        outcome,
        attributes: attrs,
        provisioned,
        reconciliation,
        account,
    })
}
