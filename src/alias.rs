//! Attribute alias resolution.
//!
//! IdPs assert the same attribute under different names: eduPerson OIDs
//! (`urn:oid:1.3.6.1.4.1.5923.1.1.1.6`), long-form LDAP names
//! (`eduPersonPrincipalName`) or short names (`eppn`). Resolution copies the
//! first alternate that is present onto its canonical short name so the rest
//! of the pipeline only ever looks at canonical names.

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeSet;

// OIDs from the eduPerson (202208) and inetOrgPerson schemas.
pub const EDU_PERSON_PRINCIPAL_NAME_OID: &str = "urn:oid:1.3.6.1.4.1.5923.1.1.1.6";
pub const EDU_PERSON_ENTITLEMENT_OID: &str = "urn:oid:1.3.6.1.4.1.5923.1.1.1.7";
pub const EDU_PERSON_AFFILIATION_OID: &str = "urn:oid:1.3.6.1.4.1.5923.1.1.1.1";
pub const EDU_PERSON_SCOPED_AFFILIATION_OID: &str = "urn:oid:1.3.6.1.4.1.5923.1.1.1.9";
pub const MAIL_OID: &str = "urn:oid:0.9.2342.19200300.100.1.3";
pub const UID_OID: &str = "urn:oid:0.9.2342.19200300.100.1.1";
pub const DISPLAY_NAME_OID: &str = "urn:oid:2.16.840.1.113730.3.1.241";
pub const GIVEN_NAME_OID: &str = "urn:oid:2.5.4.42";
pub const SURNAME_OID: &str = "urn:oid:2.5.4.4";

/// Canonical name of the principal name attribute.
pub const EPPN: &str = "eppn";
/// Canonical name of the mail attribute.
pub const MAIL: &str = "mail";
/// Long-form principal name consulted by the legacy `eppn` fallback.
pub const EDU_PERSON_PRINCIPAL_NAME: &str = "eduPersonPrincipalName";

/// Canonical attribute name → alternate names, consulted in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: Vec<(String, Vec<String>)>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The eduPerson/inetOrgPerson table used when no aliases are configured.
    pub fn eduperson() -> Self {
        Self::new()
            .with_alias(
                EPPN,
                [EDU_PERSON_PRINCIPAL_NAME, EDU_PERSON_PRINCIPAL_NAME_OID],
            )
            .with_alias(
                "entitlement",
                ["eduPersonEntitlement", EDU_PERSON_ENTITLEMENT_OID],
            )
            .with_alias(
                "affiliation",
                ["eduPersonAffiliation", EDU_PERSON_AFFILIATION_OID],
            )
            .with_alias(
                "scopedAffiliation",
                [
                    "eduPersonScopedAffiliation",
                    EDU_PERSON_SCOPED_AFFILIATION_OID,
                ],
            )
            .with_alias(MAIL, [MAIL_OID, "email"])
            .with_alias("uid", [UID_OID])
            .with_alias("displayName", [DISPLAY_NAME_OID])
            .with_alias("givenName", [GIVEN_NAME_OID])
            .with_alias("sn", [SURNAME_OID, "surname"])
    }

    /// Add alternates for `canonical`. Repeated calls extend the list.
    pub fn with_alias<I, S>(mut self, canonical: impl Into<String>, alternates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let canonical = canonical.into();
        let alternates = alternates.into_iter().map(Into::into);
        match self.entries.iter_mut().find(|(name, _)| *name == canonical) {
            Some((_, existing)) => existing.extend(alternates),
            None => self.entries.push((canonical, alternates.collect())),
        }
        self
    }

    pub fn alternates(&self, canonical: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == canonical)
            .map(|(_, alternates)| alternates.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, alternates)| (name.as_str(), alternates.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a table in iteration order. A repeated canonical name extends the
/// earlier entry, as [`AliasTable::with_alias`] does.
impl<C, I> FromIterator<(C, I)> for AliasTable
where
    C: Into<String>,
    I: IntoIterator,
    I::Item: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (C, I)>>(iter: T) -> Self {
        iter.into_iter()
            .fold(AliasTable::new(), |table, (canonical, alternates)| {
                table.with_alias(canonical, alternates)
            })
    }
}

/// Hardcoded compatibility fallbacks applied after the alias scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct Fallbacks {
    /// Copy `eduPersonPrincipalName` to `eppn` when `eppn` is still absent.
    #[serde(default = "default_true")]
    pub eppn_from_principal_name: bool,

    /// Copy `eppn` to `mail` when `mail` is still absent.
    #[serde(default = "default_true")]
    pub mail_from_eppn: bool,
}

impl Default for Fallbacks {
    fn default() -> Self {
        Self {
            eppn_from_principal_name: true,
            mail_from_eppn: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Fill in canonical attribute names from their alternates.
///
/// Canonical names already present are left untouched. A canonical name
/// whose alternates are all missing stays absent; absence is "no assertion",
/// never an error.
pub fn resolve(attrs: &mut AttributeSet, aliases: &AliasTable, fallbacks: Fallbacks) {
    for (canonical, alternates) in aliases.iter() {
        if attrs.contains(canonical) {
            continue;
        }
        let found = alternates
            .iter()
            .find_map(|alt| attrs.get(alt).map(|values| (alt, values.to_vec())));
        if let Some((alternate, values)) = found {
            tracing::debug!(
                canonical = %canonical,
                alternate = %alternate,
                "Resolved attribute alias"
            );
            attrs.insert(canonical, values);
        }
    }

    if fallbacks.eppn_from_principal_name
        && !attrs.contains(EPPN)
        && let Some(values) = attrs.get(EDU_PERSON_PRINCIPAL_NAME)
    {
        let values = values.to_vec();
        attrs.insert(EPPN, values);
    }

    if fallbacks.mail_from_eppn
        && !attrs.contains(MAIL)
        && let Some(values) = attrs.get(EPPN)
    {
        let values = values.to_vec();
        attrs.insert(MAIL, values);
    }
}
