//! Identity-attribute reconciliation for federated single sign-on.
//!
//! Given the attributes an identity provider asserts about a subject, this
//! crate decides which local account the subject maps to, which roles that
//! account should hold, and whether the login is refused when nothing maps.
//!
//! The login path is a chain of pure functions over one [`AttributeSet`]:
//!
//! ```text
//! raw attributes → alias::resolve → mapping::evaluate → gate::decide
//!                                                     → reconcile::reconcile
//! ```
//!
//! [`Settings`] holds the immutable tables they consult, compiled once from
//! the [`Options`] configuration surface. [`hooks::Integration`] wires the
//! chain to a host's extension points and an [`store::AccountStore`].
//!
//! # Example
//!
//! ```
//! use rolemap::{
//!     AttributeSet, MappingOutcome, Options, Settings, alias,
//!     mapping::{self, Directive, MappingTable},
//! };
//!
//! let mut settings = Settings::from_options(&Options::new()).unwrap();
//! settings.mapping = MappingTable::new().with_rule(
//!     "entitlement",
//!     "itlab:staff",
//!     Directive::Role("administrator".into()),
//! );
//!
//! let mut attrs: AttributeSet = [("eduPersonEntitlement", vec!["itlab:staff"])]
//!     .into_iter()
//!     .collect();
//! alias::resolve(&mut attrs, &settings.aliases, settings.fallbacks);
//! let outcome = mapping::evaluate(&mut attrs, &settings.mapping, &settings.policy);
//!
//! assert_eq!(outcome, MappingOutcome::Roles(vec!["administrator".into()]));
//! ```

pub mod alias;
pub mod attributes;
pub mod config;
pub mod gate;
pub mod hooks;
pub mod mapping;
pub mod observability;
pub mod options;
pub mod pipeline;
pub mod reconcile;
pub mod settings;
pub mod store;

#[cfg(test)]
mod tests;

pub use attributes::AttributeSet;
pub use gate::AuthDenied;
pub use mapping::{Directive, MappingOutcome, MappingTable};
pub use options::{OptionOverride, OptionValue, Options};
pub use settings::Settings;
