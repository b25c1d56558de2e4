//! Cross-module scenario tests.
//!
//! These drive a full login (alias resolution, mapping, gate, provisioning
//! and reconciliation) through [`crate::pipeline::login`] against an
//! in-memory account store.

mod login_flow;
