#![forbid(unsafe_code)]

//! Vault transit engine integration.
//!
//! `TransitIssuer` implements the `KeyIssuer` contract over the transit
//! engine's `datakey/plaintext` and `decrypt` endpoints.

mod transit;

pub use transit::TransitIssuer;
