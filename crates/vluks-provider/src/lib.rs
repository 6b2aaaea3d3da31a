#![forbid(unsafe_code)]

//! Provider contracts shared across vluks.
//!
//! Workflows in `vluks-core` are written against these traits so the secrets
//! engine and the disk-encryption tool can be swapped for fakes in tests.

pub mod issuer;
pub mod luks;

pub use issuer::{KeyIssuer, MintedKey};
pub use luks::LuksTool;
