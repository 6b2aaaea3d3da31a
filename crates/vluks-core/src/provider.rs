//! Provider contracts used by `vluks-core` workflows.
//!
//! Concrete implementations live in `vluks-vault` and `vluks-luks`; the
//! traits themselves come from `vluks-provider`.

pub use vluks_provider::{KeyIssuer, LuksTool, MintedKey};
