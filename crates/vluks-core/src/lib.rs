//! Core building blocks shared by the vluks binaries.
//!
//! Configuration, header/crypttab parsing, keyfile handling and the add-key /
//! create-keyfile workflows live here so the provider crates only have to
//! talk to their external systems.

pub mod config;
pub mod crypttab;
pub mod error;
pub mod header;
pub mod keyfile;
pub mod logging;
pub mod provider;
pub mod slot;
pub mod token;
pub mod workflow;

pub use config::{LuksCfg, VaultCfg, VluksConfig};
pub use crypttab::{eligible_devices, parse_crypttab, read_crypttab, CrypttabEntry};
pub use error::{ErrorScope, VluksError, VluksResult};
pub use header::{read_header, LuksHeader};
pub use slot::{parse_slot_confirmation, CryptsetupConfirmation, SlotConfirmation};
pub use token::{locate_wrapped_key, VluksToken, VLUKS_TOKEN_TYPE};
