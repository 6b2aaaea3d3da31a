#![forbid(unsafe_code)]

//! `cryptsetup` driver for vluks.
//!
//! Adds key slots with the operator watching (passphrase prompt and verbose
//! output pass straight through) and imports token documents over stdin.

mod command;
mod system;

pub use system::{SystemLuksTool, DEFAULT_CRYPTSETUP_PATHS};
