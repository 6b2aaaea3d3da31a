//! Contract for the external disk-encryption tool.
//!
//! Only two operations are needed: attach a key slot from a keyfile, and
//! import a JSON token into the header. Interpreting the tool's output is the
//! caller's job so the parsing strategy can change independently.

use std::error::Error;
use std::path::Path;

/// Abstraction over `cryptsetup`-style key-slot and token commands.
pub trait LuksTool {
    type Error: Error + Send + Sync + 'static;

    /// Add a key slot on `device` unlocked by the contents of `keyfile`.
    ///
    /// The tool may prompt the operator for an existing passphrase. On a zero
    /// exit the combined stdout/stderr transcript is returned for inspection.
    fn add_key(&self, device: &str, keyfile: &Path) -> Result<String, Self::Error>;

    /// Import a serialized token document into the header of `device`.
    fn import_token(&self, device: &str, token_json: &[u8]) -> Result<(), Self::Error>;
}
