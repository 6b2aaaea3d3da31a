//! Contract for the remote secrets engine that mints and unwraps key material.

use std::error::Error;
use std::fmt;
use zeroize::Zeroizing;

/// Freshly minted key returned by [`KeyIssuer::mint_key`].
pub struct MintedKey {
    /// Opaque wrapped form, safe to store in the LUKS header.
    pub wrapped: String,
    /// Raw key bytes, scrubbed from memory on drop.
    pub plaintext: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for MintedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintedKey")
            .field("wrapped", &"<redacted>")
            .field("plaintext_len", &self.plaintext.len())
            .finish()
    }
}

/// Abstraction over a transit-style secrets engine.
///
/// Implementations perform one synchronous request per call and never retry.
pub trait KeyIssuer {
    type Error: Error + Send + Sync + 'static;

    /// Ask the engine for a new random key of `bits` length.
    fn mint_key(&self, bits: u32) -> Result<MintedKey, Self::Error>;

    /// Send `ciphertext` back to the engine and return the raw key bytes.
    fn unwrap_key(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>, Self::Error>;
}

impl<T: KeyIssuer + ?Sized> KeyIssuer for &T {
    type Error = T::Error;

    fn mint_key(&self, bits: u32) -> Result<MintedKey, Self::Error> {
        (**self).mint_key(bits)
    }

    fn unwrap_key(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>, Self::Error> {
        (**self).unwrap_key(ciphertext)
    }
}
