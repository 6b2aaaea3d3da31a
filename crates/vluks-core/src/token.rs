//! The `vluks` LUKS2 token: builder and locator.

use crate::error::{VluksError, VluksResult};
use crate::header::LuksHeader;
use log::warn;
use serde::Serialize;

/// Token `type` written to and searched for in LUKS2 headers.
pub const VLUKS_TOKEN_TYPE: &str = "vluks";

/// Token document imported with `cryptsetup token import`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VluksToken {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub keyslots: Vec<String>,
    pub ciphertext: String,
}

impl VluksToken {
    /// Bind `ciphertext` to a single key slot.
    pub fn new(slot: impl Into<String>, ciphertext: impl Into<String>) -> Self {
        Self {
            kind: VLUKS_TOKEN_TYPE,
            keyslots: vec![slot.into()],
            ciphertext: ciphertext.into(),
        }
    }

    /// Serialize to a newline-terminated JSON object.
    pub fn to_json(&self) -> VluksResult<Vec<u8>> {
        let mut payload = serde_json::to_vec(self)?;
        payload.push(b'\n');
        Ok(payload)
    }
}

/// Return the wrapped key recorded in `header`.
///
/// Tokens are scanned in document order and the first `vluks` token with a
/// non-empty ciphertext wins.
pub fn locate_wrapped_key(header: &LuksHeader) -> VluksResult<String> {
    let mut candidates = header
        .tokens
        .iter()
        .filter(|(_, token)| token.kind == VLUKS_TOKEN_TYPE)
        .filter_map(|(id, token)| {
            token
                .ciphertext
                .as_deref()
                .filter(|ciphertext| !ciphertext.is_empty())
                .map(|ciphertext| (id, ciphertext))
        });

    let Some((id, ciphertext)) = candidates.next() else {
        return Err(VluksError::TokenNotFound {
            device: header.source.clone(),
        });
    };

    let extra = candidates.count();
    if extra > 0 {
        warn!(
            "{} carries {} additional vluks token(s); using token {id}",
            header.source, extra
        );
    }
    Ok(ciphertext.to_string())
}
