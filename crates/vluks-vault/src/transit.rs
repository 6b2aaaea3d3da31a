//! Blocking HTTP client for the Vault transit secrets engine.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use vluks_core::config::VluksConfig;
use vluks_core::error::{VluksError, VluksResult};
use vluks_provider::{KeyIssuer, MintedKey};
use zeroize::Zeroizing;

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Transit engine client bound to one mount and one named key.
pub struct TransitIssuer {
    client: Client,
    address: String,
    token: Zeroizing<String>,
    namespace: Option<String>,
    mount: String,
    key: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct DatakeyData {
    ciphertext: String,
    plaintext: String,
}

#[derive(Deserialize)]
struct DecryptData {
    plaintext: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

impl TransitIssuer {
    /// Build a client from `[vault]` settings. Address and token are required.
    pub fn from_config(config: &VluksConfig) -> VluksResult<Self> {
        let vault = &config.vault;
        let address = vault
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                VluksError::InvalidConfig(
                    "vault.address is not set (config, VLUKS_VAULT_ADDRESS or VAULT_ADDR)".into(),
                )
            })?
            .trim_end_matches('/')
            .to_string();
        let token = vault
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                VluksError::InvalidConfig(
                    "vault.token is not set (config, VLUKS_VAULT_TOKEN or VAULT_TOKEN)".into(),
                )
            })?
            .to_string();

        let client = Client::builder()
            .timeout(config.vault_timeout())
            .build()
            .map_err(|err| VluksError::InvalidConfig(format!("unable to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            address,
            token: Zeroizing::new(token),
            namespace: vault.namespace.clone().filter(|ns| !ns.trim().is_empty()),
            mount: vault.mount.trim_matches('/').to_string(),
            key: vault.key.clone(),
        })
    }

    fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}/v1/{}/{}/{}",
            self.address, self.mount, operation, self.key
        )
    }

    fn post<T: DeserializeOwned>(&self, operation: &str, body: Value) -> VluksResult<T> {
        let url = self.endpoint(operation);
        debug!("POST {url}");

        let mut request = self
            .client
            .post(&url)
            .header(TOKEN_HEADER, self.token.as_str())
            .json(&body);
        if let Some(namespace) = &self.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }

        let response = request.send().map_err(|err| transport_error(&url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response));
        }

        let envelope: Envelope<T> = response.json().map_err(|err| VluksError::Remote {
            status: Some(status.as_u16()),
            message: format!("malformed response from {url}: {err}"),
        })?;
        Ok(envelope.data)
    }
}

impl fmt::Debug for TransitIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitIssuer")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("mount", &self.mount)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl KeyIssuer for TransitIssuer {
    type Error = VluksError;

    fn mint_key(&self, bits: u32) -> VluksResult<MintedKey> {
        let data: DatakeyData = self.post("datakey/plaintext", json!({ "bits": bits }))?;
        let encoded = Zeroizing::new(data.plaintext);
        let plaintext = decode_plaintext(&encoded)?;
        debug!("datakey issued ({} bytes)", plaintext.len());
        Ok(MintedKey {
            wrapped: data.ciphertext,
            plaintext,
        })
    }

    fn unwrap_key(&self, ciphertext: &str) -> VluksResult<Zeroizing<Vec<u8>>> {
        let data: DecryptData = self.post("decrypt", json!({ "ciphertext": ciphertext }))?;
        let encoded = Zeroizing::new(data.plaintext);
        decode_plaintext(&encoded)
    }
}

fn decode_plaintext(encoded: &str) -> VluksResult<Zeroizing<Vec<u8>>> {
    STANDARD
        .decode(encoded.trim())
        .map(Zeroizing::new)
        .map_err(|err| VluksError::Decode(format!("plaintext is not valid base64: {err}")))
}

fn transport_error(url: &str, err: reqwest::Error) -> VluksError {
    if err.is_timeout() {
        return VluksError::Timeout(format!("request to {url}"));
    }
    VluksError::Remote {
        status: None,
        message: format!("request to {url} failed: {err}"),
    }
}

fn status_error(status: StatusCode, response: Response) -> VluksError {
    let body = response.text().unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = if !parsed.errors.is_empty() {
        parsed.errors.join("; ")
    } else if !body.trim().is_empty() {
        body.trim().to_string()
    } else {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    };
    VluksError::Remote {
        status: Some(status.as_u16()),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_base64() {
        assert_eq!(&decode_plaintext("aGVsbG8=").unwrap()[..], b"hello");
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode_plaintext("not base64!"),
            Err(VluksError::Decode(_))
        ));
    }

    #[test]
    fn endpoint_normalises_slashes() {
        let mut config = VluksConfig::default();
        config.vault.address = Some("https://vault.local:8200/".into());
        config.vault.token = Some("s.token".into());
        config.vault.mount = "/transit/".into();
        let issuer = TransitIssuer::from_config(&config).unwrap();
        assert_eq!(
            issuer.endpoint("decrypt"),
            "https://vault.local:8200/v1/transit/decrypt/luks"
        );
    }

    #[test]
    fn debug_output_hides_token() {
        let mut config = VluksConfig::default();
        config.vault.address = Some("https://vault.local:8200".into());
        config.vault.token = Some("s.supersecret".into());
        let issuer = TransitIssuer::from_config(&config).unwrap();
        assert!(!format!("{issuer:?}").contains("supersecret"));
    }
}
