//! Error types shared across vluks crates.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type VluksResult<T> = Result<T, VluksError>;

/// How far a failure reaches: one device's lifecycle, or the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Confined to a single device; batch provisioning may move on.
    Device,
    /// Every remaining device would fail the same way; abort.
    Process,
}

#[derive(Debug, Error)]
pub enum VluksError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("no vluks token with a ciphertext found in the header of {device}")]
    TokenNotFound { device: String },

    #[error("secrets engine request failed{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("unable to decode key material: {0}")]
    Decode(String),

    #[error("refusing to overwrite existing keyfile {}", .path.display())]
    AlreadyExists { path: PathBuf },

    #[error("permission denied preparing {}", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("encryption tool error: {0}")]
    Tool(String),

    #[error(
        "encryption tool exited cleanly on {device} but reported no new key slot; a slot may \
         have been added without a recorded wrapped key. Inspect it with `cryptsetup luksDump {device}` \
         and remove any unexpected slot (cryptsetup luksKillSlot {device} <slot>)"
    )]
    SlotNotConfirmed { device: String },

    #[error(
        "key slot {slot} was added to {device} but importing its vluks token failed: {reason}. \
         The slot has no recorded wrapped key; remove it manually (cryptsetup luksKillSlot {device} {slot}) and retry"
    )]
    TokenImportFailed {
        device: String,
        slot: String,
        reason: String,
    },

    #[error("{0} timed out")]
    Timeout(String),
}

impl VluksError {
    /// Classify this error for batch provisioning.
    pub fn scope(&self) -> ErrorScope {
        match self {
            // 4xx other than auth means the engine rejected this device's ciphertext.
            VluksError::Remote {
                status: Some(status),
                ..
            } if (400..500).contains(status) && !matches!(*status, 401 | 403) => {
                ErrorScope::Device
            }
            VluksError::Remote { .. }
            | VluksError::InvalidConfig(_)
            | VluksError::Timeout(_) => ErrorScope::Process,
            VluksError::Io(_)
            | VluksError::Format(_)
            | VluksError::TokenNotFound { .. }
            | VluksError::Decode(_)
            | VluksError::AlreadyExists { .. }
            | VluksError::PermissionDenied { .. }
            | VluksError::Tool(_)
            | VluksError::SlotNotConfirmed { .. }
            | VluksError::TokenImportFailed { .. } => ErrorScope::Device,
        }
    }

    /// Whether the device was modified before the failure occurred.
    pub fn left_partial_state(&self) -> bool {
        matches!(
            self,
            VluksError::TokenImportFailed { .. } | VluksError::SlotNotConfirmed { .. }
        )
    }
}

impl From<serde_json::Error> for VluksError {
    fn from(err: serde_json::Error) -> Self {
        VluksError::Format(err.to_string())
    }
}

impl From<toml::de::Error> for VluksError {
    fn from(err: toml::de::Error) -> Self {
        VluksError::Format(err.to_string())
    }
}

impl From<serde_yaml::Error> for VluksError {
    fn from(err: serde_yaml::Error) -> Self {
        VluksError::Format(err.to_string())
    }
}
