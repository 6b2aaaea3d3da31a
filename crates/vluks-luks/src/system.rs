//! Host-backed `LuksTool` implementation.

use crate::command::CryptsetupCommand;
use log::debug;
use std::env;
use std::path::{Path, PathBuf};
use vluks_core::config::VluksConfig;
use vluks_core::error::{VluksError, VluksResult};
use vluks_provider::LuksTool;

/// Locations probed for `cryptsetup` before falling back to `PATH`.
pub const DEFAULT_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
    "/sbin/cryptsetup",
    "/bin/cryptsetup",
    "/usr/local/sbin/cryptsetup",
];

/// Drives the host `cryptsetup` binary.
#[derive(Debug, Clone)]
pub struct SystemLuksTool {
    cryptsetup: CryptsetupCommand,
}

impl SystemLuksTool {
    /// Resolve `cryptsetup` from `[luks] cryptsetup_path`, the usual sbin
    /// locations, then `PATH`.
    pub fn from_config(config: &VluksConfig) -> VluksResult<Self> {
        let binary = resolve_cryptsetup_path(config)?;
        debug!("using cryptsetup at {}", binary.display());
        Ok(Self {
            cryptsetup: CryptsetupCommand::new(binary, config.luks_timeout()),
        })
    }

    pub fn binary(&self) -> &Path {
        self.cryptsetup.binary()
    }
}

impl LuksTool for SystemLuksTool {
    type Error = VluksError;

    fn add_key(&self, device: &str, keyfile: &Path) -> VluksResult<String> {
        self.cryptsetup.add_key(device, keyfile)
    }

    fn import_token(&self, device: &str, token_json: &[u8]) -> VluksResult<()> {
        self.cryptsetup.import_token(device, token_json)
    }
}

fn resolve_cryptsetup_path(config: &VluksConfig) -> VluksResult<PathBuf> {
    if let Some(path) = config
        .luks
        .cryptsetup_path
        .as_deref()
        .map(str::trim)
        .filter(|path| !path.is_empty())
    {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(VluksError::InvalidConfig(format!(
                "cryptsetup binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate.to_path_buf());
    }

    DEFAULT_CRYPTSETUP_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .or_else(|| find_in_path("cryptsetup"))
        .ok_or_else(|| {
            VluksError::InvalidConfig(format!(
                "unable to locate cryptsetup; tried {DEFAULT_CRYPTSETUP_PATHS:?} and PATH"
            ))
        })
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}
