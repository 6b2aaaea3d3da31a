//! Configuration model and helpers used by vluks.

use crate::error::{VluksError, VluksResult};
use directories_next::{BaseDirs, ProjectDirs};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CRYPTTAB_PATH: &str = "/etc/crypttab";
pub const DEFAULT_KEYFILE_DIR: &str = "/run/cryptsetup-keys.d";
const CONFIG_STEM: &str = "vluks";
const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "toml"];
const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "vluks";
const APP_NAME: &str = "vluks";
const SUPPORTED_KEY_BITS: &[u32] = &[128, 256, 512];

const ENV_VAULT_ADDRESS: &str = "VLUKS_VAULT_ADDRESS";
const ENV_VAULT_TOKEN: &str = "VLUKS_VAULT_TOKEN";
const ENV_VAULT_MOUNT: &str = "VLUKS_VAULT_MOUNT";
const ENV_VAULT_KEY: &str = "VLUKS_VAULT_KEY";
const ENV_VAULT_ADDR_FALLBACK: &str = "VAULT_ADDR";
const ENV_VAULT_TOKEN_FALLBACK: &str = "VAULT_TOKEN";
const ENV_VAULT_NAMESPACE_FALLBACK: &str = "VAULT_NAMESPACE";

/// Secrets engine coordinates and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VaultCfg {
    /// Base URL, e.g. `https://vault.example.com:8200`.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub namespace: Option<String>,

    /// Transit engine mount path.
    #[serde(default = "default_mount")]
    pub mount: String,

    /// Named transit key used to wrap LUKS keys.
    #[serde(default = "default_key")]
    pub key: String,

    #[serde(default = "default_bits")]
    pub bits: u32,

    #[serde(default = "default_vault_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_mount() -> String {
    "transit".to_string()
}

fn default_key() -> String {
    "luks".to_string()
}

fn default_bits() -> u32 {
    512
}

fn default_vault_timeout_secs() -> u64 {
    30
}

impl Default for VaultCfg {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            namespace: None,
            mount: default_mount(),
            key: default_key(),
            bits: default_bits(),
            timeout_secs: default_vault_timeout_secs(),
        }
    }
}

/// Host-side paths and `cryptsetup` tuning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LuksCfg {
    #[serde(default)]
    pub cryptsetup_path: Option<String>,

    #[serde(default = "default_crypttab_path")]
    pub crypttab_path: String,

    /// Directory receiving one `<name>.key` per provisioned crypttab entry.
    #[serde(default = "default_keyfile_dir")]
    pub keyfile_dir: String,

    /// Where ephemeral keyfiles are staged; defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<String>,

    /// Upper bound for a single `cryptsetup` invocation (add-key prompts included).
    #[serde(default = "default_luks_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_crypttab_path() -> String {
    DEFAULT_CRYPTTAB_PATH.to_string()
}

fn default_keyfile_dir() -> String {
    DEFAULT_KEYFILE_DIR.to_string()
}

fn default_luks_timeout_secs() -> u64 {
    300
}

impl Default for LuksCfg {
    fn default() -> Self {
        Self {
            cryptsetup_path: None,
            crypttab_path: default_crypttab_path(),
            keyfile_dir: default_keyfile_dir(),
            scratch_dir: None,
            timeout_secs: default_luks_timeout_secs(),
        }
    }
}

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VluksConfig {
    #[serde(default)]
    pub vault: VaultCfg,

    #[serde(default)]
    pub luks: LuksCfg,

    /// File this snapshot was read from; `None` when running on defaults.
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl VluksConfig {
    /// Candidate config locations, most specific first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(project) = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME) {
            dirs.push(project.config_dir().to_path_buf());
        }
        if let Some(base) = BaseDirs::new() {
            dirs.push(base.config_dir().to_path_buf());
        }
        dirs.push(PathBuf::from("/etc/vluks"));
        dirs.push(PathBuf::from("/etc"));
        dirs.dedup();

        dirs.iter()
            .flat_map(|dir| {
                CONFIG_EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(format!("{CONFIG_STEM}.{ext}")))
            })
            .collect()
    }

    /// Load from `explicit` when given, otherwise from the first search path
    /// that exists, otherwise fall back to defaults. Environment overrides are
    /// applied in every case.
    pub fn discover(explicit: Option<&Path>) -> VluksResult<Self> {
        let mut cfg = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::search_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => Self::load(&path)?,
                None => {
                    debug!("no vluks configuration file found; using defaults");
                    Self::default()
                }
            },
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Read a config file from disk, detecting TOML vs YAML by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> VluksResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = Self::parse(path, &contents)?;
        cfg.path = Some(path.to_path_buf());
        debug!("loaded configuration from {}", path.display());
        Ok(cfg)
    }

    fn parse(path: &Path, contents: &str) -> VluksResult<Self> {
        let is_toml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("toml")
        );
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg = if is_toml {
            toml::from_str::<Self>(contents)?
        } else {
            serde_yaml::from_str::<Self>(contents)?
        };
        Ok(cfg)
    }

    /// Layer environment variables over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_value(ENV_VAULT_ADDRESS) {
            self.vault.address = Some(value);
        }
        if let Some(value) = env_value(ENV_VAULT_TOKEN) {
            self.vault.token = Some(value);
        }
        if let Some(value) = env_value(ENV_VAULT_MOUNT) {
            self.vault.mount = value;
        }
        if let Some(value) = env_value(ENV_VAULT_KEY) {
            self.vault.key = value;
        }

        if self.vault.address.is_none() {
            self.vault.address = env_value(ENV_VAULT_ADDR_FALLBACK);
        }
        if self.vault.token.is_none() {
            self.vault.token = env_value(ENV_VAULT_TOKEN_FALLBACK);
        }
        if self.vault.namespace.is_none() {
            self.vault.namespace = env_value(ENV_VAULT_NAMESPACE_FALLBACK);
        }
    }

    /// Perform a best-effort validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.vault.mount.trim().trim_matches('/').is_empty() {
            issues.push("vault.mount must not be empty".to_string());
        }
        if self.vault.key.trim().is_empty() {
            issues.push("vault.key must not be empty".to_string());
        }
        if self.vault.key.contains('/') {
            issues.push(format!(
                "vault.key must be a single path segment (got `{}`)",
                self.vault.key
            ));
        }
        if !SUPPORTED_KEY_BITS.contains(&self.vault.bits) {
            issues.push(format!(
                "vault.bits must be one of {:?} (got {})",
                SUPPORTED_KEY_BITS, self.vault.bits
            ));
        }
        if self.vault.timeout_secs == 0 {
            issues.push("vault.timeout_secs must be greater than 0".to_string());
        }
        match self.vault.address.as_deref().map(str::trim) {
            None | Some("") => issues.push(
                "vault.address is not set (config, VLUKS_VAULT_ADDRESS or VAULT_ADDR)".to_string(),
            ),
            Some(address) if !address.starts_with("http://") && !address.starts_with("https://") => {
                issues.push(format!(
                    "vault.address must start with http:// or https:// (got `{address}`)"
                ))
            }
            Some(_) => {}
        }

        if !Path::new(&self.luks.keyfile_dir).is_absolute() {
            issues.push(format!(
                "luks.keyfile_dir must be an absolute path (got `{}`)",
                self.luks.keyfile_dir
            ));
        }
        if self.luks.crypttab_path.trim().is_empty() {
            issues.push("luks.crypttab_path must not be empty".to_string());
        }
        if self.luks.timeout_secs == 0 {
            issues.push("luks.timeout_secs must be greater than 0".to_string());
        }

        issues
    }

    /// Fail with `InvalidConfig` listing every issue found by [`validate`](Self::validate).
    pub fn ensure_valid(&self) -> VluksResult<()> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(VluksError::InvalidConfig(issues.join("; ")))
        }
    }

    pub fn vault_timeout(&self) -> Duration {
        Duration::from_secs(self.vault.timeout_secs)
    }

    pub fn luks_timeout(&self) -> Duration {
        Duration::from_secs(self.luks.timeout_secs)
    }

    pub fn crypttab_path(&self) -> PathBuf {
        PathBuf::from(&self.luks.crypttab_path)
    }

    pub fn keyfile_dir(&self) -> PathBuf {
        PathBuf::from(&self.luks.keyfile_dir)
    }

    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.luks
            .scratch_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }

    /// Persistent keyfile location for a crypttab mapping name.
    pub fn keyfile_path_for(&self, name: &str) -> PathBuf {
        self.keyfile_dir().join(format!("{name}.key"))
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: impl Into<String>) -> Self {
            let prev = env::var(key).ok();
            env::set_var(key, value.into());
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = env::var(key).ok();
            env::remove_var(key);
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(prev) = &self.prev {
                env::set_var(self.key, prev);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn clear_vault_env() -> Vec<EnvGuard> {
        [
            ENV_VAULT_ADDRESS,
            ENV_VAULT_TOKEN,
            ENV_VAULT_MOUNT,
            ENV_VAULT_KEY,
            ENV_VAULT_ADDR_FALLBACK,
            ENV_VAULT_TOKEN_FALLBACK,
            ENV_VAULT_NAMESPACE_FALLBACK,
        ]
        .into_iter()
        .map(EnvGuard::unset)
        .collect()
    }

    #[test]
    fn defaults_match_transit_conventions() {
        let cfg = VluksConfig::default();
        assert_eq!(cfg.vault.mount, "transit");
        assert_eq!(cfg.vault.key, "luks");
        assert_eq!(cfg.vault.bits, 512);
        assert_eq!(cfg.luks.keyfile_dir, DEFAULT_KEYFILE_DIR);
        assert_eq!(
            cfg.keyfile_path_for("cryptdata"),
            PathBuf::from("/run/cryptsetup-keys.d/cryptdata.key")
        );
    }

    #[test]
    fn loads_yaml_with_partial_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vluks.yaml");
        fs::write(
            &path,
            "vault:\n  address: https://vault.local:8200\n  key: disks\n",
        )
        .unwrap();

        let cfg = VluksConfig::load(&path).unwrap();
        assert_eq!(cfg.vault.address.as_deref(), Some("https://vault.local:8200"));
        assert_eq!(cfg.vault.key, "disks");
        assert_eq!(cfg.vault.mount, "transit");
        assert_eq!(cfg.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn loads_toml_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vluks.toml");
        fs::write(
            &path,
            "[vault]\nmount = \"kms\"\n\n[luks]\nkeyfile_dir = \"/run/keys\"\n",
        )
        .unwrap();

        let cfg = VluksConfig::load(&path).unwrap();
        assert_eq!(cfg.vault.mount, "kms");
        assert_eq!(cfg.luks.keyfile_dir, "/run/keys");
    }

    #[test]
    fn malformed_file_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vluks.toml");
        fs::write(&path, "[vault\nmount = ").unwrap();
        assert!(matches!(
            VluksConfig::load(&path),
            Err(VluksError::Format(_))
        ));
    }

    #[test]
    fn env_overrides_take_precedence_over_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_vault_env();
        let _addr = EnvGuard::set(ENV_VAULT_ADDRESS, "https://override:8200");
        let _token = EnvGuard::set(ENV_VAULT_TOKEN_FALLBACK, "s.fallback");

        let mut cfg = VluksConfig::default();
        cfg.vault.address = Some("https://file:8200".into());
        cfg.apply_env_overrides();

        assert_eq!(cfg.vault.address.as_deref(), Some("https://override:8200"));
        assert_eq!(cfg.vault.token.as_deref(), Some("s.fallback"));
    }

    #[test]
    fn conventional_vault_env_does_not_replace_configured_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _cleared = clear_vault_env();
        let _addr = EnvGuard::set(ENV_VAULT_ADDR_FALLBACK, "https://ambient:8200");

        let mut cfg = VluksConfig::default();
        cfg.vault.address = Some("https://file:8200".into());
        cfg.apply_env_overrides();
        assert_eq!(cfg.vault.address.as_deref(), Some("https://file:8200"));
    }

    #[test]
    fn validate_reports_each_problem() {
        let mut cfg = VluksConfig::default();
        cfg.vault.bits = 384;
        cfg.vault.mount = " ".into();
        cfg.luks.keyfile_dir = "relative/keys".into();

        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.contains("vault.bits")));
        assert!(issues.iter().any(|i| i.contains("vault.mount")));
        assert!(issues.iter().any(|i| i.contains("vault.address")));
        assert!(issues.iter().any(|i| i.contains("luks.keyfile_dir")));
        assert!(cfg.ensure_valid().is_err());
    }

    #[test]
    fn validate_accepts_complete_config() {
        let mut cfg = VluksConfig::default();
        cfg.vault.address = Some("http://127.0.0.1:8200".into());
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }
}
