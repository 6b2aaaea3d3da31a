//! vluks command-line interface: Vault-wrapped LUKS key slots and keyfiles.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use vluks_core::{
    eligible_devices,
    logging::{self, LogFormat},
    read_crypttab,
    workflow::{self, BatchPolicy, WorkflowLevel, WorkflowReport},
    CrypttabEntry, VluksConfig,
};
use vluks_luks::SystemLuksTool;
use vluks_vault::TransitIssuer;

/// Top-level options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "vluks",
    version,
    about = "Enroll Vault-wrapped keys into LUKS2 devices and recover them as keyfiles."
)]
struct Cli {
    /// Configuration file (TOML or YAML). Searched in the usual locations when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit log records as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging.
    #[arg(short = 'v', long = "debug", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mint a data key, add it to a new key slot and record the wrapped copy as a token.
    AddKey {
        /// LUKS2 device (e.g. /dev/sda2).
        device: String,
    },

    /// Unwrap a device's vluks token and write the key to a keyfile.
    CreateKeyfile {
        /// LUKS2 device or header image.
        device: PathBuf,

        /// Keyfile destination; must not exist. Defaults to a fresh temporary file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write keyfiles for every crypttab device without a local keyfile.
    #[command(hide = true)]
    SystemdCryptsetup {
        /// crypttab to read instead of `[luks] crypttab_path`.
        #[arg(long)]
        crypttab: Option<PathBuf>,

        /// Directory for `<name>.key` files instead of `[luks] keyfile_dir`.
        #[arg(long)]
        keyfile_dir: Option<PathBuf>,

        /// Stop at the first device that fails.
        #[arg(long)]
        fail_fast: bool,
    },

    /// Show crypttab entries and which ones vluks would provision.
    ListDevices {
        /// crypttab to read instead of `[luks] crypttab_path`.
        #[arg(long)]
        crypttab: Option<PathBuf>,
    },

    /// Validate the configuration or emit its JSON schema.
    Validate {
        /// Output the JSON schema instead of validating.
        #[arg(long)]
        schema: bool,
    },

    /// Print version and build information.
    Version,
}

/// Entry point: the only place that turns an error into an exit status.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Plain
    };
    logging::init(if cli.debug { "debug" } else { "info" }, format);

    match cli.command {
        Commands::Version => {
            println!(
                "vluks {} (commit {})",
                env!("CARGO_PKG_VERSION"),
                option_env!("VLUKS_COMMIT").unwrap_or("unknown")
            );
            Ok(())
        }
        Commands::Validate { schema } => {
            if schema {
                let schema = schema_for!(VluksConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let config = load_config(cli.config.as_deref())?;
            let issues = config.validate();
            if !issues.is_empty() {
                eprintln!("Configuration validation failed:");
                for issue in &issues {
                    eprintln!("  - {issue}");
                }
                bail!("{} configuration issue(s)", issues.len());
            }
            println!(
                "Configuration valid (source: {}, transit {}/{}).",
                describe_source(&config),
                config.vault.mount,
                config.vault.key
            );
            Ok(())
        }
        Commands::ListDevices { crypttab } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(path) = crypttab {
                config.luks.crypttab_path = path.to_string_lossy().into_owned();
            }
            let entries = load_crypttab(&config)?;
            print_devices(&config, &entries);
            Ok(())
        }
        Commands::AddKey { device } => {
            let config = load_config(cli.config.as_deref())?;
            config.ensure_valid()?;
            let issuer = TransitIssuer::from_config(&config)?;
            let tool = SystemLuksTool::from_config(&config)?;

            let report = match workflow::add_key(&config, &issuer, &tool, &device) {
                Ok(report) => report,
                Err(err) => {
                    if err.left_partial_state() {
                        error!("{device} was modified before the failure; manual cleanup required");
                    }
                    return Err(err).with_context(|| format!("add-key failed for {device}"));
                }
            };
            print_report(report);
            Ok(())
        }
        Commands::CreateKeyfile { device, output } => {
            let config = load_config(cli.config.as_deref())?;
            config.ensure_valid()?;
            let issuer = TransitIssuer::from_config(&config)?;

            let scratch = config.scratch_dir();
            let path = workflow::create_keyfile(
                &issuer,
                &device,
                output.as_deref(),
                scratch.as_deref(),
            )
            .with_context(|| format!("create-keyfile failed for {}", device.display()))?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::SystemdCryptsetup {
            crypttab,
            keyfile_dir,
            fail_fast,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(path) = crypttab {
                config.luks.crypttab_path = path.to_string_lossy().into_owned();
            }
            if let Some(dir) = keyfile_dir {
                config.luks.keyfile_dir = dir.to_string_lossy().into_owned();
            }

            let entries = load_crypttab(&config)?;
            if eligible_devices(&entries).is_empty() {
                info!(
                    "no crypttab entries in {} need a vluks keyfile",
                    config.luks.crypttab_path
                );
                return Ok(());
            }

            config.ensure_valid()?;
            let issuer = TransitIssuer::from_config(&config)?;
            let policy = if fail_fast {
                BatchPolicy::AbortOnError
            } else {
                BatchPolicy::ContinueOnDeviceError
            };

            let report = workflow::provision_crypttab(&config, &issuer, &entries, policy)
                .context("batch keyfile provisioning aborted")?;
            let failures = report.failed().count();
            print_report(report.to_workflow_report());
            if failures > 0 {
                warn!("{failures} device(s) could not be provisioned");
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<VluksConfig> {
    VluksConfig::discover(path).with_context(|| match path {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })
}

fn load_crypttab(config: &VluksConfig) -> Result<Vec<CrypttabEntry>> {
    let path = config.crypttab_path();
    read_crypttab(&path).with_context(|| format!("failed to read crypttab {}", path.display()))
}

fn describe_source(config: &VluksConfig) -> String {
    config
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "defaults".to_string())
}

fn print_devices(config: &VluksConfig, entries: &[CrypttabEntry]) {
    if entries.is_empty() {
        println!("No entries in {}.", config.luks.crypttab_path);
        return;
    }
    println!("Entries in {}:", config.luks.crypttab_path);
    for entry in entries {
        let keyfile = if entry.keyfile.is_empty() {
            "-"
        } else {
            entry.keyfile.as_str()
        };
        if entry.is_remote_eligible() {
            println!(
                "  {} {} -> {}",
                entry.name,
                entry.device_path().display(),
                config.keyfile_path_for(&entry.name).display()
            );
        } else {
            println!(
                "  {} {} (local keyfile {keyfile}, skipped)",
                entry.name,
                entry.device_path().display()
            );
        }
    }
}

/// Pretty-print a workflow report so humans can follow along.
fn print_report(report: WorkflowReport) {
    println!("{}", report.title);
    for event in report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

fn level_tag(level: WorkflowLevel) -> &'static str {
    match level {
        WorkflowLevel::Info => "INFO",
        WorkflowLevel::Success => "OK",
        WorkflowLevel::Warn => "WARN",
        WorkflowLevel::Error => "ERR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "vluks",
            "create-keyfile",
            "/dev/sdb",
            "-o",
            "/run/keys/sdb.key",
            "--json",
            "-v",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(cli.debug);
        match cli.command {
            Commands::CreateKeyfile { device, output } => {
                assert_eq!(device, PathBuf::from("/dev/sdb"));
                assert_eq!(output, Some(PathBuf::from("/run/keys/sdb.key")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn hidden_batch_command_still_parses() {
        let cli = Cli::try_parse_from([
            "vluks",
            "systemd-cryptsetup",
            "--crypttab",
            "/tmp/crypttab",
            "--fail-fast",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::SystemdCryptsetup {
                fail_fast: true,
                keyfile_dir: None,
                ..
            }
        ));
    }
}
