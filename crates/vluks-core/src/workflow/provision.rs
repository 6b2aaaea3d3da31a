//! Batch keyfile provisioning for every eligible crypttab entry.

use super::create_keyfile::create_keyfile;
use super::{event, WorkflowLevel, WorkflowReport};
use crate::config::VluksConfig;
use crate::crypttab::{eligible_devices, CrypttabEntry};
use crate::error::{ErrorScope, VluksError, VluksResult};
use crate::provider::KeyIssuer;
use log::{debug, info, warn};
use std::path::PathBuf;

/// What to do when one device fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Log device-scoped failures and move on to the next device.
    #[default]
    ContinueOnDeviceError,
    /// Stop at the first failure of any kind.
    AbortOnError,
}

/// Result for a single crypttab entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResult {
    Provisioned { keyfile: PathBuf },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOutcome {
    pub name: String,
    pub device: PathBuf,
    pub result: DeviceResult,
}

/// Per-device results of a batch run.
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    pub outcomes: Vec<DeviceOutcome>,
    /// Names of entries skipped because they already use a local keyfile.
    pub skipped: Vec<String>,
}

impl ProvisionReport {
    pub fn provisioned(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, DeviceResult::Provisioned { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, DeviceResult::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    pub fn to_workflow_report(&self) -> WorkflowReport {
        let mut events = Vec::with_capacity(self.outcomes.len() + self.skipped.len());
        for outcome in &self.outcomes {
            events.push(match &outcome.result {
                DeviceResult::Provisioned { keyfile } => event(
                    WorkflowLevel::Success,
                    format!(
                        "{} ({}): keyfile written to {}",
                        outcome.name,
                        outcome.device.display(),
                        keyfile.display()
                    ),
                ),
                DeviceResult::Failed { reason } => event(
                    WorkflowLevel::Error,
                    format!(
                        "{} ({}): {reason}",
                        outcome.name,
                        outcome.device.display()
                    ),
                ),
            });
        }
        for name in &self.skipped {
            events.push(event(
                WorkflowLevel::Info,
                format!("{name}: uses a local keyfile, skipped"),
            ));
        }
        WorkflowReport {
            title: format!(
                "Provisioned {} of {} eligible device(s)",
                self.provisioned().count(),
                self.outcomes.len()
            ),
            events,
        }
    }
}

/// Write `{keyfile_dir}/{name}.key` for each entry without a local keyfile.
///
/// Devices are processed strictly in crypttab order. Under
/// [`BatchPolicy::ContinueOnDeviceError`] a device-scoped failure is recorded
/// and the loop continues; process-scoped failures (auth, transport,
/// configuration) always abort.
pub fn provision_crypttab<I>(
    config: &VluksConfig,
    issuer: &I,
    entries: &[CrypttabEntry],
    policy: BatchPolicy,
) -> VluksResult<ProvisionReport>
where
    I: KeyIssuer<Error = VluksError>,
{
    let mut report = ProvisionReport {
        outcomes: Vec::new(),
        skipped: entries
            .iter()
            .filter(|e| e.is_complete() && !e.is_remote_eligible())
            .map(|e| e.name.clone())
            .collect(),
    };
    for name in &report.skipped {
        debug!("{name}: crypttab names a local keyfile; skipping");
    }

    for entry in eligible_devices(entries) {
        let device = entry.device_path();
        let result = keyfile_name_check(&entry.name).and_then(|_| {
            let dest = config.keyfile_path_for(&entry.name);
            create_keyfile(issuer, &device, Some(&dest), None)
        });

        let result = match result {
            Ok(keyfile) => {
                info!("{}: keyfile created at {}", entry.name, keyfile.display());
                DeviceResult::Provisioned { keyfile }
            }
            Err(err)
                if policy == BatchPolicy::ContinueOnDeviceError
                    && err.scope() == ErrorScope::Device =>
            {
                warn!(
                    "{} ({}): skipping device: {err}",
                    entry.name,
                    device.display()
                );
                DeviceResult::Failed {
                    reason: err.to_string(),
                }
            }
            Err(err) => return Err(err),
        };

        report.outcomes.push(DeviceOutcome {
            name: entry.name.clone(),
            device,
            result,
        });
    }

    Ok(report)
}

fn keyfile_name_check(name: &str) -> VluksResult<()> {
    if name.contains('/') || name == "." || name == ".." {
        return Err(VluksError::Format(format!(
            "crypttab name `{name}` cannot be used as a keyfile name"
        )));
    }
    Ok(())
}
