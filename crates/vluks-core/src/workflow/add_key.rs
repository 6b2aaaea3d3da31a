//! Mint a key, enroll it into a new key slot and record its wrapped form.

use super::{event, WorkflowLevel, WorkflowReport};
use crate::config::VluksConfig;
use crate::error::{VluksError, VluksResult};
use crate::keyfile::stage_ephemeral_keyfile;
use crate::provider::{KeyIssuer, LuksTool, MintedKey};
use crate::slot::{CryptsetupConfirmation, SlotConfirmation};
use crate::token::VluksToken;
use log::{error, info, warn};

/// Enroll a freshly minted key into `device`, parsing `cryptsetup` output.
pub fn add_key<I, T>(
    config: &VluksConfig,
    issuer: &I,
    tool: &T,
    device: &str,
) -> VluksResult<WorkflowReport>
where
    I: KeyIssuer<Error = VluksError>,
    T: LuksTool<Error = VluksError>,
{
    add_key_with(config, issuer, tool, &CryptsetupConfirmation, device)
}

/// Same as [`add_key`] with a caller-chosen slot confirmation parser.
///
/// Any failure is final. A failure after the slot was added is reported as
/// [`VluksError::TokenImportFailed`] so it can't be mistaken for a clean abort.
pub fn add_key_with<I, T, S>(
    config: &VluksConfig,
    issuer: &I,
    tool: &T,
    confirmation: &S,
    device: &str,
) -> VluksResult<WorkflowReport>
where
    I: KeyIssuer<Error = VluksError>,
    T: LuksTool<Error = VluksError>,
    S: SlotConfirmation + ?Sized,
{
    let mut events = Vec::new();

    let MintedKey { wrapped, plaintext } = issuer.mint_key(config.vault.bits)?;
    info!(
        "minted {}-bit key from {}/{}",
        config.vault.bits, config.vault.mount, config.vault.key
    );
    events.push(event(
        WorkflowLevel::Info,
        format!(
            "Generated a {}-bit key with {}/{}",
            config.vault.bits, config.vault.mount, config.vault.key
        ),
    ));

    let scratch = config.scratch_dir();
    let keyfile = stage_ephemeral_keyfile(&plaintext, scratch.as_deref())?;
    drop(plaintext);

    info!("adding key slot to {device}");
    let transcript = tool.add_key(device, &keyfile)?;
    if let Err(err) = keyfile.close() {
        warn!("failed to remove staged keyfile: {err}");
    }

    let slot = match confirmation.parse_slot_confirmation(&transcript) {
        Some(slot) => slot,
        None => {
            error!("no key slot confirmation in encryption tool output for {device}");
            return Err(VluksError::SlotNotConfirmed {
                device: device.to_string(),
            });
        }
    };
    events.push(event(
        WorkflowLevel::Success,
        format!("Key slot {slot} created on {device}"),
    ));

    let token = VluksToken::new(slot.clone(), wrapped).to_json()?;
    info!("importing vluks token for key slot {slot} into {device}");
    if let Err(err) = tool.import_token(device, &token) {
        error!("key slot {slot} on {device} has no recorded wrapped key: {err}");
        return Err(VluksError::TokenImportFailed {
            device: device.to_string(),
            slot,
            reason: err.to_string(),
        });
    }
    events.push(event(
        WorkflowLevel::Success,
        format!("vluks token for key slot {slot} added to the LUKS header"),
    ));

    Ok(WorkflowReport {
        title: format!("Enrolled vault-backed key on {device}"),
        events,
    })
}
