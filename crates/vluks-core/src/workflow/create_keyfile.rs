//! Recover a device's key from its header token and write it to a keyfile.

use crate::error::{VluksError, VluksResult};
use crate::header::read_header;
use crate::keyfile::write_keyfile;
use crate::provider::KeyIssuer;
use crate::token::locate_wrapped_key;
use log::info;
use std::path::{Path, PathBuf};

/// Read `device`'s header, unwrap its vluks ciphertext and write the key.
///
/// With `dest` absent the key lands in a kept ephemeral file under
/// `scratch_dir` that the caller must remove.
pub fn create_keyfile<I>(
    issuer: &I,
    device: &Path,
    dest: Option<&Path>,
    scratch_dir: Option<&Path>,
) -> VluksResult<PathBuf>
where
    I: KeyIssuer<Error = VluksError>,
{
    let header = read_header(device)?;
    let ciphertext = locate_wrapped_key(&header)?;
    let key = issuer.unwrap_key(&ciphertext)?;
    let path = write_keyfile(&key, dest, scratch_dir)?;
    info!(
        "keyfile for {} written to {}",
        device.display(),
        path.display()
    );
    Ok(path)
}
