//! Keyfile persistence with owner-only permissions.
//!
//! Keyfiles hold raw key bytes: no encoding, no trailing newline.

use crate::error::{VluksError, VluksResult};
use log::debug;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

const EPHEMERAL_PREFIX: &str = "vluks";
const KEYFILE_MODE: u32 = 0o600;
const KEYFILE_DIR_MODE: u32 = 0o700;

/// Write `key` to a randomly named file in `scratch_dir` (or the system temp dir).
///
/// The returned [`TempPath`] removes the file when dropped.
pub fn stage_ephemeral_keyfile(key: &[u8], scratch_dir: Option<&Path>) -> VluksResult<TempPath> {
    let mut builder = Builder::new();
    builder.prefix(EPHEMERAL_PREFIX);
    let mut temp = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    temp.as_file_mut().write_all(key)?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;
    let path = temp.into_temp_path();
    debug!("staged ephemeral keyfile at {}", path.display());
    Ok(path)
}

/// Create `path` exclusively and write `key` into it.
///
/// Missing parent directories are created with mode 0700; the file itself is
/// 0600. An existing file is never touched.
pub fn write_persistent_keyfile(key: &[u8], path: &Path) -> VluksResult<PathBuf> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    DirBuilder::new()
        .recursive(true)
        .mode(KEYFILE_DIR_MODE)
        .create(parent)
        .map_err(|err| match err.kind() {
            io::ErrorKind::PermissionDenied => VluksError::PermissionDenied {
                path: parent.to_path_buf(),
            },
            _ => VluksError::Io(err),
        })?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(KEYFILE_MODE)
        .open(path)
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => VluksError::AlreadyExists {
                path: path.to_path_buf(),
            },
            _ => VluksError::Io(err),
        })?;

    let written = file
        .write_all(key)
        .and_then(|_| file.flush())
        .and_then(|_| file.sync_all());
    if let Err(err) = written {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(VluksError::Io(err));
    }
    drop(file);

    let _ = sync_dir(parent);
    debug!("wrote keyfile {}", path.display());
    Ok(path.to_path_buf())
}

/// Write `key` to `path` when given, otherwise to a kept ephemeral file.
///
/// In the ephemeral case the caller owns deletion of the returned path.
pub fn write_keyfile(
    key: &[u8],
    path: Option<&Path>,
    scratch_dir: Option<&Path>,
) -> VluksResult<PathBuf> {
    match path {
        Some(path) => write_persistent_keyfile(key, path),
        None => {
            let staged = stage_ephemeral_keyfile(key, scratch_dir)?;
            staged.keep().map_err(|err| VluksError::Io(err.error))
        }
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).and_then(|file| file.sync_all())
}
