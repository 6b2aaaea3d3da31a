//! `crypttab` parsing and device discovery.
//!
//! The parser is deliberately lenient: it never rejects a line. Entries that
//! lack a name or device are dropped by [`eligible_devices`], not here.

use crate::error::VluksResult;
use std::fs;
use std::path::{Path, PathBuf};

const FIELD_COUNT: usize = 4;

/// One line of `/etc/crypttab`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrypttabEntry {
    /// Mapping name under `/dev/mapper`.
    pub name: String,
    /// Source device, either a path or `UUID=`/`PARTUUID=`/`LABEL=` reference.
    pub device: String,
    /// Keyfile column; empty or `none` means no local keyfile.
    pub keyfile: String,
    /// Raw comma-separated options column.
    pub options: String,
}

impl CrypttabEntry {
    fn from_fields(fields: [String; FIELD_COUNT]) -> Self {
        let [name, device, keyfile, options] = fields;
        Self {
            name,
            device,
            keyfile,
            options,
        }
    }

    /// True when the line carries at least a name and a device.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.device.is_empty()
    }

    /// True when the entry has no local keyfile and may be provisioned remotely.
    pub fn is_remote_eligible(&self) -> bool {
        matches!(self.keyfile.as_str(), "" | "none")
    }

    /// Stable device path for the source column.
    pub fn device_path(&self) -> PathBuf {
        resolve_device_path(&self.device)
    }
}

/// Parse a `crypttab` document into entries, one per meaningful line.
///
/// Blank lines and lines whose first non-whitespace character is `#` are
/// skipped. Runs of spaces/tabs separate up to four fields; whitespace past
/// the fourth boundary is dropped without starting a new field.
pub fn parse_crypttab(contents: &str) -> Vec<CrypttabEntry> {
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<CrypttabEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields: [String; FIELD_COUNT] = Default::default();
    let mut field = 0usize;
    let mut in_whitespace = false;
    for ch in line.chars() {
        if ch == ' ' || ch == '\t' {
            if !in_whitespace && field < FIELD_COUNT - 1 {
                field += 1;
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        fields[field].push(ch);
    }

    Some(CrypttabEntry::from_fields(fields))
}

/// Read and parse the crypttab at `path`.
pub fn read_crypttab(path: &Path) -> VluksResult<Vec<CrypttabEntry>> {
    let contents = fs::read_to_string(path)?;
    Ok(parse_crypttab(&contents))
}

/// Entries that name a device and have no local keyfile.
pub fn eligible_devices(entries: &[CrypttabEntry]) -> Vec<&CrypttabEntry> {
    entries
        .iter()
        .filter(|entry| entry.is_complete())
        .filter(|entry| entry.is_remote_eligible())
        .collect()
}

/// Map `UUID=`, `PARTUUID=` and `LABEL=` references onto `/dev/disk/by-*`.
///
/// Anything else is returned unchanged.
pub fn resolve_device_path(source: &str) -> PathBuf {
    let trimmed = source.trim();
    for (prefix, dir) in [
        ("UUID=", "/dev/disk/by-uuid"),
        ("PARTUUID=", "/dev/disk/by-partuuid"),
        ("LABEL=", "/dev/disk/by-label"),
    ] {
        if let Some(value) = strip_prefix_case_insensitive(trimmed, prefix) {
            let value = value.trim();
            if !value.is_empty() {
                return Path::new(dir).join(value);
            }
        }
    }
    PathBuf::from(trimmed)
}

fn strip_prefix_case_insensitive<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    value
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| value.get(prefix.len()..))
}
