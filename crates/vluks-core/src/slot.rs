//! Extraction of the new key-slot id from the encryption tool's output.

use regex::Regex;
use std::sync::OnceLock;

/// Strategy for reading a key-slot id out of a tool transcript.
pub trait SlotConfirmation {
    /// Return the slot id announced in `transcript`, if any.
    fn parse_slot_confirmation(&self, transcript: &str) -> Option<String>;
}

/// Matches `cryptsetup -v` output: `Key slot <N> created.`
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptsetupConfirmation;

impl SlotConfirmation for CryptsetupConfirmation {
    fn parse_slot_confirmation(&self, transcript: &str) -> Option<String> {
        parse_slot_confirmation(transcript)
    }
}

/// First `Key slot <N> created.` occurrence in `transcript`.
pub fn parse_slot_confirmation(transcript: &str) -> Option<String> {
    static KEY_SLOT_CREATED: OnceLock<Regex> = OnceLock::new();
    let regex = KEY_SLOT_CREATED
        .get_or_init(|| Regex::new(r"Key slot (\d+) created\.").expect("valid key slot regex"));
    regex
        .captures(transcript)
        .and_then(|caps| caps.get(1))
        .map(|slot| slot.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_slot_id() {
        assert_eq!(
            parse_slot_confirmation("Key slot 3 created."),
            Some("3".to_string())
        );
    }

    #[test]
    fn finds_slot_inside_verbose_transcript() {
        let transcript = "Enter any existing passphrase: \nKey slot 0 unlocked.\nKey slot 12 created.\nCommand successful.\n";
        assert_eq!(
            CryptsetupConfirmation.parse_slot_confirmation(transcript),
            Some("12".to_string())
        );
    }

    #[test]
    fn missing_confirmation_yields_none() {
        assert_eq!(parse_slot_confirmation("Command successful."), None);
        assert_eq!(parse_slot_confirmation("Key slot created."), None);
    }
}
