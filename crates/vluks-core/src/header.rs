//! Reader for the LUKS2 JSON metadata area.
//!
//! The binary header is not interpreted: the JSON document is decoded from
//! the fixed offset [`JSON_AREA_OFFSET`] and anything after it is ignored.

use crate::error::{VluksError, VluksResult};
use log::debug;
use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

/// Absolute byte offset of the JSON area in a LUKS2 header.
pub const JSON_AREA_OFFSET: u64 = 0x1000;

/// Decoded JSON area. Only the fields vluks needs are modelled.
#[derive(Debug, Clone, Default)]
pub struct LuksHeader {
    pub tokens: TokenTable,

    /// Device or file the header was read from.
    pub source: String,
}

// Accepts a JSON object only; unknown top-level fields are skipped.
impl<'de> Deserialize<'de> for LuksHeader {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HeaderVisitor;

        impl<'de> Visitor<'de> for HeaderVisitor {
            type Value = LuksHeader;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a LUKS2 JSON metadata object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut header = LuksHeader::default();
                while let Some(key) = map.next_key::<String>()? {
                    if key == "tokens" {
                        header.tokens = map.next_value()?;
                    } else {
                        map.next_value::<IgnoredAny>()?;
                    }
                }
                Ok(header)
            }
        }

        deserializer.deserialize_map(HeaderVisitor)
    }
}

/// One entry of the header's `tokens` object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderToken {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub keyslots: Vec<String>,

    #[serde(default)]
    pub ciphertext: Option<String>,
}

/// Token slots in the order they appear in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenTable(Vec<(String, HeaderToken)>);

impl TokenTable {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderToken)> {
        self.0.iter().map(|(id, token)| (id.as_str(), token))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, HeaderToken)> for TokenTable {
    fn from_iter<I: IntoIterator<Item = (String, HeaderToken)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for TokenTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TokenTableVisitor;

        impl<'de> Visitor<'de> for TokenTableVisitor {
            type Value = TokenTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping token ids to token objects")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, token)) = map.next_entry::<String, HeaderToken>()? {
                    entries.push((id, token));
                }
                Ok(TokenTable(entries))
            }
        }

        deserializer.deserialize_map(TokenTableVisitor)
    }
}

/// Read the JSON area of `device` (a block device or an image file).
pub fn read_header(device: &Path) -> VluksResult<LuksHeader> {
    let mut file = File::open(device)?;
    file.seek(SeekFrom::Start(JSON_AREA_OFFSET))?;
    debug!("reading LUKS JSON area of {} at offset {JSON_AREA_OFFSET:#x}", device.display());

    let mut header = decode_json_area(BufReader::new(file)).map_err(|err| match err {
        VluksError::Format(reason) => VluksError::Format(format!(
            "{}: no valid JSON header at offset {JSON_AREA_OFFSET:#x}: {reason}",
            device.display()
        )),
        other => other,
    })?;
    header.source = device.display().to_string();
    debug!(
        "header of {} lists {} token(s)",
        device.display(),
        header.tokens.len()
    );
    Ok(header)
}

/// Decode the first JSON value from `reader`, ignoring trailing bytes.
pub fn decode_json_area<R: std::io::Read>(reader: R) -> VluksResult<LuksHeader> {
    let mut stream = serde_json::Deserializer::from_reader(reader).into_iter::<LuksHeader>();
    match stream.next() {
        Some(Ok(header)) => Ok(header),
        Some(Err(err)) if err.is_io() => Err(VluksError::Io(err.into())),
        Some(Err(err)) => Err(VluksError::Format(err.to_string())),
        None => Err(VluksError::Format("empty JSON area".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn keeps_token_document_order() {
        let json = br#"{"tokens":{"7":{"type":"a","keyslots":[]},"1":{"type":"b","keyslots":["0"]},"3":{"type":"c"}}}"#;
        let header = decode_json_area(Cursor::new(&json[..])).unwrap();
        let ids: Vec<&str> = header.tokens.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["7", "1", "3"]);
    }

    #[test]
    fn ignores_trailing_padding() {
        let mut area = br#"{"keyslots":{},"tokens":{}}"#.to_vec();
        area.extend_from_slice(&[0u8; 64]);
        let header = decode_json_area(Cursor::new(area)).unwrap();
        assert!(header.tokens.is_empty());
    }

    #[test]
    fn non_object_is_a_format_error() {
        let err = decode_json_area(Cursor::new(&b"[1,2,3]"[..])).unwrap_err();
        assert!(matches!(err, VluksError::Format(_)));
    }

    #[test]
    fn empty_array_is_not_a_header() {
        match decode_json_area(Cursor::new(&b"[]"[..])) {
            Err(VluksError::Format(reason)) => {
                assert!(reason.contains("LUKS2 JSON metadata object"), "{reason}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn scalar_is_not_a_header() {
        assert!(matches!(
            decode_json_area(Cursor::new(&b"42 "[..])),
            Err(VluksError::Format(_))
        ));
    }

    #[test]
    fn empty_area_is_a_format_error() {
        let err = decode_json_area(Cursor::new(&b""[..])).unwrap_err();
        assert!(matches!(err, VluksError::Format(_)));
    }
}
