//! Font identifier encoding
//!
//! A font is named by `"{size}###{source}###{ref}"`, where `source` is
//! either `face` (an installed family name) or `url` (a font file to fetch).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::FONT_ID_SEPARATOR;
use crate::error::{AtlasError, Result};

/// Where a font's data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FontSource {
    /// Installed font face, looked up by family name
    Face,
    /// Font file fetched by URL (or path)
    Url,
}

impl FontSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FontSource::Face => "face",
            FontSource::Url => "url",
        }
    }
}

/// Font at a given pixel size from a given source
///
/// The reference never contains the separator, so every value encodes to a
/// string that decodes back to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FontIdentifier {
    size: u32,
    source: FontSource,
    reference: String,
}

impl FontIdentifier {
    pub fn new(size: u32, source: FontSource, reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        if reference.contains(FONT_ID_SEPARATOR) {
            return Err(AtlasError::MalformedFontIdentifier(format!(
                "reference must not contain {:?}: {:?}",
                FONT_ID_SEPARATOR, reference
            )));
        }
        Ok(Self {
            size,
            source,
            reference,
        })
    }

    /// Pixel size
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn source(&self) -> FontSource {
        self.source
    }

    /// Family name or URL
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Encode to the delimited string form
    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.size,
            self.source.as_str(),
            self.reference,
            sep = FONT_ID_SEPARATOR
        )
    }

    /// Decode from the delimited string form
    ///
    /// Rejects a wrong field count, an unknown source and any size that is
    /// not a canonical non-negative decimal integer (so that decoding and
    /// re-encoding always reproduces the input byte for byte).
    pub fn decode(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(FONT_ID_SEPARATOR).collect();
        if fields.len() != 3 {
            return Err(AtlasError::MalformedFontIdentifier(format!(
                "expected 3 fields, got {}: {:?}",
                fields.len(),
                s
            )));
        }

        let size = parse_size(fields[0]).ok_or_else(|| {
            AtlasError::MalformedFontIdentifier(format!(
                "size must be a non-negative integer: {:?}",
                fields[0]
            ))
        })?;

        let source = match fields[1] {
            "face" => FontSource::Face,
            "url" => FontSource::Url,
            other => {
                return Err(AtlasError::MalformedFontIdentifier(format!(
                    "unknown font source: {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            size,
            source,
            reference: fields[2].to_string(),
        })
    }
}

/// Parse a canonical decimal size (digits only, no leading zeros)
fn parse_size(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for FontIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for FontIdentifier {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

// Serialized as the encoded string so requests stay human-writable
impl Serialize for FontIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for FontIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_url() {
        let id = FontIdentifier::decode("18###url###https://x/y.woff").unwrap();
        assert_eq!(id.size(), 18);
        assert_eq!(id.source(), FontSource::Url);
        assert_eq!(id.reference(), "https://x/y.woff");
        assert_eq!(id.encode(), "18###url###https://x/y.woff");
    }

    #[test]
    fn test_roundtrip() {
        let cases = [
            FontIdentifier::new(0, FontSource::Face, "DejaVu Sans Mono"),
            FontIdentifier::new(12, FontSource::Url, "fonts/Hack-Regular.ttf"),
            FontIdentifier::new(96, FontSource::Url, ""),
            FontIdentifier::new(14, FontSource::Url, "a##b#.ttf"),
        ];
        for id in cases {
            let id = id.unwrap();
            assert_eq!(FontIdentifier::decode(&id.encode()).unwrap(), id);
        }
    }

    #[test]
    fn test_separator_in_reference_rejected() {
        for reference in ["a###b", "###", "fonts/x.ttf###"] {
            assert!(matches!(
                FontIdentifier::new(12, FontSource::Url, reference),
                Err(AtlasError::MalformedFontIdentifier(_))
            ));
        }
    }

    #[test]
    fn test_wrong_field_count() {
        for s in ["18###url", "18", "18###url###a###b", ""] {
            assert!(matches!(
                FontIdentifier::decode(s),
                Err(AtlasError::MalformedFontIdentifier(_))
            ));
        }
    }

    #[test]
    fn test_bad_size() {
        for s in ["-1###url###a", "+3###url###a", "1.5###url###a", "###url###a", "007###url###a"] {
            assert!(FontIdentifier::decode(s).is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn test_unknown_source() {
        assert!(FontIdentifier::decode("12###file###a.ttf").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id: FontIdentifier = serde_json::from_str("\"14###face###Hack\"").unwrap();
        assert_eq!(id, FontIdentifier::new(14, FontSource::Face, "Hack").unwrap());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"14###face###Hack\"");
    }
}
