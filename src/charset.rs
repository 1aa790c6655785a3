//! Transcoding between the application's UTF-8 and a corpus charset.
//!
//! CWB corpora declare one of a closed set of charsets. Command text is
//! encoded into the corpus charset before it leaves the client, and every
//! reply line is decoded back to UTF-8. Both directions are the identity for
//! UTF-8 corpora.

use std::borrow::Cow;
use std::fmt;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The charsets a corpus can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    /// UTF-8 (also used for `ascii` corpora).
    #[default]
    Utf8,
    /// ISO-8859-1.
    Latin1,
    /// ISO-8859-2.
    Latin2,
    /// ISO-8859-3.
    Latin3,
    /// ISO-8859-4.
    Latin4,
    /// ISO-8859-5.
    Cyrillic,
    /// ISO-8859-6.
    Arabic,
    /// ISO-8859-7.
    Greek,
    /// ISO-8859-8.
    Hebrew,
    /// ISO-8859-9.
    Latin5,
    /// ISO-8859-10.
    Latin6,
    /// ISO-8859-13.
    Latin7,
    /// ISO-8859-14.
    Latin8,
    /// ISO-8859-15.
    Latin9,
}

impl Charset {
    /// Every supported charset.
    pub const ALL: [Charset; 14] = [
        Charset::Utf8,
        Charset::Latin1,
        Charset::Latin2,
        Charset::Latin3,
        Charset::Latin4,
        Charset::Cyrillic,
        Charset::Arabic,
        Charset::Greek,
        Charset::Hebrew,
        Charset::Latin5,
        Charset::Latin6,
        Charset::Latin7,
        Charset::Latin8,
        Charset::Latin9,
    ];

    /// Map a label from the engine's `Charset:` line.
    ///
    /// ASCII and UTF-8 spellings collapse to [`Charset::Utf8`]; anything not in
    /// the table falls back to UTF-8 with a warning.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "ascii" | "us-ascii" | "utf8" | "utf-8" => Charset::Utf8,
            "latin1" | "iso-8859-1" | "iso8859-1" => Charset::Latin1,
            "latin2" | "iso-8859-2" | "iso8859-2" => Charset::Latin2,
            "latin3" | "iso-8859-3" | "iso8859-3" => Charset::Latin3,
            "latin4" | "iso-8859-4" | "iso8859-4" => Charset::Latin4,
            "cyrillic" | "iso-8859-5" | "iso8859-5" => Charset::Cyrillic,
            "arabic" | "iso-8859-6" | "iso8859-6" => Charset::Arabic,
            "greek" | "iso-8859-7" | "iso8859-7" => Charset::Greek,
            "hebrew" | "iso-8859-8" | "iso8859-8" => Charset::Hebrew,
            "latin5" | "iso-8859-9" | "iso8859-9" => Charset::Latin5,
            "latin6" | "iso-8859-10" | "iso8859-10" => Charset::Latin6,
            "latin7" | "iso-8859-13" | "iso8859-13" => Charset::Latin7,
            "latin8" | "iso-8859-14" | "iso8859-14" => Charset::Latin8,
            "latin9" | "iso-8859-15" | "iso8859-15" => Charset::Latin9,
            other => {
                tracing::warn!(label = %other, "unknown corpus charset, assuming utf8");
                Charset::Utf8
            }
        }
    }

    /// The engine's name for this charset.
    pub fn label(self) -> &'static str {
        match self {
            Charset::Utf8 => "utf8",
            Charset::Latin1 => "latin1",
            Charset::Latin2 => "latin2",
            Charset::Latin3 => "latin3",
            Charset::Latin4 => "latin4",
            Charset::Cyrillic => "cyrillic",
            Charset::Arabic => "arabic",
            Charset::Greek => "greek",
            Charset::Hebrew => "hebrew",
            Charset::Latin5 => "latin5",
            Charset::Latin6 => "latin6",
            Charset::Latin7 => "latin7",
            Charset::Latin8 => "latin8",
            Charset::Latin9 => "latin9",
        }
    }

    // Latin-1 and Latin-5 are handled byte-for-codepoint: the WHATWG tables
    // alias them to windows-1252 and windows-1254, which remap 0x80..=0x9F.
    fn encoding(self) -> Option<&'static Encoding> {
        match self {
            Charset::Utf8 | Charset::Latin1 | Charset::Latin5 => None,
            Charset::Latin2 => Some(encoding_rs::ISO_8859_2),
            Charset::Latin3 => Some(encoding_rs::ISO_8859_3),
            Charset::Latin4 => Some(encoding_rs::ISO_8859_4),
            Charset::Cyrillic => Some(encoding_rs::ISO_8859_5),
            Charset::Arabic => Some(encoding_rs::ISO_8859_6),
            Charset::Greek => Some(encoding_rs::ISO_8859_7),
            Charset::Hebrew => Some(encoding_rs::ISO_8859_8),
            Charset::Latin6 => Some(encoding_rs::ISO_8859_10),
            Charset::Latin7 => Some(encoding_rs::ISO_8859_13),
            Charset::Latin8 => Some(encoding_rs::ISO_8859_14),
            Charset::Latin9 => Some(encoding_rs::ISO_8859_15),
        }
    }

    /// Transcode application text into this charset (app → engine).
    ///
    /// Fails if `text` contains characters the charset cannot represent.
    pub fn filter_input(self, text: &str) -> Result<Cow<'_, [u8]>> {
        match self {
            Charset::Utf8 => Ok(Cow::Borrowed(text.as_bytes())),
            Charset::Latin1 | Charset::Latin5 => text
                .chars()
                .map(|c| self.encode_byte(c))
                .collect::<Option<Vec<u8>>>()
                .map(Cow::Owned)
                .ok_or(Error::Unencodable {
                    charset: self.label(),
                }),
            _ => {
                let encoding = self.encoding().unwrap_or(encoding_rs::UTF_8);
                let (bytes, _, unmappable) = encoding.encode(text);
                if unmappable {
                    return Err(Error::Unencodable {
                        charset: self.label(),
                    });
                }
                Ok(bytes)
            }
        }
    }

    /// Transcode an engine line into UTF-8 (engine → app).
    ///
    /// Undecodable bytes become U+FFFD.
    pub fn filter_output(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => {
                let text = String::from_utf8_lossy(bytes);
                if let Cow::Owned(_) = text {
                    tracing::warn!("engine output is not valid UTF-8, decoded lossily");
                }
                text.into_owned()
            }
            Charset::Latin1 | Charset::Latin5 => {
                bytes.iter().map(|b| self.decode_byte(*b)).collect()
            }
            _ => {
                let encoding = self.encoding().unwrap_or(encoding_rs::UTF_8);
                let (text, malformed) = encoding.decode_without_bom_handling(bytes);
                if malformed {
                    tracing::warn!(charset = self.label(), "malformed engine output, decoded lossily");
                }
                text.into_owned()
            }
        }
    }
}

/// The six positions where ISO-8859-9 departs from ISO-8859-1.
const LATIN5_TURKISH: [(u8, char); 6] = [
    (0xD0, 'Ğ'),
    (0xDD, 'İ'),
    (0xDE, 'Ş'),
    (0xF0, 'ğ'),
    (0xFD, 'ı'),
    (0xFE, 'ş'),
];

impl Charset {
    fn decode_byte(self, byte: u8) -> char {
        if self == Charset::Latin5 {
            if let Some(&(_, c)) = LATIN5_TURKISH.iter().find(|(b, _)| *b == byte) {
                return c;
            }
        }
        char::from(byte)
    }

    fn encode_byte(self, c: char) -> Option<u8> {
        if self == Charset::Latin5 {
            if let Some(&(b, _)) = LATIN5_TURKISH.iter().find(|(_, t)| *t == c) {
                return Some(b);
            }
            let byte = u8::try_from(u32::from(c)).ok()?;
            return (!LATIN5_TURKISH.iter().any(|(b, _)| *b == byte)).then_some(byte);
        }
        u8::try_from(u32::from(c)).ok()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for charset in Charset::ALL {
            assert_eq!(Charset::from_label(charset.label()), charset);
        }
    }

    #[test]
    fn ascii_variants_collapse_to_utf8() {
        assert_eq!(Charset::from_label("ascii"), Charset::Utf8);
        assert_eq!(Charset::from_label("UTF-8"), Charset::Utf8);
        assert_eq!(Charset::from_label("klingon"), Charset::Utf8);
        assert_eq!(Charset::from_label("ISO-8859-15"), Charset::Latin9);
    }

    #[test]
    fn utf8_is_identity() {
        let text = "naïve 日本語";
        assert_eq!(&*Charset::Utf8.filter_input(text).unwrap(), text.as_bytes());
        assert_eq!(Charset::Utf8.filter_output(text.as_bytes()), text);
    }

    #[test]
    fn latin1_maps_bytes_to_codepoints() {
        let bytes = Charset::Latin1.filter_input("café").unwrap();
        assert_eq!(&*bytes, b"caf\xe9");
        assert_eq!(Charset::Latin1.filter_output(&bytes), "café");
    }

    #[test]
    fn round_trip_representable_text() {
        let samples = [
            (Charset::Latin1, "Straße über ÿ"),
            (Charset::Latin2, "Łódź žluťoučký"),
            (Charset::Latin3, "Ħaġar"),
            (Charset::Latin4, "Ģirts ŋ"),
            (Charset::Cyrillic, "Привет мир"),
            (Charset::Arabic, "مرحبا"),
            (Charset::Greek, "Καλημέρα"),
            (Charset::Hebrew, "שלום"),
            (Charset::Latin5, "İstanbul ğ ş"),
            (Charset::Latin6, "Þórður ŧ"),
            (Charset::Latin7, "Ąžuolas"),
            (Charset::Latin8, "Ŵŷ ẁ"),
            (Charset::Latin9, "€ œuvre Ÿ"),
        ];
        let controls: String = ('\u{80}'..='\u{9f}').collect();
        for (charset, text) in samples {
            let encoded = charset.filter_input(text).expect("representable");
            assert_eq!(charset.filter_output(&encoded), text, "charset {charset}");

            let encoded = charset.filter_input(&controls).expect("C1 controls");
            assert_eq!(&*encoded, (0x80..=0x9f).collect::<Vec<u8>>(), "charset {charset}");
            assert_eq!(charset.filter_output(&encoded), controls, "charset {charset}");
        }
    }

    #[test]
    fn euro_only_where_the_table_has_it() {
        for charset in Charset::ALL {
            let encoded = charset.filter_input("€");
            match charset {
                Charset::Utf8 | Charset::Greek | Charset::Latin9 => {
                    let bytes = encoded.expect("euro is representable");
                    assert_eq!(charset.filter_output(&bytes), "€");
                }
                _ => assert!(
                    matches!(encoded, Err(Error::Unencodable { .. })),
                    "charset {charset} accepted the euro sign"
                ),
            }
        }
    }

    #[test]
    fn latin5_replaces_six_latin1_positions() {
        let bytes = [0xD0, 0xDD, 0xDE, 0xF0, 0xFD, 0xFE, 0xE7, 0xF6];
        assert_eq!(Charset::Latin5.filter_output(&bytes), "ĞİŞğışçö");
        assert_eq!(
            &*Charset::Latin5.filter_input("ĞİŞğışçö").unwrap(),
            &bytes[..]
        );
        // Latin-1 letters displaced by the Turkish ones have no byte.
        for c in ["Ð", "Ý", "Þ", "ð", "ý", "þ"] {
            assert!(Charset::Latin5.filter_input(c).is_err(), "{c} encoded");
        }
    }

    #[test]
    fn unrepresentable_text_is_rejected() {
        assert!(matches!(
            Charset::Latin1.filter_input("€"),
            Err(Error::Unencodable { charset: "latin1" })
        ));
        assert!(matches!(
            Charset::Greek.filter_input("日本"),
            Err(Error::Unencodable { charset: "greek" })
        ));
    }
}
