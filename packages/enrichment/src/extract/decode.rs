//! Text decoding with an encoding fallback chain.

use encoding_rs::{Encoding, UTF_8};
use tracing::{debug, warn};

use crate::error::ExtractionError;

/// Ordered list of encodings tried when decoding a document.
///
/// A byte-order mark wins outright. Otherwise UTF-8 is tried strictly,
/// then each legacy encoding in turn. An attempt only counts if it
/// needs no replacement characters. Legacy single-byte encodings decode
/// any byte sequence, so they must also yield no control characters
/// beyond ASCII whitespace.
#[derive(Debug, Clone)]
pub struct EncodingChain {
    fallbacks: Vec<&'static Encoding>,
}

impl Default for EncodingChain {
    fn default() -> Self {
        Self::from_labels(["windows-1252", "iso-8859-15", "iso-8859-2"])
    }
}

impl EncodingChain {
    /// UTF-8 only, no legacy fallback.
    pub fn utf8_only() -> Self {
        Self {
            fallbacks: Vec::new(),
        }
    }

    /// Build a chain from WHATWG encoding labels. Unknown labels are skipped.
    pub fn from_labels(labels: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let mut fallbacks = Vec::new();
        for label in labels {
            let label = label.as_ref();
            match Encoding::for_label(label.as_bytes()) {
                Some(encoding) if encoding != UTF_8 && !fallbacks.contains(&encoding) => {
                    fallbacks.push(encoding)
                }
                Some(_) => {}
                None => warn!(label, "unknown encoding label, skipping"),
            }
        }
        Self { fallbacks }
    }

    /// Names of every encoding this chain will try, in order.
    pub fn names(&self) -> Vec<String> {
        std::iter::once(UTF_8.name())
            .chain(self.fallbacks.iter().map(|e| e.name()))
            .map(str::to_string)
            .collect()
    }

    /// Decode `bytes`, returning the text and the encoding that succeeded.
    pub fn decode(
        &self,
        document: &str,
        bytes: &[u8],
    ) -> Result<(String, &'static Encoding), ExtractionError> {
        if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
            if let Some(text) = decode_strict(encoding, &bytes[bom_len..]) {
                debug!(document, encoding = encoding.name(), "decoded via byte-order mark");
                return Ok((text, encoding));
            }
        }

        if let Some(text) = decode_strict(UTF_8, bytes) {
            return Ok((text, UTF_8));
        }

        for &encoding in &self.fallbacks {
            if let Some(text) = decode_legacy(encoding, bytes) {
                debug!(document, encoding = encoding.name(), "decoded with fallback encoding");
                return Ok((text, encoding));
            }
        }

        Err(ExtractionError {
            document: document.to_string(),
            tried: self.names(),
        })
    }
}

fn decode_strict(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

fn decode_legacy(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    decode_strict(encoding, bytes).filter(|text| !text.chars().any(is_suspicious_control))
}

fn is_suspicious_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_preferred() {
        let chain = EncodingChain::default();
        let (text, encoding) = chain.decode("doc", "château".as_bytes()).unwrap();
        assert_eq!(text, "château");
        assert_eq!(encoding, UTF_8);
    }

    #[test]
    fn test_utf8_keeps_page_breaks() {
        let chain = EncodingChain::default();
        let (text, encoding) = chain.decode("pages.txt", b"chat\n\x0cchien\n\x0boiseau\x07").unwrap();
        assert_eq!(text, "chat\n\x0cchien\n\x0boiseau\x07");
        assert_eq!(encoding, UTF_8);
    }

    #[test]
    fn test_falls_back_to_windows_1252() {
        // "château" in latin-1 / windows-1252
        let bytes = b"ch\xe2teau";
        let chain = EncodingChain::default();
        let (text, encoding) = chain.decode("doc", bytes).unwrap();
        assert_eq!(text, "château");
        assert_eq!(encoding.name(), "windows-1252");
    }

    #[test]
    fn test_bom_selects_utf16() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "chat".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, encoding) = EncodingChain::utf8_only().decode("doc", &bytes).unwrap();
        assert_eq!(text, "chat");
        assert_eq!(encoding.name(), "UTF-16LE");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let bytes = b"\xEF\xBB\xBFchien";
        let (text, _) = EncodingChain::default().decode("doc", bytes).unwrap();
        assert_eq!(text, "chien");
    }

    #[test]
    fn test_error_when_chain_exhausted() {
        let err = EncodingChain::utf8_only()
            .decode("broken.txt", b"ch\xe2teau")
            .unwrap_err();
        assert_eq!(err.document, "broken.txt");
        assert_eq!(err.tried, vec!["UTF-8".to_string()]);
    }

    #[test]
    fn test_control_characters_reject_a_candidate_encoding() {
        // 0x81 is unassigned in windows-1252 and decodes to a C1 control
        let chain = EncodingChain::from_labels(["windows-1252"]);
        assert!(chain.decode("doc", b"\x81\x81").is_err());
    }

    #[test]
    fn test_unknown_labels_are_skipped() {
        let chain = EncodingChain::from_labels(["not-an-encoding", "latin1", "utf-8"]);
        assert_eq!(chain.names(), vec!["UTF-8", "windows-1252"]);
    }
}
