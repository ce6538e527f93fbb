//! Canonical forms for words and language tags.
//!
//! Canonicalization: NFKC, full lowercase, typographic apostrophes
//! folded to `'`, surrounding punctuation trimmed, whitespace runs
//! collapsed. Diacritics are composed but never stripped, so
//! `pêche` and `péché` stay distinct while a decomposed `é` matches
//! a precomposed one.

use unicode_normalization::UnicodeNormalization;

use crate::error::ValidationError;

/// Longest accepted entry, in characters.
pub const MAX_WORD_CHARS: usize = 64;

const APOSTROPHES: [char; 5] = ['\u{2019}', '\u{2018}', '\u{02BC}', '\u{FF07}', '\u{0060}'];

/// Normalize a raw candidate into its canonical key form.
pub fn normalize_word(raw: &str) -> Result<String, ValidationError> {
    let folded: String = raw
        .nfkc()
        .flat_map(char::to_lowercase)
        .map(|c| if APOSTROPHES.contains(&c) { '\'' } else { c })
        .collect();

    let trimmed = folded.trim_matches(|c: char| !c.is_alphanumeric());
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !collapsed.chars().any(char::is_alphabetic) {
        return Err(ValidationError::NoLetters(collapsed));
    }
    let len = collapsed.chars().count();
    if len > MAX_WORD_CHARS {
        return Err(ValidationError::TooLong(len));
    }

    Ok(collapsed)
}

/// Normalize a language tag: trimmed, lowercase, `_` as `-`.
pub fn normalize_language(raw: &str) -> Result<String, ValidationError> {
    let tag = raw.trim().to_ascii_lowercase().replace('_', "-");

    let well_formed = !tag.is_empty()
        && tag.len() <= 35
        && tag
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()));

    if well_formed {
        Ok(tag)
    } else {
        Err(ValidationError::InvalidLanguage(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_folding() {
        assert_eq!(normalize_word("Chat").unwrap(), "chat");
        assert_eq!(normalize_word("ÉCOLE").unwrap(), "école");
    }

    #[test]
    fn test_composed_and_decomposed_forms_match() {
        let decomposed = "e\u{0301}cole";
        assert_eq!(normalize_word(decomposed).unwrap(), "école");
    }

    #[test]
    fn test_diacritics_are_kept() {
        assert_ne!(normalize_word("pêche").unwrap(), normalize_word("péché").unwrap());
        assert_ne!(normalize_word("peche").unwrap(), normalize_word("pêche").unwrap());
    }

    #[test]
    fn test_compatibility_forms_fold() {
        // Latin small ligature fi, fullwidth letters
        assert_eq!(normalize_word("\u{FB01}n").unwrap(), "fin");
        assert_eq!(normalize_word("ＣＨＡＴ").unwrap(), "chat");
    }

    #[test]
    fn test_apostrophes_and_punctuation() {
        assert_eq!(normalize_word("«aujourd’hui»").unwrap(), "aujourd'hui");
        assert_eq!(normalize_word("chien,").unwrap(), "chien");
        assert_eq!(normalize_word("  pomme   de  terre ").unwrap(), "pomme de terre");
    }

    #[test]
    fn test_degenerate_candidates() {
        assert_eq!(normalize_word("   "), Err(ValidationError::Empty));
        assert_eq!(normalize_word("--"), Err(ValidationError::Empty));
        assert!(matches!(normalize_word("1984"), Err(ValidationError::NoLetters(_))));
        assert!(matches!(
            normalize_word(&"a".repeat(MAX_WORD_CHARS + 1)),
            Err(ValidationError::TooLong(_))
        ));
    }

    #[test]
    fn test_mixed_alphanumeric_is_valid() {
        // Rejecting non-words is the service's call, not ours
        assert_eq!(normalize_word("xyz123").unwrap(), "xyz123");
    }

    #[test]
    fn test_language_tags() {
        assert_eq!(normalize_language(" FR ").unwrap(), "fr");
        assert_eq!(normalize_language("pt_BR").unwrap(), "pt-br");
        assert!(normalize_language("").is_err());
        assert!(normalize_language("en--us").is_err());
        assert!(normalize_language("fr!").is_err());
    }
}
