//! Digit normalization of recognized field text.
//!
//! Meter digit groups only ever contain digits, but the recognizer regularly
//! reads them as look-alike letters. A closed substitution table maps those
//! back; any other character invalidates the whole field.

use thiserror::Error;

use crate::models::fields::{FieldFailure, ERROR_SENTINEL};

/// Letters read in place of digits. Case-sensitive.
pub const DEFAULT_SUBSTITUTIONS: [(char, char); 7] = [
    ('S', '5'),
    ('D', '0'),
    ('O', '0'),
    ('Z', '2'),
    ('B', '8'),
    ('g', '9'),
    ('I', '1'),
];

/// Text contained a character that is neither a digit nor a known look-alike.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid character {character:?} at position {position}")]
pub struct NormalizeError {
    pub character: char,
    pub position: usize,
}

/// Substitution-table normalizer.
#[derive(Debug, Clone)]
pub struct DigitNormalizer {
    substitutions: &'static [(char, char)],
}

impl DigitNormalizer {
    /// Normalizer with the default table.
    pub fn new() -> Self {
        Self {
            substitutions: &DEFAULT_SUBSTITUTIONS,
        }
    }

    fn substitute(&self, c: char) -> Option<char> {
        self.substitutions
            .iter()
            .find(|(from, _)| *from == c)
            .map(|(_, to)| *to)
    }

    /// Map `text` to a digit string. Fails on the first unmappable character.
    pub fn normalize(&self, text: &str) -> Result<String, NormalizeError> {
        let mut digits = String::with_capacity(text.len());

        for (position, c) in text.chars().enumerate() {
            if c.is_ascii_digit() {
                digits.push(c);
            } else if let Some(d) = self.substitute(c) {
                digits.push(d);
            } else {
                return Err(NormalizeError {
                    character: c,
                    position,
                });
            }
        }

        Ok(digits)
    }

    /// Like [`normalize`](Self::normalize) but as a field failure.
    pub fn normalize_outcome(&self, text: &str) -> Result<String, FieldFailure> {
        self.normalize(text).map_err(|e| FieldFailure::Normalization {
            character: e.character,
            text: text.to_string(),
        })
    }
}

impl Default for DigitNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize with the default table.
pub fn normalize(text: &str) -> Result<String, NormalizeError> {
    DigitNormalizer::new().normalize(text)
}

/// Normalize with the default table, collapsing failure to `"ERROR"`.
pub fn normalize_field(text: &str) -> String {
    normalize(text).unwrap_or_else(|_| ERROR_SENTINEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_digits_pass_through() {
        for s in ["0", "0123456789", "000000", "9876543210123"] {
            assert_eq!(normalize_field(s), s);
        }
    }

    #[test]
    fn test_substitutions() {
        assert_eq!(normalize_field("S0"), "50");
        assert_eq!(normalize_field("SDOZBgI"), "5002891");
        assert_eq!(normalize_field("1O2B"), "1028");
        assert_eq!(normalize_field(&"S".repeat(64)), "5".repeat(64));
    }

    #[test]
    fn test_invalid_character_anywhere() {
        assert_eq!(normalize_field("12A"), ERROR_SENTINEL);
        assert_eq!(normalize_field("A12"), ERROR_SENTINEL);
        assert_eq!(normalize_field("1A2"), ERROR_SENTINEL);
        assert_eq!(normalize_field("12 3"), ERROR_SENTINEL);
        assert_eq!(normalize_field("1.5"), ERROR_SENTINEL);
    }

    #[test]
    fn test_table_is_case_sensitive() {
        for c in ['s', 'd', 'o', 'z', 'b', 'G', 'i'] {
            assert_eq!(normalize_field(&c.to_string()), ERROR_SENTINEL, "{c}");
        }
    }

    #[test]
    fn test_non_ascii_digits_rejected() {
        // Arabic-Indic and full-width digits are not meter digits.
        assert_eq!(normalize_field("١٢"), ERROR_SENTINEL);
        assert_eq!(normalize_field("１２"), ERROR_SENTINEL);
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), Ok(String::new()));
    }

    #[test]
    fn test_error_reports_first_offender() {
        let err = normalize("1xSy").unwrap_err();
        assert_eq!(
            err,
            NormalizeError {
                character: 'x',
                position: 1
            }
        );
    }

    #[test]
    fn test_idempotent() {
        for s in ["", "S0", "12A", "gIZ", "0042", "ERROR", "BOD"] {
            let once = normalize_field(s);
            assert_eq!(normalize_field(&once), once, "{s}");
        }
    }

    #[test]
    fn test_outcome_carries_text() {
        let failure = DigitNormalizer::new().normalize_outcome("7Q").unwrap_err();
        assert_eq!(
            failure,
            FieldFailure::Normalization {
                character: 'Q',
                text: "7Q".to_string()
            }
        );
    }
}
