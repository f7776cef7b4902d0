//! Internal helpers for model validation.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation so every entity constructor enforces the same rules.

use unicode_normalization::UnicodeNormalization;

use crate::{LedgerError, MoneyCents, ResultLedger};

/// Trim and NFC-normalize a required name.
pub(crate) fn normalize_required_name(value: &str, label: &str) -> ResultLedger<String> {
    let normalized: String = value.trim().nfc().collect();
    if normalized.is_empty() {
        return Err(LedgerError::InvalidName(format!(
            "{label} name must not be empty"
        )));
    }
    Ok(normalized)
}

/// Key used to detect duplicate names ("Groceries" == " groceries").
pub(crate) fn name_key(value: &str) -> String {
    value.trim().nfc().collect::<String>().to_lowercase()
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

pub(crate) fn ensure_positive(amount: MoneyCents, label: &str) -> ResultLedger<()> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount(format!("{label} must be > 0")));
    }
    Ok(())
}

pub(crate) fn ensure_non_negative(amount: MoneyCents, label: &str) -> ResultLedger<()> {
    if amount.is_negative() {
        return Err(LedgerError::InvalidAmount(format!("{label} must be >= 0")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_composed() {
        // "e" + combining acute accent composes to "é".
        let name = normalize_required_name("  Caffe\u{301} ", "envelope").unwrap();
        assert_eq!(name, "Caff\u{e9}");
        assert!(normalize_required_name("   ", "envelope").is_err());
        assert_eq!(name_key(" Groceries"), name_key("groceries"));
    }
}
