//! WhatsApp phone number normalisation for chats started from the
//! dashboard.

/// Normalises a user-typed phone number into the digits-only international
/// form the Cloud API expects.
///
/// A leading `+` and every non-digit are dropped; when the result does not
/// already start with `default_country_code`, that code is prefixed. Returns
/// `None` when no digits remain.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }

    if default_country_code.is_empty() || digits.starts_with(default_country_code)
    {
        Some(digits)
    } else {
        Some(format!("{default_country_code}{digits}"))
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_phone;

    #[test]
    fn local_number_gets_country_code() {
        assert_eq!(
            normalize_phone("70 123 456", "961").as_deref(),
            Some("96170123456")
        );
    }

    #[test]
    fn international_forms_are_kept() {
        assert_eq!(
            normalize_phone("+961 70-123-456", "961").as_deref(),
            Some("96170123456")
        );
        assert_eq!(
            normalize_phone("96170123456", "961").as_deref(),
            Some("96170123456")
        );
    }

    #[test]
    fn blank_or_digitless_input_is_rejected() {
        assert_eq!(normalize_phone("   ", "961"), None);
        assert_eq!(normalize_phone("+", "961"), None);
        assert_eq!(normalize_phone("call me", "961"), None);
    }

    #[test]
    fn empty_country_code_leaves_digits_alone() {
        assert_eq!(normalize_phone("4479000", "").as_deref(), Some("4479000"));
    }
}
