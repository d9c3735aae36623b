//! Phone number canonicalization.
//!
//! Stored phone values are ASCII digits with an optional single leading `+`. Everything that
//! compares or persists a phone goes through [`normalize`].

/// Minimum digit count for a phone to be used for dedupe or as a lead's contact.
pub const MIN_USABLE_DIGITS: usize = 7;

/// Reduce `raw` to digits, keeping a leading `+` when the input starts with one.
///
/// Returns an empty string when there are no digits at all.
pub fn normalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return digits;
    }
    if raw.trim_start().starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}

pub fn digit_count(raw: &str) -> usize {
    raw.chars().filter(|c| c.is_ascii_digit()).count()
}

pub fn is_usable(raw: &str) -> bool {
    digit_count(raw) >= MIN_USABLE_DIGITS
}

/// Last four digits of the number, used to label stub leads.
pub fn last4(raw: &str) -> Option<String> {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].iter().collect())
}

/// `(904) 555-1234` style rendering for notifications; falls back to the input.
pub fn display(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return raw.to_string();
    }
    let last10 = &digits[digits.len() - 10..];
    format!("({}) {}-{}", &last10[..3], &last10[3..6], &last10[6..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_leading_plus_only() {
        assert_eq!(normalize("+1 (904) 555-1234"), "+19045551234");
        assert_eq!(normalize("904.555.1234"), "9045551234");
        assert_eq!(normalize("  +44 20 7946 0958"), "+442079460958");
        assert_eq!(normalize("call 9+04"), "904");
        assert_eq!(normalize("no digits"), "");
        assert_eq!(normalize("+"), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "+19045551234",
            "(904) 555-1234",
            " + 1 904 555 1234 ",
            "ext. 12",
            "",
            "++1-2",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "input {raw:?}");
            assert!(once
                .trim_start_matches('+')
                .chars()
                .all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn last4_and_usability() {
        assert_eq!(last4("+19045551234").as_deref(), Some("1234"));
        assert_eq!(last4("12"), None);
        assert!(is_usable("555-1234"));
        assert!(!is_usable("555-12"));
    }

    #[test]
    fn display_formats_last_ten_digits() {
        assert_eq!(display("+19045551234"), "(904) 555-1234");
        assert_eq!(display("5551234"), "5551234");
    }
}
