use uuid::Uuid;

/// Generate a 6-character alphanumeric room code, canonically upper-case.
pub fn generate_room_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

/// Canonicalize user input: trimmed, upper-cased, exactly 6 alphanumerics.
pub fn normalize_room_code(input: &str) -> Option<String> {
    let code = input.trim().to_uppercase();
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(code)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_upper_case_alphanumerics() {
        for _ in 0..20 {
            let code = generate_room_code();
            assert_eq!(code.len(), 6);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn normalization_is_case_insensitive() {
        assert_eq!(normalize_room_code("ab12cd"), Some("AB12CD".to_string()));
        assert_eq!(normalize_room_code("  AB12CD "), Some("AB12CD".to_string()));
    }

    #[test]
    fn rejects_wrong_length_or_symbols() {
        assert_eq!(normalize_room_code("AB12C"), None);
        assert_eq!(normalize_room_code("AB12CD7"), None);
        assert_eq!(normalize_room_code("AB-2CD"), None);
        assert_eq!(normalize_room_code(""), None);
    }
}
