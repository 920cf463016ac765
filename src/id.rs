//! Cluster Identity
//!
//! Generates and validates the cluster UUID that is assigned once at
//! genesis and carried by every cluster map thereafter.

/// Minimum accepted length of a cluster UUID
const MIN_UUID_LEN: usize = 9;

/// Generate a new cluster UUID
pub fn gen_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Check that a string is usable as a cluster UUID
///
/// Accepts ASCII alphanumerics plus `-` and `_`, must start with an
/// alphanumeric and be at least [`MIN_UUID_LEN`] characters long.
pub fn is_valid_uuid(s: &str) -> bool {
    if s.len() < MIN_UUID_LEN {
        return false;
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_uuid_is_valid() {
        let a = gen_uuid();
        let b = gen_uuid();
        assert!(is_valid_uuid(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_uuid_validation() {
        assert!(is_valid_uuid("cluster-A"));
        assert!(is_valid_uuid("Zq3_x9-kLm"));
        assert!(!is_valid_uuid(""));
        assert!(!is_valid_uuid("short"));
        assert!(!is_valid_uuid("-leading-dash"));
        assert!(!is_valid_uuid("has space inside"));
    }
}
