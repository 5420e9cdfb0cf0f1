//! UUID v7 utilities for time-ordered identifiers.
//!
//! UUIDv7 (RFC 9562) embeds a millisecond Unix timestamp in the first 48
//! bits, so identifiers generated later sort lexicographically greater.
//! Jobs, audit entries, and snapshots all use v7 keys, which keeps the
//! worker's keyset pagination and `ORDER BY created_at` scans aligned
//! with primary-key order.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_v7() {
        let id = new_v7();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_new_v7_time_ordered() {
        let a = new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_v7();
        assert!(a < b);
    }
}
