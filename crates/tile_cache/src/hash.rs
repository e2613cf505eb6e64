//! Content fingerprint of the active venue set.

use common::VenueSample;
use sha2::{Digest, Sha256};

/// Hex characters kept from the SHA-256 digest.
const HASH_LEN: usize = 16;

/// Hash over `"{id}:{occupancy}"` for every active venue, sorted and joined.
///
/// Any occupancy change produces a different hash, which invalidates
/// persisted tiles rendered from the old state.
pub fn venue_hash(venues: &[VenueSample]) -> String {
    let mut parts: Vec<String> = venues
        .iter()
        .filter(|v| v.is_active())
        .map(|v| format!("{}:{}", v.id, v.occupancy))
        .collect();
    parts.sort();

    let digest = Sha256::digest(parts.join("|").as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(id: &str, occupancy: u32) -> VenueSample {
        VenueSample {
            id: id.into(),
            lng: 153.0,
            lat: -27.47,
            capacity: 100,
            occupancy,
            rating: None,
        }
    }

    #[test]
    fn test_order_independent() {
        let a = vec![venue("a", 10), venue("b", 20)];
        let b = vec![venue("b", 20), venue("a", 10)];
        assert_eq!(venue_hash(&a), venue_hash(&b));
        assert_eq!(venue_hash(&a).len(), 16);
    }

    #[test]
    fn test_occupancy_change_changes_hash() {
        let before = vec![venue("a", 10), venue("b", 20)];
        let after = vec![venue("a", 11), venue("b", 20)];
        assert_ne!(venue_hash(&before), venue_hash(&after));
    }

    #[test]
    fn test_inactive_venues_ignored() {
        let with_empty = vec![venue("a", 10), venue("b", 0)];
        let without = vec![venue("a", 10)];
        assert_eq!(venue_hash(&with_empty), venue_hash(&without));
    }
}
