// ── Mnema Atoms: Memory Ids ────────────────────────────────────────────────
// Every row in both stores is keyed by a ULID: a 26-character, uppercase
// Crockford-base32 string whose leading 10 characters encode the creation
// timestamp. Sorting ids lexicographically therefore sorts by creation time,
// which the timeline and watermark queries rely on.

use crate::atoms::error::{EngineError, EngineResult};

/// Crockford base32 alphabet used by ULIDs (no I, L, O, U).
const CROCKFORD: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of a canonical ULID string.
pub const ID_LEN: usize = 26;

/// Mint a fresh time-prefixed id.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Structural check: 26 characters, all from the Crockford alphabet.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| CROCKFORD.contains(&b))
}

/// Validate an id at a store boundary, naming the offender on failure.
pub fn validate_id(id: &str) -> EngineResult<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(EngineError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_valid() {
        for _ in 0..100 {
            let id = new_id();
            assert_eq!(id.len(), 26);
            assert!(is_valid_id(&id), "generated id failed validation: {}", id);
        }
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert!(a < b, "later id should sort after earlier id");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("0123456789012345678901234L")); // L not in alphabet
        assert!(!is_valid_id("01hgw2bkrn8e5x3qvt7jyfm9zu")); // lowercase
        assert!(!is_valid_id("01HGW2BKRN8E5X3QVT7JYFM9Z")); // 25 chars
        assert!(is_valid_id("01HGW2BKRN8E5X3QVT7JYFM9ZA"));
    }
}
