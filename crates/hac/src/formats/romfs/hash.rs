//! Hash-bucket sizing and the entry hash function used by both the
//! directory and file hash tables.

const PRIMES: [u32; 7] = [2, 3, 5, 7, 11, 13, 17];

/// Chooses a hash bucket count for `n` entries: small tables get a fixed or
/// odd size, larger ones step up from `n` until landing on a value coprime
/// to the first seven primes (keeps bucket chains short and roughly even).
pub fn hash_table_count(n: u32) -> u32 {
    if n < 3 {
        3
    } else if n < 19 {
        n | 1
    } else {
        let mut count = n;
        while PRIMES.iter().any(|p| count % p == 0) {
            count += 1;
        }
        count
    }
}

/// Hashes an entry's `(parentOffset, name)` pair into a bucket index.
pub fn entry_hash(parent_offset: u32, name: &[u8], bucket_count: u32) -> u32 {
    let mut hash = parent_offset ^ 0x075B_CD15;
    for &b in name {
        hash = hash.rotate_right(5);
        hash ^= b as u32;
    }
    hash % bucket_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_count_small_tables() {
        assert_eq!(hash_table_count(0), 3);
        assert_eq!(hash_table_count(2), 3);
        assert_eq!(hash_table_count(3), 3);
        assert_eq!(hash_table_count(4), 5);
        assert_eq!(hash_table_count(18), 19);
    }

    #[test]
    fn bucket_count_large_tables_are_coprime_to_small_primes() {
        for n in [19, 20, 100, 1000, 12345] {
            let count = hash_table_count(n);
            assert!(count >= n);
            for p in PRIMES {
                assert_ne!(count % p, 0);
            }
        }
    }

    #[test]
    fn root_hash_uses_empty_name() {
        let h = entry_hash(0, b"", 3);
        assert_eq!(h, 123456789u32 % 3);
    }
}
