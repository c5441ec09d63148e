// Small string helpers used by metadata file naming and result tables.

use sha2::{Digest, Sha256};

/// Replace every character outside `[A-Za-z0-9_]` so the result is safe to
/// embed in a filename or a table name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Hex digest used to key result resources (`/result/<hash>`).
pub fn hash_name(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    // 16 bytes of digest is plenty for a unique result name.
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_word_chars() {
        assert_eq!(sanitize_name("LSST_DR1"), "LSST_DR1");
        assert_eq!(sanitize_name("sky survey-2"), "sky_survey_2");
        assert_eq!(sanitize_name("a/b.c"), "a_b_c");
    }

    #[test]
    fn hash_name_is_stable_and_hex() {
        let h1 = hash_name("SELECT 1");
        let h2 = hash_name("SELECT 1");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(h1, hash_name("SELECT 2"));
    }
}
