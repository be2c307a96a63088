use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a presented bearer token against a stored digest in constant time.
pub fn verify_token(presented: &str, expected_hash: &str) -> bool {
    let presented_hash = hash_token(presented);
    presented_hash
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_token("admin-secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("admin-secret"));
    }

    #[test]
    fn verify_accepts_only_the_matching_token() {
        let stored = hash_token("admin-secret");
        assert!(verify_token("admin-secret", &stored));
        assert!(!verify_token("admin-secreT", &stored));
        assert!(!verify_token("", &stored));
        assert!(!verify_token("admin-secret", "not-a-digest"));
        assert!(!verify_token("admin-secret", &stored[..32]));
        assert!(!verify_token("admin-secret", &stored.to_uppercase()));
    }

    #[test]
    fn bearer_token_parses_scheme_case_insensitively() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
