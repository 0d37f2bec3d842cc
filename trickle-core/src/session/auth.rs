//! Challenge-response login.
//!
//! ```text
//! response = hex(blake3(challenge || blake3(salt || password)))
//! ```
//!
//! The host only ever needs `blake3(salt || password)`, so a stored
//! credential never holds the plain password.

/// Host-side stored credential.
pub fn password_digest(salt: &str, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize()
}

fn respond(challenge: &str, digest: &blake3::Hash) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(challenge.as_bytes());
    hasher.update(digest.as_bytes());
    hasher.finalize()
}

/// Viewer-side answer to a `Challenge`.
pub fn login_response(challenge: &str, salt: &str, password: &str) -> String {
    respond(challenge, &password_digest(salt, password))
        .to_hex()
        .to_string()
}

/// Check a viewer's `Login` response. The comparison is constant time.
pub fn verify_response(response: &str, challenge: &str, digest: &blake3::Hash) -> bool {
    match blake3::Hash::from_hex(response) {
        Ok(given) => given == respond(challenge, digest),
        Err(_) => false,
    }
}

/// Fresh random token for session ids, salts and challenges.
pub fn random_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_password_verifies() {
        let digest = password_digest("salt", "hunter2");
        let response = login_response("abc", "salt", "hunter2");
        assert_eq!(response.len(), 64);
        assert!(verify_response(&response, "abc", &digest));
    }

    #[test]
    fn wrong_password_or_challenge_fails() {
        let digest = password_digest("salt", "hunter2");
        assert!(!verify_response(&login_response("abc", "salt", "hunter3"), "abc", &digest));
        assert!(!verify_response(&login_response("abd", "salt", "hunter2"), "abc", &digest));
        assert!(!verify_response("not hex", "abc", &digest));
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(random_token(), random_token());
        assert_eq!(random_token().len(), 32);
    }
}
