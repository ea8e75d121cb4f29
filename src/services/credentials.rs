//! Password protection for stored files.
//!
//! A file may carry an owner credential (an Argon2 PHC hash). Access is
//! granted when the file has no credential, when the supplied password
//! matches it, or when it matches the operator override configured for the
//! whole service.

use crate::services::file_store::{StoreError, StoreResult};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};

/// Hash `password` into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> StoreResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|err| StoreError::Credential(err.to_string()))?;
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|err| StoreError::Credential(err.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| StoreError::Credential(err.to_string()))?
        .to_string();
    Ok(phc)
}

fn owner_password_matches(phc: &str, password: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// The two credential kinds a protected file accepts.
#[derive(Clone, Default)]
pub struct CredentialPolicy {
    operator_override: Option<String>,
}

impl CredentialPolicy {
    /// `operator_override` opens every protected file. Empty means none.
    pub fn new(operator_override: Option<String>) -> Self {
        Self {
            operator_override: operator_override.filter(|value| !value.is_empty()),
        }
    }

    /// Decide whether `supplied` unlocks a file whose credential is `stored_hash`.
    ///
    /// An unprotected file always passes. An empty or absent password never
    /// unlocks a protected one, which is how callers ask "is this locked".
    pub fn permits(&self, stored_hash: Option<&str>, supplied: Option<&str>) -> bool {
        let Some(phc) = stored_hash else {
            return true;
        };
        let supplied = match supplied {
            Some(value) if !value.is_empty() => value,
            _ => return false,
        };
        if self.operator_override.as_deref() == Some(supplied) {
            return true;
        }
        owner_password_matches(phc, supplied)
    }
}

impl std::fmt::Debug for CredentialPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPolicy")
            .field("operator_override", &self.operator_override.as_ref().map(|_| "<set>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_phc() {
        let first = hash_password("secret").unwrap();
        let second = hash_password("secret").unwrap();
        assert!(first.starts_with("$argon2"));
        assert_ne!(first, second);
    }

    #[test]
    fn unprotected_file_always_permits() {
        let policy = CredentialPolicy::default();
        assert!(policy.permits(None, None));
        assert!(policy.permits(None, Some("")));
        assert!(policy.permits(None, Some("anything")));
    }

    #[test]
    fn protected_file_checks_owner_password() {
        let policy = CredentialPolicy::default();
        let phc = hash_password("open sesame").unwrap();
        assert!(policy.permits(Some(&phc), Some("open sesame")));
        assert!(!policy.permits(Some(&phc), Some("wrong")));
        assert!(!policy.permits(Some(&phc), Some("")));
        assert!(!policy.permits(Some(&phc), None));
    }

    #[test]
    fn operator_override_opens_protected_files() {
        let policy = CredentialPolicy::new(Some("admin-pass".into()));
        let phc = hash_password("owner").unwrap();
        assert!(policy.permits(Some(&phc), Some("admin-pass")));
        assert!(!policy.permits(Some(&phc), Some("admin")));
    }

    #[test]
    fn empty_override_is_ignored() {
        let policy = CredentialPolicy::new(Some(String::new()));
        let phc = hash_password("owner").unwrap();
        assert!(!policy.permits(Some(&phc), Some("")));
    }

    #[test]
    fn malformed_stored_hash_never_matches() {
        let policy = CredentialPolicy::default();
        assert!(!policy.permits(Some("not-a-phc"), Some("not-a-phc")));
    }

    #[test]
    fn debug_output_hides_override() {
        let policy = CredentialPolicy::new(Some("admin-pass".into()));
        assert!(!format!("{:?}", policy).contains("admin-pass"));
    }
}
