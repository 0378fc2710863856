//! Password credentials
//!
//! Secrets are never stored. A [`Credential`] holds an Argon2id hash in PHC
//! string form, which carries its own salt and parameters.

use std::fmt;

use argon2::{
    Argon2,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::UsersError;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential {
    phc: String,
}

impl Credential {
    /// Hash `secret` under a freshly generated salt
    ///
    /// # Errors
    /// If Argon2 rejects the input
    pub fn new(secret: &str) -> crate::Result<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| UsersError::Credential(e.to_string()))?;

        Ok(Self {
            phc: hash.to_string(),
        })
    }

    /// Whether `attempt` is the secret this credential was created from.
    ///
    /// A stored hash that does not parse never verifies.
    #[must_use]
    pub fn verify(&self, attempt: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.phc) else {
            return false;
        };

        match Argon2::default().verify_password(attempt.as_bytes(), &parsed) {
            Ok(()) => true,
            Err(password_hash::Error::Password) => false,
            Err(e) => {
                mailet_common::internal!(level = WARN, "Credential verification failed: {e}");
                false
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let credential = Credential::new("hunter2").unwrap();

        assert!(credential.verify("hunter2"));
        assert!(!credential.verify("hunter3"));
        assert!(!credential.verify(""));
    }

    #[test]
    fn test_stored_as_argon2id_phc() {
        let credential = Credential::new("hunter2").unwrap();

        assert!(credential.phc.starts_with("$argon2id$"));
        assert!(!credential.phc.contains("hunter2"));
    }

    #[test]
    fn test_salt_differs_per_credential() {
        let a = Credential::new("same").unwrap();
        let b = Credential::new("same").unwrap();

        assert_ne!(a, b);
        assert!(a.verify("same") && b.verify("same"));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        let credential = Credential {
            phc: "not a hash".to_string(),
        };

        assert!(!credential.verify("not a hash"));
    }

    #[test]
    fn test_debug_does_not_leak() {
        let credential = Credential::new("hunter2").unwrap();
        let debug = format!("{credential:?}");

        assert!(!debug.contains(&credential.phc));
    }
}
