//! Password Service
//!
//! Argon2id hashing into PHC strings, with a configurable password policy.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::debug;

use gk_config::PasswordConfig;

use crate::principal::PasswordCredential;
use crate::shared::error::{AccessError, Result};

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;':\",./<>?`~\\";

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl From<&PasswordConfig> for PasswordPolicy {
    fn from(config: &PasswordConfig) -> Self {
        Self {
            min_length: config.min_length,
            max_length: config.max_length,
            require_uppercase: config.require_uppercase,
            require_lowercase: config.require_lowercase,
            require_digit: config.require_digit,
            require_special: config.require_special,
        }
    }
}

impl PasswordPolicy {
    /// Every rule the password breaks.
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut errors = Vec::new();
        let length = password.chars().count();

        if length < self.min_length {
            errors.push(format!("Password must be at least {} characters", self.min_length));
        }
        if length > self.max_length {
            errors.push(format!("Password must be at most {} characters", self.max_length));
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one digit".to_string());
        }
        if self.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            errors.push("Password must contain at least one special character".to_string());
        }
        errors
    }

    pub fn validate(&self, password: &str) -> Result<()> {
        let errors = self.violations(password);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AccessError::validation("PASSWORD_POLICY", errors.join("; ")))
        }
    }
}

/// Hashed once at startup with the configured costs. Unknown logins verify
/// against it so they cost the same Argon2 work as a wrong password.
const DUMMY_PASSWORD: &str = "gatekeeper-unknown-principal";

pub struct PasswordService {
    argon2: Argon2<'static>,
    policy: PasswordPolicy,
    dummy: PasswordCredential,
}

impl PasswordService {
    pub fn from_config(config: &PasswordConfig) -> Result<Self> {
        let params = Params::new(config.memory_cost, config.time_cost, config.parallelism, None)
            .map_err(|e| AccessError::configuration(format!("Invalid Argon2 params: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy = Self::hash_with(&argon2, DUMMY_PASSWORD)?;
        Ok(Self {
            argon2,
            policy: PasswordPolicy::from(config),
            dummy,
        })
    }

    fn hash_with(argon2: &Argon2<'static>, password: &str) -> Result<PasswordCredential> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AccessError::internal(format!("Failed to hash password: {}", e)))?;
        PasswordCredential::from_hash(hash.to_string())
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Check the policy, then hash.
    pub fn hash_password(&self, password: &str) -> Result<PasswordCredential> {
        self.policy.validate(password)?;
        let credential = Self::hash_with(&self.argon2, password)?;
        debug!("Password hashed");
        Ok(credential)
    }

    /// Hash costs are read from the stored PHC string, so hashes made with
    /// older parameters keep verifying.
    pub fn verify_password(&self, password: &str, credential: &PasswordCredential) -> Result<bool> {
        let parsed = PasswordHash::new(credential.as_str())
            .map_err(|e| AccessError::internal(format!("Invalid password hash format: {}", e)))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AccessError::internal(format!("Password verification error: {}", e))),
        }
    }

    /// Burn one verification for a login that matched no principal.
    pub fn verify_unknown_principal(&self, password: &str) {
        let _ = self.verify_password(password, &self.dummy);
    }

    pub fn needs_rehash(&self, credential: &PasswordCredential) -> bool {
        match PasswordHash::new(credential.as_str()) {
            Ok(parsed) => parsed.algorithm != Algorithm::Argon2id.ident(),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PasswordService {
        PasswordService::from_config(&PasswordConfig::testing()).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let service = service();
        let credential = service.hash_password("correct horse").unwrap();

        assert!(credential.as_str().starts_with("$argon2id$"));
        assert!(service.verify_password("correct horse", &credential).unwrap());
        assert!(!service.verify_password("wrong horse", &credential).unwrap());
        assert!(!service.needs_rehash(&credential));
    }

    #[test]
    fn test_same_password_different_salt() {
        let service = service();
        let a = service.hash_password("password123").unwrap();
        let b = service.hash_password("password123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_policy_violations() {
        let policy = PasswordPolicy::from(&PasswordConfig::default());
        assert_eq!(policy.violations("short").len(), 4);
        assert!(policy.violations("Str0ng!Passw0rd").is_empty());

        let err = policy.validate("short").unwrap_err();
        assert_eq!(err.code(), "PASSWORD_POLICY");
    }

    #[test]
    fn test_dummy_credential_uses_configured_costs() {
        let service = service();
        assert!(service.dummy.as_str().starts_with("$argon2id$v=19$m=4096,t=1,p=1$"));
        assert!(!service.verify_password("correct horse", &service.dummy).unwrap());
        service.verify_unknown_principal("correct horse");
    }

    #[test]
    fn test_policy_applied_before_hashing() {
        assert!(service().hash_password("short").is_err());
    }
}
