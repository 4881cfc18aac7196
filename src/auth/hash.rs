use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

use crate::config::HashingSettings;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(argon2::Error),

    #[error("failed to hash password: {0}")]
    Hash(argon2::password_hash::Error),
}

/// Salted Argon2id hasher with a configurable work factor.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    pub fn new(settings: &HashingSettings) -> Result<PasswordHasher, HashError> {
        let params = Params::new(
            settings.memory_kib,
            settings.iterations,
            settings.parallelism,
            None,
        )
        .map_err(HashError::Params)?;

        Ok(PasswordHasher { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a plaintext password to a PHC string (`$argon2id$v=19$...`).
    pub fn hash(&self, password: &str) -> Result<String, HashError> {
        use argon2::password_hash::PasswordHasher as _;

        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(HashError::Hash)?
            .to_string();

        Ok(password_hash)
    }

    /// Check a plaintext password against a stored PHC string.
    ///
    /// The HTTP service never authenticates anyone, so only library callers
    /// use this.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };

        // Params are read back from the PHC string
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}
