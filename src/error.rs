use thiserror::Error;

#[derive(Error, Debug)]
pub enum KmsError {
    /// The secret service is unreachable, uninitialized, or sealed.
    /// Callers should short-circuit rather than retry a doomed operation.
    #[error("Secret service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A process key whose expiry has passed. Distinct from `NotFound` so
    /// callers can decide whether to trigger rotation.
    #[error("Key expired: {0}")]
    Expired(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption rejected. This includes: wrong key, tampered ciphertext,
    /// or an authenticated context that does not match the one used to wrap.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KmsError>;
