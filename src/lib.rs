//! Three-tier key hierarchy and envelope encryption for the
//! performance-review platform.
//!
//! The rest of the application calls into this crate to obtain encryption
//! keys for sensitive free-text fields (reviewer justifications, assessment
//! content). Keys are organized in three tiers: a system master key held
//! entirely inside an external secret service, one asymmetric keypair per
//! user, and one symmetric key per process. Per-operation data-encryption
//! keys are derived by combining the user and process tiers and are never
//! persisted.

pub mod config;
pub mod crypto;
pub mod error;
pub mod manager;
pub mod secrets;
pub mod state;

pub use config::VaultConfig;
pub use error::{KmsError, Result};
pub use manager::{KeyManager, DEFAULT_SYSTEM_KEY};
pub use secrets::{EncryptionContext, SecretsClient};
