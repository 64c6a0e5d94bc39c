//! Credential registry backends
//!
//! Challenges always stay in memory: they are short-lived and must not survive
//! a restart. Identities and credentials go to PostgreSQL when `DATABASE_URL`
//! is set, otherwise to the in-memory registry (useful for development, but
//! credentials will be lost on restart).

mod postgres;

pub use postgres::PostgresCredentialRegistry;

use std::sync::Arc;

use passkey_core::{CeremonyError, CredentialRegistry, MemoryCredentialRegistry};

use crate::config::Config;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl From<StorageError> for CeremonyError {
    fn from(err: StorageError) -> Self {
        CeremonyError::Storage(err.to_string())
    }
}

/// Open the registry selected by configuration.
///
/// Uses PostgreSQL (running migrations) if `DATABASE_URL` is set, otherwise
/// falls back to in-memory storage.
pub async fn registry_from_config(
    config: &Config,
) -> Result<Arc<dyn CredentialRegistry>, StorageError> {
    match config.database_url.as_deref() {
        Some(url) => {
            let registry =
                PostgresCredentialRegistry::connect(url, config.database_max_connections).await?;
            registry.migrate().await?;
            Ok(Arc::new(registry))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set - using in-memory credential registry, credentials will be lost on restart!"
            );
            Ok(Arc::new(MemoryCredentialRegistry::new()))
        }
    }
}
