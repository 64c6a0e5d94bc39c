//! PostgreSQL credential registry
//!
//! Uniqueness and counter monotonicity are enforced by single statements
//! (`ON CONFLICT DO NOTHING`, conditional `UPDATE`) so concurrent requests on
//! different server instances cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use passkey_core::{
    AttestationFormat, CeremonyError, CoseAlgorithm, Credential, CredentialId,
    CredentialPublicKey, CredentialRegistry, Identity, Result,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::StorageError;

/// PostgreSQL-backed credential registry
pub struct PostgresCredentialRegistry {
    pool: PgPool,
}

fn query_error(e: sqlx::Error) -> CeremonyError {
    StorageError::Query(e.to_string()).into()
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

impl PostgresCredentialRegistry {
    /// Connect with a bounded pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> std::result::Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> std::result::Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    async fn stored_counter(&self, credential_id: &CredentialId) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT sign_count FROM credentials WHERE credential_id = $1")
            .bind(credential_id.as_bytes())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)
    }
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    handle: String,
    display_name: String,
    created_at: DateTime<Utc>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: row.id,
            handle: row.handle,
            display_name: row.display_name,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    credential_id: Vec<u8>,
    identity_id: Uuid,
    algorithm: i64,
    public_key: Vec<u8>,
    sign_count: i64,
    aaguid: Option<Uuid>,
    attestation_format: String,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl CredentialRow {
    fn into_credential(self) -> Result<Credential> {
        let algorithm = CoseAlgorithm::from_cose(self.algorithm).ok_or_else(|| {
            CeremonyError::Storage(format!("unknown stored algorithm {}", self.algorithm))
        })?;
        let sign_count = u32::try_from(self.sign_count).map_err(|_| {
            CeremonyError::Storage(format!("stored sign count {} out of range", self.sign_count))
        })?;

        Ok(Credential {
            credential_id: CredentialId::new(self.credential_id),
            identity_id: self.identity_id,
            public_key: CredentialPublicKey {
                algorithm,
                cose_key: self.public_key,
            },
            sign_count,
            aaguid: self.aaguid,
            attestation_format: AttestationFormat::from_stored(&self.attestation_format),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        })
    }
}

/// Joined credential + owner row
#[derive(sqlx::FromRow)]
struct OwnedCredentialRow {
    #[sqlx(flatten)]
    credential: CredentialRow,
    handle: String,
    display_name: String,
    identity_created_at: DateTime<Utc>,
}

const CREDENTIAL_COLUMNS: &str = "c.credential_id, c.identity_id, c.algorithm, c.public_key, \
     c.sign_count, c.aaguid, c.attestation_format, c.created_at, c.last_used_at";

#[async_trait]
impl CredentialRegistry for PostgresCredentialRegistry {
    async fn find_or_create_identity(&self, handle: &str, display_name: &str) -> Result<Identity> {
        let candidate = Identity::new(handle, display_name);
        let inserted = sqlx::query(
            r#"
            INSERT INTO identities (id, handle, display_name, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (handle) DO NOTHING
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.handle)
        .bind(&candidate.display_name)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?
        .rows_affected();

        if inserted == 1 {
            tracing::info!(handle = %handle, identity_id = %candidate.id, "Identity created");
            return Ok(candidate);
        }

        self.find_identity(handle)
            .await?
            .ok_or_else(|| CeremonyError::Storage(format!("identity {handle:?} vanished")))
    }

    async fn find_identity(&self, handle: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT id, handle, display_name, created_at FROM identities WHERE handle = $1",
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(row.map(Identity::from))
    }

    async fn add(&self, identity: &Identity, credential: Credential) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO credentials
                (credential_id, identity_id, algorithm, public_key, sign_count,
                 aaguid, attestation_format, created_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (credential_id) DO NOTHING
            "#,
        )
        .bind(credential.credential_id.as_bytes())
        .bind(identity.id)
        .bind(credential.public_key.algorithm.cose_id())
        .bind(&credential.public_key.cose_key)
        .bind(i64::from(credential.sign_count))
        .bind(credential.aaguid)
        .bind(credential.attestation_format.as_str())
        .bind(credential.created_at)
        .bind(credential.last_used_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(CeremonyError::Conflict("credential id already registered".into()))
            }
            Ok(_) => {
                tracing::info!(
                    credential_id = %credential.credential_id,
                    identity_id = %identity.id,
                    "Credential stored in database"
                );
                Ok(())
            }
            Err(e) if is_foreign_key_violation(&e) => Err(CeremonyError::not_found("identity")),
            Err(e) => Err(query_error(e)),
        }
    }

    async fn find_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Option<(Credential, Identity)>> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS}, i.handle, i.display_name, \
             i.created_at AS identity_created_at \
             FROM credentials c JOIN identities i ON i.id = c.identity_id \
             WHERE c.credential_id = $1"
        );
        let row = sqlx::query_as::<_, OwnedCredentialRow>(&sql)
            .bind(credential_id.as_bytes())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let owner = Identity {
            id: row.credential.identity_id,
            handle: row.handle,
            display_name: row.display_name,
            created_at: row.identity_created_at,
        };
        Ok(Some((row.credential.into_credential()?, owner)))
    }

    async fn list_by_identity(&self, identity: &Identity) -> Result<Vec<Credential>> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials c \
             WHERE c.identity_id = $1 ORDER BY c.created_at"
        );
        sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(identity.id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?
            .into_iter()
            .map(CredentialRow::into_credential)
            .collect()
    }

    async fn update_counter(
        &self,
        credential_id: &CredentialId,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<()> {
        let presented = i64::from(new_counter);
        let updated = sqlx::query(
            r#"
            UPDATE credentials
            SET sign_count = $2, last_used_at = $3
            WHERE credential_id = $1
              AND ($2 > sign_count OR ($2 = 0 AND sign_count = 0))
            "#,
        )
        .bind(credential_id.as_bytes())
        .bind(presented)
        .bind(used_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        // Distinguish an unknown credential from a counter that did not advance
        match self.stored_counter(credential_id).await? {
            None => Err(CeremonyError::not_found("credential")),
            Some(stored) => {
                let stored = u32::try_from(stored).unwrap_or(u32::MAX);
                tracing::warn!(
                    credential_id = %credential_id,
                    stored,
                    presented = new_counter,
                    "Signature counter did not advance"
                );
                Err(CeremonyError::ReplayDetected {
                    stored,
                    presented: new_counter,
                })
            }
        }
    }

    async fn delete_credentials(&self, identity: &Identity) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM credentials WHERE identity_id = $1")
            .bind(identity.id)
            .execute(&self.pool)
            .await
            .map_err(query_error)?
            .rows_affected();
        Ok(removed as usize)
    }

    async fn delete_identity(&self, identity: &Identity) -> Result<()> {
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(identity.id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(CeremonyError::not_found("identity")),
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => Err(CeremonyError::Conflict(
                "identity still owns credentials".into(),
            )),
            Err(e) => Err(query_error(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn check_health(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresCredentialRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCredentialRegistry")
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}
