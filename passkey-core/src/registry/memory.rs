//! In-memory registry backend
//!
//! Used as the development fallback when no database is configured, and as the
//! test double. Data is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use super::CredentialRegistry;
use crate::error::{CeremonyError, Result};
use crate::model::{Credential, CredentialId, Identity};
use crate::verifier::check_sign_count;

/// Thread-safe in-memory identity and credential storage
#[derive(Default)]
pub struct MemoryCredentialRegistry {
    /// handle -> identity id
    handles: DashMap<String, Uuid>,
    /// identity id -> identity
    identities: DashMap<Uuid, Identity>,
    /// credential id -> credential
    credentials: DashMap<CredentialId, Credential>,
}

impl MemoryCredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn identity(&self, id: Uuid) -> Option<Identity> {
        self.identities.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of stored credentials
    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }
}

#[async_trait]
impl CredentialRegistry for MemoryCredentialRegistry {
    async fn find_or_create_identity(&self, handle: &str, display_name: &str) -> Result<Identity> {
        match self.handles.entry(handle.to_string()) {
            Entry::Occupied(entry) => self
                .identity(*entry.get())
                .ok_or_else(|| CeremonyError::Storage("dangling identity handle".into())),
            Entry::Vacant(entry) => {
                let identity = Identity::new(handle, display_name);
                self.identities.insert(identity.id, identity.clone());
                entry.insert(identity.id);
                tracing::info!(handle = %handle, identity_id = %identity.id, "Identity created");
                Ok(identity)
            }
        }
    }

    async fn find_identity(&self, handle: &str) -> Result<Option<Identity>> {
        let id = match self.handles.get(handle) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        Ok(self.identity(id))
    }

    async fn add(&self, identity: &Identity, mut credential: Credential) -> Result<()> {
        // Held until the insert so `delete_identity` cannot interleave
        let Some(_owner) = self.identities.get(&identity.id) else {
            return Err(CeremonyError::not_found("identity"));
        };
        credential.identity_id = identity.id;

        match self.credentials.entry(credential.credential_id.clone()) {
            Entry::Occupied(_) => Err(CeremonyError::Conflict(
                "credential id already registered".into(),
            )),
            Entry::Vacant(entry) => {
                entry.insert(credential);
                Ok(())
            }
        }
    }

    async fn find_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Option<(Credential, Identity)>> {
        let credential = match self.credentials.get(credential_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        let owner = self
            .identity(credential.identity_id)
            .ok_or_else(|| CeremonyError::Storage("credential owner missing".into()))?;
        Ok(Some((credential, owner)))
    }

    async fn list_by_identity(&self, identity: &Identity) -> Result<Vec<Credential>> {
        Ok(self
            .credentials
            .iter()
            .filter(|entry| entry.identity_id == identity.id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_counter(
        &self,
        credential_id: &CredentialId,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut entry = self
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| CeremonyError::not_found("credential"))?;

        check_sign_count(entry.sign_count, new_counter)?;
        entry.sign_count = new_counter;
        entry.last_used_at = Some(used_at);
        Ok(())
    }

    async fn delete_credentials(&self, identity: &Identity) -> Result<usize> {
        let before = self.credentials.len();
        self.credentials
            .retain(|_, credential| credential.identity_id != identity.id);
        Ok(before.saturating_sub(self.credentials.len()))
    }

    async fn delete_identity(&self, identity: &Identity) -> Result<()> {
        // The entry lock blocks concurrent `add` calls for this identity
        let Entry::Occupied(entry) = self.identities.entry(identity.id) else {
            return Err(CeremonyError::not_found("identity"));
        };
        if self
            .credentials
            .iter()
            .any(|credential| credential.identity_id == identity.id)
        {
            return Err(CeremonyError::Conflict(
                "identity still owns credentials".into(),
            ));
        }

        entry.remove();
        self.handles.remove(&identity.handle);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryCredentialRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialRegistry")
            .field("identities", &self.identities.len())
            .field("credentials", &self.credentials.len())
            .finish()
    }
}
