//! Identity and credential persistence contract
//!
//! The ceremony service only talks to storage through [`CredentialRegistry`].
//! Implementations must make [`CredentialRegistry::add`] a single atomic
//! check-and-insert on the credential id across *all* identities, and
//! [`CredentialRegistry::update_counter`] a single conditional update that
//! re-applies the sign-counter rule.
//!
//! Ownership is not cascaded: removing an identity is an explicit two-step
//! sequence, [`CredentialRegistry::delete_credentials`] then
//! [`CredentialRegistry::delete_identity`].

mod memory;

pub use memory::MemoryCredentialRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Credential, CredentialId, Identity};

#[async_trait]
pub trait CredentialRegistry: Send + Sync {
    /// Look up an identity by handle, creating it with `display_name` if absent.
    ///
    /// An existing identity is returned unchanged.
    async fn find_or_create_identity(&self, handle: &str, display_name: &str) -> Result<Identity>;

    /// Look up an identity by handle.
    async fn find_identity(&self, handle: &str) -> Result<Option<Identity>>;

    /// Insert a credential owned by `identity`.
    ///
    /// Fails with `Conflict` if the credential id is already registered to any
    /// identity, and `NotFound` if the identity does not exist.
    async fn add(&self, identity: &Identity, credential: Credential) -> Result<()>;

    /// Find a credential together with its owning identity.
    async fn find_by_credential_id(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Option<(Credential, Identity)>>;

    /// All credentials owned by `identity`, in no particular order.
    async fn list_by_identity(&self, identity: &Identity) -> Result<Vec<Credential>>;

    /// Record a successful assertion.
    ///
    /// Fails with `NotFound` for an unknown credential, and with
    /// `ReplayDetected` if `new_counter` does not advance the stored value.
    async fn update_counter(
        &self,
        credential_id: &CredentialId,
        new_counter: u32,
        used_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove every credential owned by `identity`. Returns how many were removed.
    async fn delete_credentials(&self, identity: &Identity) -> Result<usize>;

    /// Remove an identity that owns no credentials.
    ///
    /// Fails with `Conflict` while credentials remain, `NotFound` if absent.
    async fn delete_identity(&self, identity: &Identity) -> Result<()>;

    /// Short backend label for health reporting
    fn backend_name(&self) -> &'static str;

    /// Check backend connectivity (always Ok for in-process backends)
    async fn check_health(&self) -> Result<()> {
        Ok(())
    }
}
