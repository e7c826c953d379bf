//! Effective execution identity and its resolution seam.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::TenantId;

/// Name of the built-in administrative user.
pub const ADMIN_USER: &str = "admin";

/// Name of the temporary scratch tenant.
pub const TEMP_TENANT: &str = "-temp-";

/// The identity a piece of work executes under.
///
/// Identities are plain values passed explicitly through every call; there is
/// no ambient "current user". Deriving a new identity for impersonation never
/// touches the one the caller holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Tenant the work is scoped to.
    pub tenant: TenantId,
    /// User name within the tenant.
    pub user: String,
}

impl Identity {
    /// Creates an identity for a named user on a tenant.
    pub fn user(tenant: TenantId, user: impl Into<String>) -> Self {
        Self {
            tenant,
            user: user.into(),
        }
    }

    /// Creates the administrative identity for a tenant.
    pub fn admin(tenant: TenantId) -> Self {
        Self::user(tenant, ADMIN_USER)
    }

    /// Creates the administrative identity on the temporary tenant.
    pub fn temp() -> Self {
        Self::admin(TenantId::new(TEMP_TENANT))
    }

    /// Returns true for the administrative user.
    pub fn is_admin(&self) -> bool {
        self.user == ADMIN_USER
    }

    /// Derives an identity for another user on the same tenant.
    pub fn as_user(&self, user: impl Into<String>) -> Self {
        Self::user(self.tenant.clone(), user)
    }

    /// Derives the administrative identity on another tenant.
    pub fn on_tenant(&self, tenant: TenantId) -> Self {
        Self::admin(tenant)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.tenant)
    }
}

/// Errors raised while resolving an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The authority reference does not exist.
    #[error("Unknown authority: {0}")]
    UnknownAuthority(String),

    /// The tenant does not exist.
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),
}

/// Resolves authority references and tenant names into effective identities.
///
/// The full authentication subsystem lives outside this core; consumers only
/// need these two lookups.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves an explicit authority reference (e.g. `"alice@acme"`).
    async fn resolve_authority(&self, authority: &str) -> Result<Identity, IdentityError>;

    /// Resolves a bare tenant name into that tenant's administrative identity.
    async fn resolve_tenant(&self, tenant: &str) -> Result<Identity, IdentityError>;
}

/// Identity provider backed by a fixed authority table.
///
/// Tenants are accepted implicitly; authorities must be registered first.
/// Suitable for tests and single-node deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    authorities: Arc<RwLock<HashMap<String, Identity>>>,
}

impl StaticIdentityProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an authority reference.
    pub fn register(&self, authority: impl Into<String>, identity: Identity) {
        self.authorities
            .write()
            .unwrap()
            .insert(authority.into(), identity);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve_authority(&self, authority: &str) -> Result<Identity, IdentityError> {
        self.authorities
            .read()
            .unwrap()
            .get(authority)
            .cloned()
            .ok_or_else(|| IdentityError::UnknownAuthority(authority.to_string()))
    }

    async fn resolve_tenant(&self, tenant: &str) -> Result<Identity, IdentityError> {
        Ok(Identity::admin(TenantId::new(tenant)))
    }
}
