//! Remaining out-of-scope collaborator contracts named in spec.md §6:
//! identity and audit. Concrete OAuth/SAML/LDAP and audit-log persistence
//! are out of scope for the core; only the trait boundary is defined here.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> anyhow::Result<Principal>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    pub detail: String,
    pub timestamp_ms: i64,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Accepts every token as a fixed principal; useful for local/dev runs and
/// tests that need an `IdentityProvider` without a real backing service.
pub struct AllowAllIdentityProvider;

#[async_trait]
impl IdentityProvider for AllowAllIdentityProvider {
    async fn authenticate(&self, token: &str) -> anyhow::Result<Principal> {
        Ok(Principal {
            subject: token.to_string(),
            roles: vec!["admin".to_string()],
        })
    }
}

/// Discards events; keeps the trait boundary exercisable without a real
/// audit store.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn log(&self, _event: AuditEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
