use std::sync::Arc;

use chrono::Utc;
use kg_core::{AdminToken, AdminTokenId};
use kg_state::{KeyKind, StateKey, StateStore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;
use uuid::Uuid;

use crate::error::GatewayError;

const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

fn fingerprint(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Mints, lists, revokes, and validates the admin tokens that gate every
/// protected gateway route. Each token is stored as a bcrypt hash plus a
/// SHA-256 fingerprint: the fingerprint gives a cheap, constant-time-compared
/// candidate filter over the (small) token set, and bcrypt does the actual
/// credential verification.
pub struct AdminTokenStore {
    state: Arc<dyn StateStore>,
}

impl AdminTokenStore {
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(id: &AdminTokenId) -> StateKey {
        StateKey::new(KeyKind::AdminToken, id.as_str())
    }

    async fn persist(&self, token: &AdminToken) -> Result<(), GatewayError> {
        let raw = serde_json::to_string(token)?;
        self.state.set(&Self::key(&token.id), &raw, None).await?;
        Ok(())
    }

    async fn mint_with(&self, raw_token: &str, scopes: Vec<String>) -> Result<AdminToken, GatewayError> {
        let hash = bcrypt::hash(raw_token, BCRYPT_COST)?;
        let token = AdminToken {
            id: AdminTokenId::new(),
            fingerprint: fingerprint(raw_token),
            hash,
            scopes,
            created_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
        };
        self.persist(&token).await?;
        Ok(token)
    }

    /// Mint a fresh admin token with a random plaintext, returned once.
    pub async fn mint(&self, scopes: Vec<String>) -> Result<(AdminToken, String), GatewayError> {
        let raw_token = format!("kg_{}", Uuid::new_v4().simple());
        let token = self.mint_with(&raw_token, scopes).await?;
        info!(token_id = %token.id, "admin token minted");
        Ok((token, raw_token))
    }

    /// Hash and persist the bootstrap config token on first run. A no-op if
    /// any admin token already exists, so restarts don't mint duplicates.
    pub async fn bootstrap(&self, raw_token: &str) -> Result<(), GatewayError> {
        if !self.list().await?.is_empty() {
            return Ok(());
        }
        self.mint_with(raw_token, vec!["admin".to_owned()]).await?;
        info!("bootstrap admin token hashed and stored");
        Ok(())
    }

    /// All tokens, hashes only (never the plaintext, which is never stored).
    pub async fn list(&self) -> Result<Vec<AdminToken>, GatewayError> {
        let mut tokens = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::AdminToken).await? {
            match serde_json::from_str::<AdminToken>(&value) {
                Ok(token) => tokens.push(token),
                Err(err) => tracing::warn!(%err, "skipping unparseable admin token"),
            }
        }
        Ok(tokens)
    }

    pub async fn revoke(&self, id: &AdminTokenId) -> Result<(), GatewayError> {
        let raw = self
            .state
            .get(&Self::key(id))
            .await?
            .ok_or_else(|| GatewayError::TokenNotFound(id.to_string()))?;
        let mut token: AdminToken = serde_json::from_str(&raw)?;
        token.revoked_at = Some(Utc::now());
        self.persist(&token).await
    }

    /// Validate a raw token presented by a caller. Every active token's
    /// fingerprint is compared in constant time before falling through to
    /// the (slow, intentionally so) bcrypt verify, so a caller can't learn
    /// anything about which stored token is "closest" to theirs by timing.
    pub async fn validate(&self, raw_token: &str) -> Result<Option<AdminToken>, GatewayError> {
        let now = Utc::now();
        let candidate_fingerprint = fingerprint(raw_token);
        for token in self.list().await? {
            if !token.is_active(now) {
                continue;
            }
            let matches: bool = candidate_fingerprint
                .as_bytes()
                .ct_eq(token.fingerprint.as_bytes())
                .into();
            if matches && bcrypt::verify(raw_token, &token.hash)? {
                return Ok(Some(token));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use kg_state_memory::MemoryStateStore;

    use super::*;

    fn store() -> AdminTokenStore {
        AdminTokenStore::new(Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = store();
        store.bootstrap("bootstrap-token").await.unwrap();
        store.bootstrap("bootstrap-token").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mint_then_validate_roundtrip() {
        let store = store();
        let (token, raw) = store.mint(vec!["admin".to_owned()]).await.unwrap();
        let found = store.validate(&raw).await.unwrap().unwrap();
        assert_eq!(found.id, token.id);
    }

    #[tokio::test]
    async fn validate_rejects_wrong_token() {
        let store = store();
        store.mint(vec!["admin".to_owned()]).await.unwrap();
        assert!(store.validate("not-the-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoked_token_no_longer_validates() {
        let store = store();
        let (token, raw) = store.mint(vec!["admin".to_owned()]).await.unwrap();
        store.revoke(&token.id).await.unwrap();
        assert!(store.validate(&raw).await.unwrap().is_none());
    }
}
