//! Refresh Token Entity
//!
//! Only the SHA-256 hash of a refresh token is stored; the raw value is
//! handed to the client once. A token is single-use: rotation revokes it and
//! records the hash of its replacement.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::entity::{Entity, EntityMeta};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshToken {
    pub meta: EntityMeta,

    /// Base64url SHA-256 of the raw token
    pub token_hash: String,

    pub principal_id: String,

    /// Shared by every token of one rotation chain (the first token's id)
    pub token_family: String,

    #[serde(default)]
    pub is_revoked: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,

    /// Hash of the token that replaced this one during rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,

    /// Fixed at issue
    pub expires_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl RefreshToken {
    pub fn new(token_hash: impl Into<String>, principal_id: impl Into<String>, lifetime: Duration) -> Self {
        let meta = EntityMeta::new();
        let expires_at = meta.created_at + lifetime;
        Self {
            token_family: meta.id.clone(),
            meta,
            token_hash: token_hash.into(),
            principal_id: principal_id.into(),
            is_revoked: false,
            revoked_at: None,
            replaced_by: None,
            expires_at,
            last_used_at: None,
        }
    }

    /// Continue an existing rotation chain.
    pub fn in_family(mut self, family: impl Into<String>) -> Self {
        self.token_family = family.into();
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Not revoked and not expired.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn was_replaced(&self) -> bool {
        self.replaced_by.is_some()
    }

    /// Returns false if already revoked; revocation is permanent.
    pub fn revoke(&mut self) -> bool {
        if self.is_revoked {
            return false;
        }
        let now = Utc::now();
        self.is_revoked = true;
        self.revoked_at = Some(now);
        self.meta.updated_at = Some(now);
        true
    }

    /// Revoke as part of rotation, recording the successor.
    pub fn mark_replaced(&mut self, new_token_hash: impl Into<String>) -> bool {
        if !self.revoke() {
            return false;
        }
        let now = Utc::now();
        self.replaced_by = Some(new_token_hash.into());
        self.last_used_at = Some(now);
        true
    }

    /// 32 random bytes, base64url without padding.
    pub fn generate_raw_token() -> String {
        use base64::Engine;
        use rand::Rng;

        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn hash_token(raw_token: &str) -> String {
        use base64::Engine;
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(raw_token.as_bytes());
        let hash = hasher.finalize();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
    }

    /// Raw token for the client, entity for storage.
    pub fn generate_token_pair(principal_id: impl Into<String>, lifetime: Duration) -> (String, Self) {
        let raw_token = Self::generate_raw_token();
        let token_hash = Self::hash_token(&raw_token);
        (raw_token, Self::new(token_hash, principal_id, lifetime))
    }
}

impl Entity for RefreshToken {
    fn table_name() -> &'static str {
        "refresh_tokens"
    }

    fn entity_type() -> &'static str {
        "RefreshToken"
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("token_hash", self.token_hash.clone())]
    }
}
