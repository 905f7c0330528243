//! Opt-in revocation tracking.
//!
//! # Purpose
//! Tokens are stateless; revoking one changes nothing unless a store records
//! it and verification consults that store. This module supplies both halves:
//! [`RevokingHooks`] records revocations and [`RevocationValidator`] rejects
//! recorded tokens.
//!
//! # How it fits
//! Compose both when building the engine. Using only one of them is a
//! configuration mistake: revocations would either go unrecorded or never be
//! checked.
//!
//! # Concurrency model
//! [`InMemoryRevocationStore`] is a sharded concurrent map; lookups do not
//! block each other. It is process-local and forgets everything on restart.
//!
//! # Examples
//! ```rust
//! use std::sync::Arc;
//! use tessera_token::{InMemoryRevocationStore, RevocationStore};
//!
//! let store = InMemoryRevocationStore::new();
//! store.revoke("a1b2", Some(1_700_000_060)).expect("revoke");
//! assert!(store.is_revoked("a1b2").expect("lookup"));
//! assert_eq!(store.purge_expired(1_700_000_061), 1);
//! ```
use crate::claims::TOKEN_ID;
use crate::{
    ClaimKind, ClaimSet, ClaimValidator, IssuedToken, NoopHooks, TokenError, TokenHooks,
    TokenResult, ValidationContext,
};
use dashmap::DashMap;
use std::sync::Arc;

pub trait RevocationStore: Send + Sync {
    /// Record `jti` as revoked. `expires_at` lets the store forget the entry
    /// once the token would have expired anyway.
    fn revoke(&self, jti: &str, expires_at: Option<i64>) -> TokenResult<()>;

    fn is_revoked(&self, jti: &str) -> TokenResult<bool>;

    /// Drop entries whose token has expired, returning how many were removed.
    fn purge_expired(&self, now: i64) -> usize;
}

/// Process-local store keyed by `jti`.
///
/// Entries stay until [`RevocationStore::purge_expired`] drops them. An
/// engine built with this store purges on every `revoke`; callers using the
/// store directly must purge themselves.
#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    entries: DashMap<String, Option<i64>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RevocationStore for InMemoryRevocationStore {
    fn revoke(&self, jti: &str, expires_at: Option<i64>) -> TokenResult<()> {
        self.entries.insert(jti.to_string(), expires_at);
        Ok(())
    }

    fn is_revoked(&self, jti: &str) -> TokenResult<bool> {
        Ok(self.entries.contains_key(jti))
    }

    fn purge_expired(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, expires_at| expires_at.is_none_or(|exp| exp > now));
        before.saturating_sub(self.entries.len())
    }
}

/// Rejects tokens whose `jti` is recorded in the store.
///
/// Register it under [`RevocationValidator::kind`]. Tokens without a `jti`
/// cannot be tracked and pass.
#[derive(Clone)]
pub struct RevocationValidator {
    store: Arc<dyn RevocationStore>,
}

impl RevocationValidator {
    pub fn new(store: Arc<dyn RevocationStore>) -> Self {
        Self { store }
    }

    pub fn kind() -> ClaimKind {
        ClaimKind::custom(TOKEN_ID)
    }
}

impl ClaimValidator for RevocationValidator {
    fn validate_claim(
        &self,
        _kind: &ClaimKind,
        claims: &ClaimSet,
        _ctx: &ValidationContext<'_>,
    ) -> TokenResult<()> {
        match claims.jti() {
            Some(jti) if self.store.is_revoked(jti)? => Err(TokenError::Revoked),
            _ => Ok(()),
        }
    }
}

/// Hooks that record revocations in a store before delegating to `inner`.
pub struct RevokingHooks<H = NoopHooks> {
    store: Arc<dyn RevocationStore>,
    inner: H,
}

impl RevokingHooks<NoopHooks> {
    pub fn new(store: Arc<dyn RevocationStore>) -> Self {
        Self {
            store,
            inner: NoopHooks,
        }
    }
}

impl<H: TokenHooks> RevokingHooks<H> {
    pub fn wrap(store: Arc<dyn RevocationStore>, inner: H) -> Self {
        Self { store, inner }
    }
}

impl<H: TokenHooks> TokenHooks for RevokingHooks<H> {
    fn after_encode_and_sign(&self, token_type: &str, issued: &IssuedToken) -> TokenResult<()> {
        self.inner.after_encode_and_sign(token_type, issued)
    }

    fn after_sign_in(&self, issued: &IssuedToken) -> TokenResult<()> {
        self.inner.after_sign_in(issued)
    }

    fn before_sign_out(&self, claims: &ClaimSet, token: &str) -> TokenResult<()> {
        self.inner.before_sign_out(claims, token)
    }

    fn on_verify(&self, claims: &ClaimSet, token: &str) -> TokenResult<()> {
        self.inner.on_verify(claims, token)
    }

    fn on_revoke(&self, claims: &ClaimSet, token: &str) -> TokenResult<()> {
        let jti = claims.jti().ok_or_else(|| {
            TokenError::invalid_claim(TOKEN_ID, "missing; token cannot be revoked")
        })?;
        self.store.revoke(jti, claims.exp())?;
        tracing::debug!(jti, "token revoked");
        self.inner.on_revoke(claims, token)
    }

    fn on_refresh(&self, old: &IssuedToken, new: &IssuedToken) -> TokenResult<()> {
        self.inner.on_refresh(old, new)
    }

    fn on_exchange(&self, old: &IssuedToken, new: &IssuedToken) -> TokenResult<()> {
        self.inner.on_exchange(old, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(jti: &str, exp: i64) -> ClaimSet {
        let mut claims = ClaimSet::new();
        claims.insert("jti", jti);
        claims.insert("exp", exp);
        claims
    }

    #[test]
    fn store_tracks_and_purges() {
        let store = InMemoryRevocationStore::new();
        store.revoke("a", Some(100)).expect("revoke");
        store.revoke("b", Some(200)).expect("revoke");
        store.revoke("c", None).expect("revoke");
        assert!(store.is_revoked("a").expect("lookup"));
        assert!(!store.is_revoked("z").expect("lookup"));

        assert_eq!(store.purge_expired(150), 1);
        assert!(!store.is_revoked("a").expect("lookup"));
        assert!(store.is_revoked("b").expect("lookup"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn hooks_record_and_validator_rejects() {
        let store = Arc::new(InMemoryRevocationStore::new());
        let hooks = RevokingHooks::new(store.clone());
        let validator = RevocationValidator::new(store.clone());
        let ctx = ValidationContext::new(0, "App");
        let claims = claims("jti-1", 100);

        validator
            .validate_claim(&RevocationValidator::kind(), &claims, &ctx)
            .expect("not yet revoked");
        hooks.on_revoke(&claims, "token").expect("revoke");
        let err = validator
            .validate_claim(&RevocationValidator::kind(), &claims, &ctx)
            .expect_err("revoked");
        assert!(matches!(err, TokenError::Revoked));
    }

    #[test]
    fn revoking_requires_jti() {
        let hooks = RevokingHooks::new(Arc::new(InMemoryRevocationStore::new()));
        let err = hooks
            .on_revoke(&ClaimSet::new(), "token")
            .expect_err("missing jti");
        assert!(matches!(err, TokenError::InvalidClaim { .. }));
    }

    #[test]
    fn tokens_without_jti_pass_validation() {
        let validator = RevocationValidator::new(Arc::new(InMemoryRevocationStore::new()));
        validator
            .validate_claim(
                &RevocationValidator::kind(),
                &ClaimSet::new(),
                &ValidationContext::new(0, "App"),
            )
            .expect("untracked");
    }
}
