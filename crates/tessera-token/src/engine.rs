//! Token lifecycle controller.
//!
//! # Purpose
//! [`TokenEngine`] ties the claim builder, permission codec, signer and
//! validator pipeline together behind the operations applications call:
//! issue, verify, refresh, revoke and exchange.
//!
//! # Key invariants
//! - The audience of an issued token is its token type.
//! - Verification runs the signature check, then every validator in order,
//!   then the `on_verify` hook; the first failure wins.
//! - Refresh keeps the identity (`sub`, `aud`, custom claims) and renews
//!   `iat`, `nbf`, `exp` and `jti`. Revoking the old token is its last step,
//!   so a failed refresh leaves the presented token usable.
//!
//! # Common pitfalls
//! - Revocation does nothing until a store is attached with
//!   [`TokenEngineBuilder::revocation_store`] or the equivalent hooks and
//!   validator are composed by hand.
use crate::claims::{AUDIENCE, SUBJECT};
use crate::clock::{Clock, SystemClock};
use crate::permissions::{PermissionGrants, permissions_from_claims};
use crate::revocation::{RevocationStore, RevocationValidator, RevokingHooks};
use crate::signer::{self, KeyMaterial, PeekedToken, SecretFetcher, StaticSecretFetcher};
use crate::{
    ClaimKind, ClaimSet, ClaimValidator, ClaimsBuilder, EncodedPermissions, NoopHooks,
    PermissionCodec, ResourceSerializer, TokenConfig, TokenError, TokenHooks, TokenResult,
    ValidationContext, ValidatorPipeline,
};
use jsonwebtoken::Algorithm;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A signed token together with the claims it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: ClaimSet,
}

impl IssuedToken {
    pub fn jti(&self) -> Option<&str> {
        self.claims.jti()
    }
}

/// Result of `refresh` and `exchange`: the token that was presented and the
/// one minted in its place.
#[derive(Debug, Clone, PartialEq)]
pub struct Reissued {
    pub old: IssuedToken,
    pub new: IssuedToken,
}

#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Lifetime; defaults to the configured ttl for the token type.
    pub ttl: Option<Duration>,
    pub permissions: Option<PermissionGrants>,
    /// Must be in the allow-list; defaults to its first entry.
    pub algorithm: Option<Algorithm>,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Required audience. `None` accepts any token type.
    pub token_type: Option<String>,
}

impl VerifyOptions {
    pub fn token_type(token_type: impl Into<String>) -> Self {
        Self {
            token_type: Some(token_type.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOptions {
    pub ttl: Option<Duration>,
}

pub struct TokenEngine<S: ResourceSerializer> {
    config: Arc<TokenConfig>,
    serializer: S,
    codec: PermissionCodec,
    secrets: Arc<dyn SecretFetcher>,
    hooks: Arc<dyn TokenHooks>,
    validators: ValidatorPipeline,
    revocations: Option<Arc<dyn RevocationStore>>,
    clock: Arc<dyn Clock>,
}

impl<S: ResourceSerializer> std::fmt::Debug for TokenEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEngine")
            .field("issuer", &self.config.issuer)
            .field("algorithms", &self.config.algorithms)
            .field("validators", &self.validators)
            .finish_non_exhaustive()
    }
}

pub struct TokenEngineBuilder<S: ResourceSerializer> {
    config: TokenConfig,
    serializer: S,
    secrets: Option<Arc<dyn SecretFetcher>>,
    hooks: Arc<dyn TokenHooks>,
    validators: ValidatorPipeline,
    revocation: Option<Arc<dyn RevocationStore>>,
    clock: Arc<dyn Clock>,
}

impl<S: ResourceSerializer> TokenEngineBuilder<S> {
    pub fn hooks(mut self, hooks: impl TokenHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Replace the key source. Defaults to the configured secret and `kid`.
    pub fn secret_fetcher(mut self, fetcher: impl SecretFetcher + 'static) -> Self {
        self.secrets = Some(Arc::new(fetcher));
        self
    }

    pub fn validators(mut self, validators: ValidatorPipeline) -> Self {
        self.validators = validators;
        self
    }

    /// Append a validator after the current ones.
    pub fn with_validator(
        mut self,
        kind: ClaimKind,
        validator: impl ClaimValidator + 'static,
    ) -> Self {
        self.validators = self.validators.with_validator(kind, validator);
        self
    }

    /// Record revocations in `store` and reject revoked tokens on
    /// verification. Wraps whatever hooks are set when `build` runs.
    ///
    /// Every `revoke` also drops store entries whose token can no longer
    /// verify anyway.
    pub fn revocation_store(mut self, store: Arc<dyn RevocationStore>) -> Self {
        self.revocation = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// # Errors
    /// - [`TokenError::Config`] or a permission error if the configuration is
    ///   inconsistent.
    /// - [`TokenError::Signature`] if the secret cannot be turned into keys.
    pub fn build(self) -> TokenResult<TokenEngine<S>> {
        self.config.validate()?;
        let codec = PermissionCodec::new(self.config.permissions.clone())?;
        let secrets = match self.secrets {
            Some(secrets) => secrets,
            None => Arc::new(StaticSecretFetcher::new(KeyMaterial::new(
                self.config.kid.clone(),
                self.config.secret.clone(),
            )?)),
        };
        let (hooks, validators) = match &self.revocation {
            Some(store) => {
                let hooks: Arc<dyn TokenHooks> =
                    Arc::new(RevokingHooks::wrap(store.clone(), self.hooks));
                let validators = self.validators.override_validator(
                    RevocationValidator::kind(),
                    RevocationValidator::new(store.clone()),
                );
                (hooks, validators)
            }
            None => (self.hooks, self.validators),
        };
        Ok(TokenEngine {
            config: Arc::new(self.config),
            serializer: self.serializer,
            codec,
            secrets,
            hooks,
            validators,
            revocations: self.revocation,
            clock: self.clock,
        })
    }
}

impl<S: ResourceSerializer> TokenEngine<S> {
    pub fn builder(config: TokenConfig, serializer: S) -> TokenEngineBuilder<S> {
        TokenEngineBuilder {
            config,
            serializer,
            secrets: None,
            hooks: Arc::new(NoopHooks),
            validators: ValidatorPipeline::default(),
            revocation: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Engine with default collaborators.
    pub fn new(config: TokenConfig, serializer: S) -> TokenResult<Self> {
        Self::builder(config, serializer).build()
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn permissions(&self) -> &PermissionCodec {
        &self.codec
    }

    pub fn validators(&self) -> &ValidatorPipeline {
        &self.validators
    }

    /// Issue a token of `token_type` for `resource`.
    ///
    /// # Errors
    /// - [`TokenError::Serialization`] if the resource has no subject.
    /// - [`TokenError::ReservedClaim`] or [`TokenError::InvalidClaim`] for bad
    ///   `extra` claims.
    /// - Permission errors for unknown sets or symbols.
    /// - [`TokenError::Signature`] if `options.algorithm` is not allowed.
    pub fn encode_and_sign(
        &self,
        resource: &S::Resource,
        token_type: &str,
        extra: &ClaimSet,
        options: &EncodeOptions,
    ) -> TokenResult<IssuedToken> {
        let subject = self.serializer.for_token(resource).map_err(as_serialization)?;
        let ttl = options.ttl.unwrap_or_else(|| self.config.ttl_for(token_type));
        let mut builder = ClaimsBuilder::new(&self.config.issuer, token_type, subject)
            .issued_at(self.clock.now())
            .ttl(ttl);
        if let Some(grants) = &options.permissions {
            builder = builder.permissions(self.codec.encode_grants(grants)?);
        }
        let claims = builder.build(extra)?;
        let issued = self.sign_claims(claims, options.algorithm)?;

        if let Err(err) = self.hooks.after_encode_and_sign(token_type, &issued) {
            tracing::warn!(
                error = %err,
                jti = issued.jti().unwrap_or_default(),
                "after_encode_and_sign hook failed"
            );
        }
        tracing::debug!(
            token_type,
            jti = issued.jti().unwrap_or_default(),
            "token issued"
        );
        Ok(issued)
    }

    /// Authenticate `token` and run the validator pipeline.
    ///
    /// # Errors
    /// - [`TokenError::Signature`] for malformed or forged tokens.
    /// - The first failing validator's error.
    /// - Whatever the `on_verify` hook returns.
    pub fn decode_and_verify(&self, token: &str, options: &VerifyOptions) -> TokenResult<ClaimSet> {
        let claims = signer::verify(token, &self.config.algorithms, self.secrets.as_ref())
            .inspect_err(|err| tracing::debug!(reason = err.code(), "token rejected"))?;
        let ctx = self.validation_context(options.token_type.as_deref());
        if let Err(err) = self.validators.validate(&claims, &ctx) {
            tracing::debug!(
                reason = err.code(),
                jti = claims.jti().unwrap_or_default(),
                "token rejected"
            );
            return Err(err);
        }
        self.hooks.on_verify(&claims, token)?;
        tracing::debug!(jti = claims.jti().unwrap_or_default(), "token verified");
        Ok(claims)
    }

    /// Resolve the resource named by `sub`.
    pub fn resource_from_claims(&self, claims: &ClaimSet) -> TokenResult<S::Resource> {
        let subject = claims
            .sub()
            .ok_or_else(|| TokenError::Serialization(format!("missing {SUBJECT} claim")))?;
        self.serializer.from_token(subject).map_err(as_serialization)
    }

    /// Replace `token` with a fresh token for the same identity.
    ///
    /// The new token is signed and `on_refresh` runs before the old token is
    /// revoked, so any failure leaves the presented token valid.
    ///
    /// Timestamps have one second resolution: a refresh within the same
    /// second as the original issuance produces the same `iat`, `nbf` and
    /// `exp`. Only `jti` is guaranteed to change.
    ///
    /// # Errors
    /// - [`TokenError::InvalidToken`] wrapping the reason `token` failed
    ///   verification.
    /// - Builder errors for bad `overrides`.
    /// - Errors from the `on_refresh` hook or from revoking the old token; the
    ///   new token is discarded in that case.
    pub fn refresh(
        &self,
        token: &str,
        overrides: &ClaimSet,
        options: &RefreshOptions,
    ) -> TokenResult<Reissued> {
        let old_claims = self.verify_presented(token)?;
        let token_type = old_claims.aud().unwrap_or_default().to_string();
        let ttl = options.ttl.unwrap_or_else(|| self.config.ttl_for(&token_type));

        let mut claims = self
            .reissue_builder(&old_claims, &token_type)?
            .ttl(ttl)
            .build(overrides)?;
        match old_claims.get(AUDIENCE) {
            Some(aud) => {
                claims.insert(AUDIENCE, aud.clone());
            }
            None => {
                claims.remove(AUDIENCE);
            }
        }
        let new = self.sign_claims(claims, None)?;
        let old = IssuedToken {
            token: token.to_string(),
            claims: old_claims,
        };

        self.hooks.on_refresh(&old, &new)?;
        self.revoke(&old.token, &old.claims)?;
        tracing::debug!(
            old_jti = old.jti().unwrap_or_default(),
            new_jti = new.jti().unwrap_or_default(),
            "token refreshed"
        );
        Ok(Reissued { old, new })
    }

    /// Run the `on_revoke` hook. Without revocation hooks this succeeds and
    /// the token stays valid until it expires.
    pub fn revoke(&self, token: &str, claims: &ClaimSet) -> TokenResult<()> {
        self.hooks.on_revoke(claims, token)?;
        tracing::debug!(jti = claims.jti().unwrap_or_default(), "revoke requested");
        self.purge_revocations();
        Ok(())
    }

    /// Drop revocation entries for tokens that have expired beyond the
    /// allowed drift. Returns how many were removed; always 0 without a
    /// store attached through the builder.
    pub fn purge_revocations(&self) -> usize {
        let Some(store) = &self.revocations else {
            return 0;
        };
        let cutoff = self.clock.now().saturating_sub(self.drift_seconds());
        let purged = store.purge_expired(cutoff);
        if purged > 0 {
            tracing::debug!(purged, "expired revocations purged");
        }
        purged
    }

    /// Trade a token whose audience is one of `from_types` for a token of
    /// `to_type` with the same subject and custom claims. The presented token
    /// stays valid.
    ///
    /// # Errors
    /// - [`TokenError::InvalidToken`] if `token` fails verification.
    /// - [`TokenError::InvalidAudience`] if its audience is not in
    ///   `from_types`.
    pub fn exchange(
        &self,
        token: &str,
        from_types: &[&str],
        to_type: &str,
        options: &EncodeOptions,
    ) -> TokenResult<Reissued> {
        let old_claims = self.verify_presented(token)?;
        if !old_claims
            .audiences()
            .iter()
            .any(|aud| from_types.contains(aud))
        {
            return Err(TokenError::InvalidAudience);
        }
        let ttl = options.ttl.unwrap_or_else(|| self.config.ttl_for(to_type));
        let mut builder = self.reissue_builder(&old_claims, to_type)?.ttl(ttl);
        if let Some(grants) = &options.permissions {
            builder = builder.permissions(self.codec.encode_grants(grants)?);
        }
        let claims = builder.build(&ClaimSet::new())?;
        let new = self.sign_claims(claims, options.algorithm)?;
        let old = IssuedToken {
            token: token.to_string(),
            claims: old_claims,
        };

        self.hooks.on_exchange(&old, &new)?;
        tracing::debug!(
            to_type,
            old_jti = old.jti().unwrap_or_default(),
            new_jti = new.jti().unwrap_or_default(),
            "token exchanged"
        );
        Ok(Reissued { old, new })
    }

    /// Decode without verifying. Diagnostics only.
    pub fn peek(&self, token: &str) -> TokenResult<PeekedToken> {
        signer::peek(token)
    }

    pub fn encode_permissions(&self, grants: &PermissionGrants) -> TokenResult<EncodedPermissions> {
        self.codec.encode_grants(grants)
    }

    /// Decode the `pem` claim into symbol lists. Sets unknown to this engine
    /// are skipped.
    pub fn decode_permissions(
        &self,
        claims: &ClaimSet,
    ) -> TokenResult<BTreeMap<String, Vec<String>>> {
        self.codec.decode_all(&permissions_from_claims(claims)?)
    }

    pub fn has_all_permissions<P: AsRef<str>>(
        &self,
        claims: &ClaimSet,
        set: &str,
        symbols: &[P],
    ) -> TokenResult<bool> {
        let bits = granted_bits(claims, set)?;
        self.codec.all(bits, symbols, set)
    }

    pub fn has_any_permission<P: AsRef<str>>(
        &self,
        claims: &ClaimSet,
        set: &str,
        symbols: &[P],
    ) -> TokenResult<bool> {
        let bits = granted_bits(claims, set)?;
        self.codec.any(bits, symbols, set)
    }

    fn sign_claims(
        &self,
        claims: ClaimSet,
        algorithm: Option<Algorithm>,
    ) -> TokenResult<IssuedToken> {
        let algorithm = algorithm.unwrap_or_else(|| self.config.signing_algorithm());
        if !self.config.algorithms.contains(&algorithm) {
            return Err(TokenError::Signature(format!(
                "algorithm {algorithm:?} is not allowed"
            )));
        }
        let key = self.secrets.signing_key(&claims)?;
        let token = signer::sign(&claims, algorithm, &key)?;
        Ok(IssuedToken { token, claims })
    }

    fn verify_presented(&self, token: &str) -> TokenResult<ClaimSet> {
        self.decode_and_verify(token, &VerifyOptions::default())
            .map_err(|err| TokenError::InvalidToken(Box::new(err)))
    }

    fn reissue_builder(&self, previous: &ClaimSet, audience: &str) -> TokenResult<ClaimsBuilder> {
        let subject = previous.sub().ok_or_else(|| {
            TokenError::InvalidToken(Box::new(TokenError::invalid_claim(SUBJECT, "missing")))
        })?;
        Ok(ClaimsBuilder::new(&self.config.issuer, audience, subject)
            .issued_at(self.clock.now())
            .carry(previous))
    }

    fn validation_context<'a>(&'a self, audience: Option<&'a str>) -> ValidationContext<'a> {
        let mut ctx = ValidationContext::new(self.clock.now(), &self.config.issuer);
        ctx.verify_issuer = self.config.verify_issuer;
        ctx.expected_audience = audience;
        ctx.allowed_drift = self.drift_seconds();
        ctx
    }

    fn drift_seconds(&self) -> i64 {
        i64::try_from(self.config.allowed_drift.as_secs()).unwrap_or(i64::MAX)
    }
}

fn granted_bits(claims: &ClaimSet, set: &str) -> TokenResult<u64> {
    Ok(permissions_from_claims(claims)?
        .get(set)
        .copied()
        .unwrap_or(0))
}

fn as_serialization(err: TokenError) -> TokenError {
    match err {
        TokenError::Serialization(_) => err,
        other => TokenError::Serialization(other.to_string()),
    }
}
