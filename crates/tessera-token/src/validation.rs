//! Ordered claim validation.
//!
//! # Purpose
//! Runs a fixed sequence of pure claim checks over an authenticated claim set
//! and reports the first failure.
//!
//! # How it fits
//! The engine calls [`ValidatorPipeline::validate`] only after the signature
//! verified. Applications extend the pipeline with their own validators
//! (tenant checks, revocation lookups) or override a built-in one.
//!
//! # Key invariants
//! - Built-ins run in the order `iss`, `nbf`, `iat`, `exp`, `aud`; registered
//!   validators follow in registration order.
//! - Evaluation stops at the first failing validator.
//! - Absent `nbf`, `iat` and `exp` claims pass.
//!
//! # Examples
//! ```rust
//! use tessera_token::{ClaimKind, ClaimSet, TokenError, ValidationContext, ValidatorPipeline};
//!
//! let pipeline = ValidatorPipeline::default().with_validator(
//!     ClaimKind::custom("tenant"),
//!     |_: &ClaimKind, claims: &ClaimSet, _: &ValidationContext<'_>| {
//!         match claims.str_claim("tenant") {
//!             Some("acme") => Ok(()),
//!             _ => Err(TokenError::InvalidAudience),
//!         }
//!     },
//! );
//! let ctx = ValidationContext::new(1_700_000_000, "App");
//! assert!(pipeline.validate(&ClaimSet::new(), &ctx).is_err());
//! ```
use crate::claims::{EXPIRES_AT, ISSUED_AT, NOT_BEFORE};
use crate::{ClaimKind, ClaimSet, TokenError, TokenResult};
use std::sync::Arc;

/// Inputs shared by every validator for one verification.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Current time, seconds since the Unix epoch.
    pub now: i64,
    pub issuer: &'a str,
    pub verify_issuer: bool,
    /// Audience the caller requires; `None` skips the audience check.
    pub expected_audience: Option<&'a str>,
    /// Clock skew tolerated on `nbf`, `iat` and `exp`, in seconds.
    pub allowed_drift: i64,
}

impl<'a> ValidationContext<'a> {
    pub fn new(now: i64, issuer: &'a str) -> Self {
        Self {
            now,
            issuer,
            verify_issuer: true,
            expected_audience: None,
            allowed_drift: 0,
        }
    }

    pub fn expect_audience(mut self, audience: &'a str) -> Self {
        self.expected_audience = Some(audience);
        self
    }
}

/// A single claim check.
pub trait ClaimValidator: Send + Sync {
    fn validate_claim(
        &self,
        kind: &ClaimKind,
        claims: &ClaimSet,
        ctx: &ValidationContext<'_>,
    ) -> TokenResult<()>;
}

impl<F> ClaimValidator for F
where
    F: Fn(&ClaimKind, &ClaimSet, &ValidationContext<'_>) -> TokenResult<()> + Send + Sync,
{
    fn validate_claim(
        &self,
        kind: &ClaimKind,
        claims: &ClaimSet,
        ctx: &ValidationContext<'_>,
    ) -> TokenResult<()> {
        self(kind, claims, ctx)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IssuerValidator;

impl ClaimValidator for IssuerValidator {
    fn validate_claim(
        &self,
        _kind: &ClaimKind,
        claims: &ClaimSet,
        ctx: &ValidationContext<'_>,
    ) -> TokenResult<()> {
        if !ctx.verify_issuer || claims.iss() == Some(ctx.issuer) {
            return Ok(());
        }
        Err(TokenError::InvalidIssuer)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotBeforeValidator;

impl ClaimValidator for NotBeforeValidator {
    fn validate_claim(
        &self,
        _kind: &ClaimKind,
        claims: &ClaimSet,
        ctx: &ValidationContext<'_>,
    ) -> TokenResult<()> {
        not_in_future(claims, NOT_BEFORE, ctx)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IssuedAtValidator;

impl ClaimValidator for IssuedAtValidator {
    fn validate_claim(
        &self,
        _kind: &ClaimKind,
        claims: &ClaimSet,
        ctx: &ValidationContext<'_>,
    ) -> TokenResult<()> {
        not_in_future(claims, ISSUED_AT, ctx)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryValidator;

impl ClaimValidator for ExpiryValidator {
    fn validate_claim(
        &self,
        _kind: &ClaimKind,
        claims: &ClaimSet,
        ctx: &ValidationContext<'_>,
    ) -> TokenResult<()> {
        match claims.timestamp(EXPIRES_AT) {
            Ok(None) => Ok(()),
            Ok(Some(exp)) if exp > ctx.now.saturating_sub(ctx.allowed_drift) => Ok(()),
            Ok(Some(_)) | Err(_) => Err(TokenError::TokenExpired),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AudienceValidator;

impl ClaimValidator for AudienceValidator {
    fn validate_claim(
        &self,
        _kind: &ClaimKind,
        claims: &ClaimSet,
        ctx: &ValidationContext<'_>,
    ) -> TokenResult<()> {
        match ctx.expected_audience {
            None => Ok(()),
            Some(expected) if claims.audiences().contains(&expected) => Ok(()),
            Some(_) => Err(TokenError::InvalidAudience),
        }
    }
}

fn not_in_future(claims: &ClaimSet, name: &str, ctx: &ValidationContext<'_>) -> TokenResult<()> {
    match claims.timestamp(name) {
        Ok(None) => Ok(()),
        Ok(Some(at)) if at <= ctx.now.saturating_add(ctx.allowed_drift) => Ok(()),
        Ok(Some(_)) | Err(_) => Err(TokenError::TokenNotYetValid),
    }
}

/// Ordered validator table keyed by [`ClaimKind`].
#[derive(Clone)]
pub struct ValidatorPipeline {
    stages: Vec<(ClaimKind, Arc<dyn ClaimValidator>)>,
}

impl Default for ValidatorPipeline {
    fn default() -> Self {
        let stages: Vec<(ClaimKind, Arc<dyn ClaimValidator>)> = vec![
            (ClaimKind::Iss, Arc::new(IssuerValidator)),
            (ClaimKind::Nbf, Arc::new(NotBeforeValidator)),
            (ClaimKind::Iat, Arc::new(IssuedAtValidator)),
            (ClaimKind::Exp, Arc::new(ExpiryValidator)),
            (ClaimKind::Aud, Arc::new(AudienceValidator)),
        ];
        Self { stages }
    }
}

impl ValidatorPipeline {
    /// A pipeline with no validators at all.
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a validator after the existing ones.
    pub fn with_validator(
        mut self,
        kind: ClaimKind,
        validator: impl ClaimValidator + 'static,
    ) -> Self {
        let validator: Arc<dyn ClaimValidator> = Arc::new(validator);
        self.stages.push((kind, validator));
        self
    }

    /// Replace the validator registered for `kind`, keeping its position.
    /// Appends when nothing is registered for `kind`.
    pub fn override_validator(
        mut self,
        kind: ClaimKind,
        validator: impl ClaimValidator + 'static,
    ) -> Self {
        let validator: Arc<dyn ClaimValidator> = Arc::new(validator);
        match self.stages.iter_mut().find(|(existing, _)| *existing == kind) {
            Some(stage) => stage.1 = validator,
            None => self.stages.push((kind, validator)),
        }
        self
    }

    /// Drop every validator registered for `kind`.
    pub fn without(mut self, kind: &ClaimKind) -> Self {
        self.stages.retain(|(existing, _)| existing != kind);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ClaimKind> {
        self.stages.iter().map(|(kind, _)| kind)
    }

    /// Run every stage in order, stopping at the first failure.
    pub fn validate(&self, claims: &ClaimSet, ctx: &ValidationContext<'_>) -> TokenResult<()> {
        for (kind, validator) in &self.stages {
            validator.validate_claim(kind, claims, ctx)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ValidatorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}
