//! Claim sets and the claims builder.
//!
//! # Purpose
//! Holds the ordered claim map carried inside every token and builds the
//! registered claims (`iss`, `sub`, `aud`, `exp`, `iat`, `nbf`, `jti`) for new
//! issuances.
//!
//! # How it fits
//! The lifecycle engine asks [`ClaimsBuilder`] for a fresh claim set, signs it,
//! and hands verified [`ClaimSet`] values back to callers after validation.
//!
//! # Key invariants
//! - `nbf <= iat < exp` for every built claim set.
//! - `jti` carries 128 random bits and is never caller-controlled.
//! - `iss`, `jti`, `sub`, `aud`, `iat` and the permissions claim are reserved;
//!   supplying them as extra claims is an error, not a silent override.
//!
//! # Examples
//! ```rust
//! use std::time::Duration;
//! use tessera_token::{ClaimSet, ClaimsBuilder};
//!
//! let claims = ClaimsBuilder::new("App", "access", "User:42")
//!     .issued_at(1_700_000_000)
//!     .ttl(Duration::from_secs(60))
//!     .build(&ClaimSet::new())
//!     .expect("build claims");
//! assert_eq!(claims.exp(), Some(1_700_000_060));
//! ```
//!
//! # Common pitfalls
//! - Timestamps are whole seconds since the Unix epoch; sub-second precision
//!   is dropped.
use crate::{EncodedPermissions, TokenError, TokenResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const ISSUER: &str = "iss";
pub const SUBJECT: &str = "sub";
pub const AUDIENCE: &str = "aud";
pub const EXPIRES_AT: &str = "exp";
pub const ISSUED_AT: &str = "iat";
pub const NOT_BEFORE: &str = "nbf";
pub const TOKEN_ID: &str = "jti";
/// Claim holding [`EncodedPermissions`].
pub const PERMISSIONS: &str = "pem";

const REGISTERED: [&str; 7] = [
    ISSUER,
    SUBJECT,
    AUDIENCE,
    EXPIRES_AT,
    ISSUED_AT,
    NOT_BEFORE,
    TOKEN_ID,
];

const CALLER_RESERVED: [&str; 6] = [ISSUER, TOKEN_ID, SUBJECT, AUDIENCE, ISSUED_AT, PERMISSIONS];

const JTI_BYTES: usize = 16;

/// Ordered claim map carried in a token payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Insert a claim, returning the previous value if present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn str_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn iss(&self) -> Option<&str> {
        self.str_claim(ISSUER)
    }

    pub fn sub(&self) -> Option<&str> {
        self.str_claim(SUBJECT)
    }

    /// Audience as a single string. Array audiences are read with
    /// [`ClaimSet::audiences`].
    pub fn aud(&self) -> Option<&str> {
        self.str_claim(AUDIENCE)
    }

    pub fn audiences(&self) -> Vec<&str> {
        match self.0.get(AUDIENCE) {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn jti(&self) -> Option<&str> {
        self.str_claim(TOKEN_ID)
    }

    pub fn exp(&self) -> Option<i64> {
        self.timestamp(EXPIRES_AT).ok().flatten()
    }

    pub fn iat(&self) -> Option<i64> {
        self.timestamp(ISSUED_AT).ok().flatten()
    }

    pub fn nbf(&self) -> Option<i64> {
        self.timestamp(NOT_BEFORE).ok().flatten()
    }

    /// Read a NumericDate claim.
    ///
    /// # Returns
    /// - `Ok(None)` when the claim is absent.
    /// - `Ok(Some(seconds))` for integral values; fractional values are
    ///   truncated toward zero.
    ///
    /// # Errors
    /// - [`TokenError::InvalidClaim`] if the claim is present but not numeric.
    pub fn timestamp(&self, name: &str) -> TokenResult<Option<i64>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|secs| secs as i64))
                .map(Some)
                .ok_or_else(|| TokenError::invalid_claim(name, "expected a numeric date")),
        }
    }

    /// Claims that are neither registered nor the permissions claim.
    pub fn custom_claims(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0
            .iter()
            .filter(|(name, _)| !is_registered(name) && name.as_str() != PERMISSIONS)
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

impl FromIterator<(String, Value)> for ClaimSet {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn is_registered(name: &str) -> bool {
    REGISTERED.contains(&name)
}

/// Fresh token identifier: 128 random bits, hex encoded.
pub fn generate_jti() -> String {
    let mut bytes = [0u8; JTI_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds the registered claims for a new token and merges caller claims.
#[derive(Debug, Clone)]
pub struct ClaimsBuilder {
    issuer: String,
    audience: String,
    subject: String,
    now: i64,
    ttl: Duration,
    carried: Map<String, Value>,
    permissions: Option<EncodedPermissions>,
}

impl ClaimsBuilder {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            subject: subject.into(),
            now: 0,
            ttl: Duration::ZERO,
            carried: Map::new(),
            permissions: None,
        }
    }

    pub fn issued_at(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn permissions(mut self, permissions: EncodedPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Copy every non-registered claim (permissions included) from an earlier
    /// claim set. Used when re-minting a token for the same identity.
    pub fn carry(mut self, previous: &ClaimSet) -> Self {
        for (name, value) in previous.iter() {
            if !is_registered(name) {
                self.carried.insert(name.clone(), value.clone());
            }
        }
        self
    }

    /// Produce the claim set.
    ///
    /// # Errors
    /// - [`TokenError::ReservedClaim`] if `extra` names a reserved claim.
    /// - [`TokenError::InvalidClaim`] if the ttl is zero, `nbf` would precede
    ///   `iat`, or `exp` would not follow it.
    pub fn build(self, extra: &ClaimSet) -> TokenResult<ClaimSet> {
        if self.ttl.is_zero() {
            return Err(TokenError::invalid_claim(EXPIRES_AT, "ttl must be positive"));
        }
        let ttl = i64::try_from(self.ttl.as_secs())
            .map_err(|_| TokenError::invalid_claim(EXPIRES_AT, "ttl out of range"))?;
        let exp = self
            .now
            .checked_add(ttl)
            .ok_or_else(|| TokenError::invalid_claim(EXPIRES_AT, "ttl out of range"))?;

        let mut claims = ClaimSet::new();
        claims.insert(ISSUER, self.issuer);
        claims.insert(SUBJECT, self.subject);
        claims.insert(AUDIENCE, self.audience);
        claims.insert(EXPIRES_AT, exp);
        claims.insert(ISSUED_AT, self.now);
        claims.insert(NOT_BEFORE, self.now);
        claims.insert(TOKEN_ID, generate_jti());
        for (name, value) in self.carried {
            claims.insert(name, value);
        }
        if let Some(permissions) = self.permissions {
            claims.insert(PERMISSIONS, permissions_value(&permissions));
        }

        merge_caller_claims(&mut claims, extra)?;
        Ok(claims)
    }
}

/// Merge caller-supplied claims over a built claim set, enforcing the
/// reserved-key and timestamp-ordering rules.
pub(crate) fn merge_caller_claims(claims: &mut ClaimSet, extra: &ClaimSet) -> TokenResult<()> {
    for (name, value) in extra.iter() {
        if CALLER_RESERVED.contains(&name.as_str()) {
            return Err(TokenError::ReservedClaim(name.clone()));
        }
        claims.insert(name.clone(), value.clone());
    }

    let iat = claims
        .timestamp(ISSUED_AT)?
        .ok_or_else(|| TokenError::invalid_claim(ISSUED_AT, "missing"))?;
    if let Some(nbf) = claims.timestamp(NOT_BEFORE)?
        && nbf < iat
    {
        return Err(TokenError::invalid_claim(NOT_BEFORE, "must not precede iat"));
    }
    if let Some(exp) = claims.timestamp(EXPIRES_AT)?
        && exp <= iat
    {
        return Err(TokenError::invalid_claim(EXPIRES_AT, "must follow iat"));
    }
    Ok(())
}

fn permissions_value(permissions: &EncodedPermissions) -> Value {
    Value::Object(
        permissions
            .iter()
            .map(|(set, bits)| (set.clone(), Value::from(*bits)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn builder() -> ClaimsBuilder {
        ClaimsBuilder::new("App", "access", "User:42")
            .issued_at(NOW)
            .ttl(Duration::from_secs(3600))
    }

    #[test]
    fn build_sets_registered_claims() {
        let claims = builder().build(&ClaimSet::new()).expect("build");
        assert_eq!(claims.iss(), Some("App"));
        assert_eq!(claims.sub(), Some("User:42"));
        assert_eq!(claims.aud(), Some("access"));
        assert_eq!(claims.iat(), Some(NOW));
        assert_eq!(claims.nbf(), Some(NOW));
        assert_eq!(claims.exp(), Some(NOW + 3600));
        assert_eq!(claims.jti().map(str::len), Some(JTI_BYTES * 2));
        let keys: Vec<&str> = claims.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["iss", "sub", "aud", "exp", "iat", "nbf", "jti"]);
    }

    #[test]
    fn jti_is_unique_per_build() {
        let a = builder().build(&ClaimSet::new()).expect("build");
        let b = builder().build(&ClaimSet::new()).expect("build");
        assert_ne!(a.jti(), b.jti());
    }

    #[test]
    fn extra_claims_merge_and_override_exp() {
        let mut extra = ClaimSet::new();
        extra.insert("role", "admin");
        extra.insert(EXPIRES_AT, NOW + 10);
        let claims = builder().build(&extra).expect("build");
        assert_eq!(claims.str_claim("role"), Some("admin"));
        assert_eq!(claims.exp(), Some(NOW + 10));
    }

    #[test]
    fn reserved_claims_are_rejected() {
        for reserved in [ISSUER, TOKEN_ID, SUBJECT, AUDIENCE, ISSUED_AT, PERMISSIONS] {
            let mut extra = ClaimSet::new();
            extra.insert(reserved, "x");
            let err = builder().build(&extra).expect_err("reserved");
            assert!(
                matches!(err, TokenError::ReservedClaim(ref name) if name == reserved),
                "unexpected error for {reserved}: {err:?}"
            );
        }
    }

    #[test]
    fn backdated_nbf_is_rejected() {
        let mut extra = ClaimSet::new();
        extra.insert(NOT_BEFORE, NOW - 1);
        let err = builder().build(&extra).expect_err("backdated nbf");
        assert!(matches!(err, TokenError::InvalidClaim { ref claim, .. } if claim == "nbf"));

        let mut later = ClaimSet::new();
        later.insert(NOT_BEFORE, NOW + 30);
        let claims = builder().build(&later).expect("future nbf");
        assert_eq!(claims.nbf(), Some(NOW + 30));
    }

    #[test]
    fn exp_must_follow_iat() {
        let mut extra = ClaimSet::new();
        extra.insert(EXPIRES_AT, NOW);
        let err = builder().build(&extra).expect_err("exp == iat");
        assert!(matches!(err, TokenError::InvalidClaim { ref claim, .. } if claim == "exp"));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = builder()
            .ttl(Duration::ZERO)
            .build(&ClaimSet::new())
            .expect_err("zero ttl");
        assert!(matches!(err, TokenError::InvalidClaim { .. }));
    }

    #[test]
    fn carry_keeps_custom_and_permission_claims_only() {
        let mut previous = builder().build(&ClaimSet::new()).expect("build");
        previous.insert("tenant", "acme");
        previous.insert(PERMISSIONS, json!({"default": 1}));

        let carried = ClaimsBuilder::new("App", "access", "User:42")
            .issued_at(NOW + 60)
            .ttl(Duration::from_secs(60))
            .carry(&previous)
            .build(&ClaimSet::new())
            .expect("build");
        assert_eq!(carried.str_claim("tenant"), Some("acme"));
        assert_eq!(carried.get(PERMISSIONS), Some(&json!({"default": 1})));
        assert_eq!(carried.iat(), Some(NOW + 60));
        assert_ne!(carried.jti(), previous.jti());
    }

    #[test]
    fn permissions_are_embedded() {
        let mut encoded = EncodedPermissions::new();
        encoded.insert("default".to_string(), 3);
        let claims = builder()
            .permissions(encoded)
            .build(&ClaimSet::new())
            .expect("build");
        assert_eq!(claims.get(PERMISSIONS), Some(&json!({"default": 3})));
    }

    #[test]
    fn timestamp_rejects_non_numeric() {
        let mut claims = ClaimSet::new();
        claims.insert(EXPIRES_AT, "tomorrow");
        assert!(claims.timestamp(EXPIRES_AT).is_err());
        assert_eq!(claims.exp(), None);
        assert_eq!(claims.timestamp(NOT_BEFORE).expect("absent"), None);
    }

    #[test]
    fn audiences_accepts_arrays() {
        let mut claims = ClaimSet::new();
        claims.insert(AUDIENCE, json!(["access", "refresh"]));
        assert_eq!(claims.audiences(), vec!["access", "refresh"]);
        assert_eq!(claims.aud(), None);
    }

    #[test]
    fn custom_claims_skip_registered_and_permissions() {
        let mut claims = builder().build(&ClaimSet::new()).expect("build");
        claims.insert("tenant", "acme");
        claims.insert(PERMISSIONS, json!({}));
        let names: Vec<&str> = claims.custom_claims().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["tenant"]);
    }
}
