//! Compact JWS signing and verification.
//!
//! # Purpose
//! Turns a [`ClaimSet`] into a `header.payload.signature` token and
//! authenticates tokens back into claim sets.
//!
//! # Key invariants
//! - Only algorithms on the caller's allow-list verify. `none` is not a
//!   representable algorithm and fails header parsing.
//! - The key family must match the algorithm: HMAC secrets never verify
//!   EdDSA tokens and the other way round.
//! - Registered-claim checks are not performed here; every structural or
//!   cryptographic failure is a [`TokenError::Signature`].
//!
//! # Security model
//! Attackers control the token string, including the header. The header is
//! only trusted to pick a key and an algorithm from sets we configured.
use crate::{ClaimSet, TokenError, TokenResult};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;

pub const ED25519_KEY_LEN: usize = 32;

const SEGMENTS: usize = 3;

/// Raw signing secret.
#[derive(Clone)]
pub enum Secret {
    /// Shared secret for HS256/HS384/HS512.
    Hmac(Vec<u8>),
    /// Ed25519 seed and the public key derived from it, for EdDSA.
    Ed25519 {
        private_key: [u8; ED25519_KEY_LEN],
        public_key: [u8; ED25519_KEY_LEN],
    },
}

impl Secret {
    pub fn hmac(secret: impl Into<Vec<u8>>) -> Self {
        Secret::Hmac(secret.into())
    }

    pub fn ed25519_from_seed(seed: [u8; ED25519_KEY_LEN]) -> Self {
        let public_key = Ed25519SigningKey::from_bytes(&seed)
            .verifying_key()
            .to_bytes();
        Secret::Ed25519 {
            private_key: seed,
            public_key,
        }
    }

    /// Whether tokens signed with `alg` can be produced and checked with this
    /// secret.
    pub fn supports(&self, alg: Algorithm) -> bool {
        matches!(
            (self, alg),
            (
                Secret::Hmac(_),
                Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
            ) | (Secret::Ed25519 { .. }, Algorithm::EdDSA)
        )
    }

    /// Reject empty HMAC secrets and Ed25519 pairs whose public half does not
    /// match the seed.
    pub fn validate(&self) -> TokenResult<()> {
        match self {
            Secret::Hmac(bytes) if bytes.is_empty() => {
                Err(TokenError::Config("hmac secret is empty".to_string()))
            }
            Secret::Hmac(_) => Ok(()),
            Secret::Ed25519 {
                private_key,
                public_key,
            } => {
                let expected = Ed25519SigningKey::from_bytes(private_key)
                    .verifying_key()
                    .to_bytes();
                if &expected != public_key {
                    return Err(TokenError::Config(
                        "Ed25519 public key does not match private seed".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::Hmac(_) => f.write_str("Secret::Hmac(<redacted>)"),
            Secret::Ed25519 { public_key, .. } => f
                .debug_struct("Secret::Ed25519")
                .field("public_key", &URL_SAFE_NO_PAD.encode(public_key))
                .finish_non_exhaustive(),
        }
    }
}

/// A secret with its `jsonwebtoken` keys prepared once.
pub struct KeyMaterial {
    kid: Option<String>,
    secret: Secret,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl KeyMaterial {
    pub fn new(kid: Option<String>, secret: Secret) -> TokenResult<Self> {
        secret.validate()?;
        let (encoding_key, decoding_key) = match &secret {
            Secret::Hmac(bytes) => (
                EncodingKey::from_secret(bytes),
                DecodingKey::from_secret(bytes),
            ),
            Secret::Ed25519 {
                private_key,
                public_key,
            } => {
                // jsonwebtoken takes EdDSA private keys as PKCS8 DER and public
                // keys as the base64url `x` JWK component.
                let der = Ed25519SigningKey::from_bytes(private_key)
                    .to_pkcs8_der()
                    .map_err(|err| TokenError::Config(format!("encode Ed25519 key: {err}")))?;
                let x = URL_SAFE_NO_PAD.encode(public_key);
                (
                    EncodingKey::from_ed_der(der.as_bytes()),
                    DecodingKey::from_ed_components(&x)?,
                )
            }
        };
        Ok(Self {
            kid,
            secret,
            encoding_key,
            decoding_key,
        })
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kid", &self.kid)
            .field("secret", &self.secret)
            .finish_non_exhaustive()
    }
}

/// Resolves signing and verification keys.
///
/// The default [`StaticSecretFetcher`] always returns the configured secret;
/// [`KeyRing`] selects by the header `kid`.
pub trait SecretFetcher: Send + Sync {
    fn signing_key(&self, claims: &ClaimSet) -> TokenResult<Arc<KeyMaterial>>;
    fn verification_key(&self, header: &Header) -> TokenResult<Arc<KeyMaterial>>;
}

#[derive(Debug, Clone)]
pub struct StaticSecretFetcher {
    key: Arc<KeyMaterial>,
}

impl StaticSecretFetcher {
    pub fn new(key: KeyMaterial) -> Self {
        Self { key: Arc::new(key) }
    }
}

impl SecretFetcher for StaticSecretFetcher {
    fn signing_key(&self, _claims: &ClaimSet) -> TokenResult<Arc<KeyMaterial>> {
        Ok(self.key.clone())
    }

    fn verification_key(&self, _header: &Header) -> TokenResult<Arc<KeyMaterial>> {
        Ok(self.key.clone())
    }
}

/// Current key plus older keys that still verify.
///
/// New tokens are signed with `current`. Verification picks the key whose
/// `kid` matches the header; tokens without a `kid` use `current`.
#[derive(Debug, Clone)]
pub struct KeyRing {
    current: Arc<KeyMaterial>,
    previous: Vec<Arc<KeyMaterial>>,
}

impl KeyRing {
    pub fn new(current: KeyMaterial) -> Self {
        Self {
            current: Arc::new(current),
            previous: Vec::new(),
        }
    }

    pub fn with_previous(mut self, key: KeyMaterial) -> Self {
        self.previous.push(Arc::new(key));
        self
    }

    pub fn all_keys(&self) -> impl Iterator<Item = &Arc<KeyMaterial>> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }
}

impl SecretFetcher for KeyRing {
    fn signing_key(&self, _claims: &ClaimSet) -> TokenResult<Arc<KeyMaterial>> {
        Ok(self.current.clone())
    }

    fn verification_key(&self, header: &Header) -> TokenResult<Arc<KeyMaterial>> {
        match header.kid.as_deref() {
            None => Ok(self.current.clone()),
            Some(kid) => self
                .all_keys()
                .find(|key| key.kid() == Some(kid))
                .cloned()
                .ok_or_else(|| TokenError::Signature(format!("unknown key id {kid}"))),
        }
    }
}

/// Sign a claim set.
///
/// # Errors
/// - [`TokenError::Signature`] if the key cannot produce `algorithm`.
pub fn sign(claims: &ClaimSet, algorithm: Algorithm, key: &KeyMaterial) -> TokenResult<String> {
    if !key.secret.supports(algorithm) {
        return Err(TokenError::Signature(format!(
            "algorithm {algorithm:?} does not match the signing key"
        )));
    }
    let mut header = Header::new(algorithm);
    header.kid = key.kid.clone();
    Ok(jsonwebtoken::encode(&header, claims, &key.encoding_key)?)
}

/// Authenticate a token and return its raw claims.
///
/// # Errors
/// - [`TokenError::Signature`] for malformed tokens, algorithms outside
///   `allowed`, unknown keys, and signature mismatches.
pub fn verify(
    token: &str,
    allowed: &[Algorithm],
    fetcher: &dyn SecretFetcher,
) -> TokenResult<ClaimSet> {
    check_structure(token)?;
    let header = jsonwebtoken::decode_header(token)?;
    if !allowed.contains(&header.alg) {
        return Err(TokenError::Signature(format!(
            "algorithm {:?} is not allowed",
            header.alg
        )));
    }
    let key = fetcher
        .verification_key(&header)
        .map_err(|err| match err {
            TokenError::Signature(_) => err,
            other => TokenError::Signature(other.to_string()),
        })?;
    if !key.secret.supports(header.alg) {
        return Err(TokenError::Signature(format!(
            "algorithm {:?} does not match the verification key",
            header.alg
        )));
    }

    let mut validation = Validation::new(header.alg);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<ClaimSet>(token, &key.decoding_key, &validation)?;
    Ok(data.claims)
}

/// Header and claims of a token, read without verification.
#[derive(Debug, Clone)]
pub struct PeekedToken {
    pub header: Header,
    pub claims: ClaimSet,
}

/// Decode a token without checking its signature.
///
/// For diagnostics only: nothing returned here is authenticated.
pub fn peek(token: &str) -> TokenResult<PeekedToken> {
    check_structure(token)?;
    let header = jsonwebtoken::decode_header(token)?;
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenError::Signature("missing payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|err| TokenError::Signature(format!("payload encoding: {err}")))?;
    let claims = serde_json::from_slice(&bytes)
        .map_err(|err| TokenError::Signature(format!("payload json: {err}")))?;
    Ok(PeekedToken { header, claims })
}

fn check_structure(token: &str) -> TokenResult<()> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != SEGMENTS {
        return Err(TokenError::Signature(format!(
            "expected {SEGMENTS} segments, found {}",
            segments.len()
        )));
    }
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(TokenError::Signature("empty token segment".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SEED: [u8; ED25519_KEY_LEN] = [5u8; ED25519_KEY_LEN];

    fn claims() -> ClaimSet {
        let mut claims = ClaimSet::new();
        claims.insert("sub", "User:42");
        claims.insert("exp", 4_000_000_000i64);
        claims
    }

    fn hmac_key() -> KeyMaterial {
        KeyMaterial::new(None, Secret::hmac("super-secret")).expect("hmac key")
    }

    fn ed_key(kid: &str) -> KeyMaterial {
        KeyMaterial::new(Some(kid.to_string()), Secret::ed25519_from_seed(TEST_SEED))
            .expect("ed25519 key")
    }

    fn fetcher(key: KeyMaterial) -> StaticSecretFetcher {
        StaticSecretFetcher::new(key)
    }

    fn forge(header_json: &str, payload_json: &str, signature: &str) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(payload_json),
            signature
        )
    }

    #[test]
    fn hmac_sign_and_verify_roundtrip() {
        let key = hmac_key();
        let token = sign(&claims(), Algorithm::HS512, &key).expect("sign");
        assert_eq!(token.split('.').count(), 3);
        let verified = verify(&token, &[Algorithm::HS512], &fetcher(key)).expect("verify");
        assert_eq!(verified, claims());
    }

    #[test]
    fn eddsa_sign_and_verify_roundtrip() {
        let key = ed_key("k1");
        let token = sign(&claims(), Algorithm::EdDSA, &key).expect("sign");
        let header = jsonwebtoken::decode_header(&token).expect("header");
        assert_eq!(header.kid.as_deref(), Some("k1"));
        let verified = verify(&token, &[Algorithm::EdDSA], &fetcher(key)).expect("verify");
        assert_eq!(verified.sub(), Some("User:42"));
    }

    #[test]
    fn tampered_payload_fails() {
        let key = hmac_key();
        let token = sign(&claims(), Algorithm::HS256, &key).expect("sign");
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut forged = claims();
        forged.insert("sub", "User:1");
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).expect("json"));
        let tampered = parts.join(".");
        let err = verify(&tampered, &[Algorithm::HS256], &fetcher(key)).expect_err("tampered");
        assert!(matches!(err, TokenError::Signature(_)));
    }

    #[test]
    fn disallowed_algorithm_fails() {
        let key = hmac_key();
        let token = sign(&claims(), Algorithm::HS256, &key).expect("sign");
        let err = verify(&token, &[Algorithm::HS512], &fetcher(key)).expect_err("disallowed");
        assert!(matches!(err, TokenError::Signature(_)));
    }

    #[test]
    fn alg_none_is_rejected() {
        let token = forge(
            r#"{"alg":"none","typ":"JWT"}"#,
            r#"{"sub":"User:42"}"#,
            "e30",
        );
        let err = verify(&token, &[Algorithm::HS256], &fetcher(hmac_key())).expect_err("none");
        assert!(matches!(err, TokenError::Signature(_)));

        let unsigned = format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(r#"{"sub":"User:42"}"#)
        );
        let err = verify(&unsigned, &[Algorithm::HS256], &fetcher(hmac_key()))
            .expect_err("unsigned");
        assert!(matches!(err, TokenError::Signature(_)));
    }

    #[test]
    fn key_family_confusion_is_rejected() {
        // An HS256 token whose HMAC key is the Ed25519 public key must not
        // verify against an EdDSA key even if HS256 were allowed.
        let ed = ed_key("k1");
        let public = match ed.secret() {
            Secret::Ed25519 { public_key, .. } => public_key.to_vec(),
            Secret::Hmac(_) => unreachable!(),
        };
        let confused = KeyMaterial::new(None, Secret::hmac(public)).expect("hmac");
        let token = sign(&claims(), Algorithm::HS256, &confused).expect("sign");
        let err = verify(
            &token,
            &[Algorithm::EdDSA, Algorithm::HS256],
            &fetcher(ed),
        )
        .expect_err("confused");
        assert!(matches!(err, TokenError::Signature(_)));
    }

    #[test]
    fn malformed_structure_fails() {
        let fetcher = fetcher(hmac_key());
        for token in ["", "abc", "a.b", "a.b.c.d", "a..c", "!!!.###.$$$"] {
            let err = verify(token, &[Algorithm::HS256], &fetcher).expect_err(token);
            assert!(matches!(err, TokenError::Signature(_)), "{token}");
        }
    }

    #[test]
    fn sign_rejects_mismatched_algorithm() {
        let err = sign(&claims(), Algorithm::EdDSA, &hmac_key()).expect_err("mismatch");
        assert!(matches!(err, TokenError::Signature(_)));
    }

    #[test]
    fn key_ring_selects_by_kid() {
        let old = KeyMaterial::new(Some("old".to_string()), Secret::hmac("old-secret"))
            .expect("old key");
        let old_token = sign(&claims(), Algorithm::HS256, &old).expect("sign");
        let ring = KeyRing::new(
            KeyMaterial::new(Some("new".to_string()), Secret::hmac("new-secret"))
                .expect("new key"),
        )
        .with_previous(old);

        verify(&old_token, &[Algorithm::HS256], &ring).expect("previous key verifies");

        let stranger = KeyMaterial::new(Some("gone".to_string()), Secret::hmac("gone"))
            .expect("stranger");
        let token = sign(&claims(), Algorithm::HS256, &stranger).expect("sign");
        let err = verify(&token, &[Algorithm::HS256], &ring).expect_err("unknown kid");
        assert!(matches!(err, TokenError::Signature(_)));
    }

    #[test]
    fn secret_validation() {
        assert!(Secret::hmac(Vec::new()).validate().is_err());
        let mut mismatched = Secret::ed25519_from_seed(TEST_SEED);
        if let Secret::Ed25519 { public_key, .. } = &mut mismatched {
            public_key[0] ^= 0xff;
        }
        assert!(KeyMaterial::new(None, mismatched).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", hmac_key());
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn peek_reads_unverified_claims() {
        let token = sign(&claims(), Algorithm::HS256, &hmac_key()).expect("sign");
        let peeked = peek(&token).expect("peek");
        assert_eq!(peeked.header.alg, Algorithm::HS256);
        assert_eq!(peeked.claims.sub(), Some("User:42"));
        assert!(peek("not-a-token").is_err());
    }
}
