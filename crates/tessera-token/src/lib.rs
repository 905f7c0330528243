//! Signed token lifecycle primitives.
//!
//! # Purpose
//! Issues, verifies, refreshes, revokes and exchanges signed claim tokens
//! whose permissions travel as compact per-set bitmasks.
//!
//! # How it fits
//! Applications build one [`TokenEngine`] from a [`TokenConfig`] and a
//! [`ResourceSerializer`], then call it from request handlers. Storage for
//! revocations and hooks around the lifecycle are injected at construction.
//!
//! # Key invariants
//! - Only algorithms on the configured allow-list are signed or accepted;
//!   `alg: none` never verifies.
//! - Claim checks run in a fixed order (iss, nbf, iat, exp, aud, then custom
//!   validators) and stop at the first failure.
//! - A permission set holds at most 64 symbols; bit `i` is the symbol at
//!   position `i` of its vocabulary.
//!
//! # Important configuration
//! - Issuer and secret must match between issuing and verifying processes.
//! - Reordering a permission vocabulary changes the meaning of every token
//!   already issued.
//!
//! # Examples
//! ```rust
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//! use tessera_token::{
//!     ClaimSet, EncodeOptions, PermissionGrant, Secret, SubjectSerializer, TokenConfig,
//!     TokenEngine, VerifyOptions,
//! };
//!
//! let config = TokenConfig::builder("App", Secret::hmac("a-long-random-secret"))
//!     .ttl(Duration::from_secs(30 * 24 * 60 * 60))
//!     .permission_set("default", ["read", "write"])
//!     .build()
//!     .expect("config");
//! let engine = TokenEngine::new(config, SubjectSerializer).expect("engine");
//!
//! let options = EncodeOptions {
//!     permissions: Some(BTreeMap::from([(
//!         "default".to_string(),
//!         PermissionGrant::named(["read", "write"]),
//!     )])),
//!     ..EncodeOptions::default()
//! };
//! let issued = engine
//!     .encode_and_sign(&"User:42".to_string(), "access", &ClaimSet::new(), &options)
//!     .expect("issue");
//! let claims = engine
//!     .decode_and_verify(&issued.token, &VerifyOptions::token_type("access"))
//!     .expect("verify");
//! assert!(engine.has_all_permissions(&claims, "default", &["read", "write"]).expect("check"));
//! ```
//!
//! # Common pitfalls
//! - Revocation is a no-op until a [`RevocationStore`] is attached.
//! - Permissions granted with `max` include bits for symbols added later.

mod claim_kind;
pub mod claims;
mod clock;
mod config;
mod engine;
mod errors;
mod hooks;
mod permissions;
mod revocation;
mod serializer;
pub mod signer;
mod validation;

pub use claim_kind::ClaimKind;
pub use claims::{ClaimSet, ClaimsBuilder, generate_jti, is_registered};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    DEFAULT_HMAC_ALGORITHM, DEFAULT_TTL, TokenConfig, TokenConfigBuilder, parse_duration,
};
pub use engine::{
    EncodeOptions, IssuedToken, RefreshOptions, Reissued, TokenEngine, TokenEngineBuilder,
    VerifyOptions,
};
pub use errors::{TokenError, TokenResult};
pub use hooks::{NoopHooks, TokenHooks};
pub use jsonwebtoken::Algorithm;
pub use permissions::{
    EncodedPermissions, MaxMarker, PermissionCodec, PermissionGrant, PermissionGrants,
    permissions_from_claims,
};
pub use revocation::{InMemoryRevocationStore, RevocationStore, RevocationValidator, RevokingHooks};
pub use serializer::{ResourceSerializer, SubjectSerializer, parse_typed_subject, typed_subject};
pub use signer::{KeyMaterial, KeyRing, PeekedToken, Secret, SecretFetcher, StaticSecretFetcher};
pub use validation::{
    AudienceValidator, ClaimValidator, ExpiryValidator, IssuedAtValidator, IssuerValidator,
    NotBeforeValidator, ValidationContext, ValidatorPipeline,
};
