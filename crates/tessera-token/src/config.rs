//! Process-wide token configuration.
//!
//! Built once at startup (programmatically, from environment variables, or
//! from environment variables overlaid with a YAML file) and shared
//! read-only afterwards.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `TESSERA_ISSUER` | issuer, required |
//! | `TESSERA_SECRET` | HMAC secret |
//! | `TESSERA_ED25519_SEED` | hex Ed25519 seed, used instead of `TESSERA_SECRET` |
//! | `TESSERA_KID` | key id placed in token headers |
//! | `TESSERA_ALGORITHMS` | comma separated allow-list, first one signs |
//! | `TESSERA_TTL` | default lifetime, e.g. `30days` |
//! | `TESSERA_VERIFY_ISSUER` | `true`/`false` |
//! | `TESSERA_ALLOWED_DRIFT` | tolerated clock skew, e.g. `30s` |
//! | `TESSERA_CONFIG` | path of a YAML overlay |
use crate::signer::ED25519_KEY_LEN;
use crate::{Secret, TokenError, TokenResult};
use anyhow::{Context, Result, anyhow, bail};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(4 * 7 * 24 * 60 * 60);
pub const DEFAULT_HMAC_ALGORITHM: Algorithm = Algorithm::HS512;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub secret: Secret,
    pub kid: Option<String>,
    /// Allow-list; the first entry signs new tokens.
    pub algorithms: Vec<Algorithm>,
    pub ttl: Duration,
    /// Per token type lifetimes, overriding `ttl`.
    pub token_ttl: BTreeMap<String, Duration>,
    pub verify_issuer: bool,
    pub allowed_drift: Duration,
    /// Ordered vocabulary per permission set.
    pub permissions: BTreeMap<String, Vec<String>>,
}

impl TokenConfig {
    pub fn builder(issuer: impl Into<String>, secret: Secret) -> TokenConfigBuilder {
        TokenConfigBuilder::new(issuer, secret)
    }

    pub fn signing_algorithm(&self) -> Algorithm {
        self.algorithms
            .first()
            .copied()
            .unwrap_or(DEFAULT_HMAC_ALGORITHM)
    }

    pub fn ttl_for(&self, token_type: &str) -> Duration {
        self.token_ttl.get(token_type).copied().unwrap_or(self.ttl)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// - [`TokenError::Config`] for an empty issuer, empty allow-list, zero
    ///   ttl, or an algorithm the secret cannot serve.
    /// - [`TokenError::PermissionSetOverflow`] for a set wider than 64.
    pub fn validate(&self) -> TokenResult<()> {
        if self.issuer.is_empty() {
            return Err(TokenError::Config("issuer is empty".to_string()));
        }
        if self.algorithms.is_empty() {
            return Err(TokenError::Config("no allowed algorithms".to_string()));
        }
        if let Some(alg) = self
            .algorithms
            .iter()
            .find(|alg| !self.secret.supports(**alg))
        {
            return Err(TokenError::Config(format!(
                "algorithm {alg:?} cannot be used with the configured secret"
            )));
        }
        if self.ttl.is_zero() || self.token_ttl.values().any(Duration::is_zero) {
            return Err(TokenError::Config("ttl must be positive".to_string()));
        }
        self.secret.validate()?;
        crate::PermissionCodec::new(self.permissions.clone())?;
        Ok(())
    }

    /// Load from `TESSERA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from environment variables, then apply the YAML file named by
    /// `TESSERA_CONFIG` if set.
    pub fn from_env_or_yaml() -> Result<Self> {
        Self::from_lookup_or_yaml(|key| std::env::var(key).ok())
    }

    /// [`TokenConfig::from_lookup`] followed by the YAML overlay named by
    /// `TESSERA_CONFIG` in the same source.
    pub fn from_lookup_or_yaml(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::from_lookup(&lookup)?;
        if let Some(path) = lookup("TESSERA_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read TESSERA_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let issuer = lookup("TESSERA_ISSUER").context("TESSERA_ISSUER is required")?;
        let secret = match (lookup("TESSERA_ED25519_SEED"), lookup("TESSERA_SECRET")) {
            (Some(seed), _) => {
                Secret::ed25519_from_seed(parse_seed(&seed).context("parse TESSERA_ED25519_SEED")?)
            }
            (None, Some(secret)) => Secret::hmac(secret.into_bytes()),
            (None, None) => bail!("one of TESSERA_SECRET or TESSERA_ED25519_SEED is required"),
        };
        let mut builder = TokenConfigBuilder::new(issuer, secret);
        if let Some(kid) = lookup("TESSERA_KID") {
            builder = builder.kid(kid);
        }
        if let Some(algorithms) = lookup("TESSERA_ALGORITHMS") {
            let parsed = parse_algorithms(algorithms.split(','))
                .context("parse TESSERA_ALGORITHMS")?;
            builder = builder.algorithms(parsed);
        }
        if let Some(ttl) = lookup("TESSERA_TTL") {
            builder = builder.ttl(parse_duration(&ttl).context("parse TESSERA_TTL")?);
        }
        if let Some(verify) = lookup("TESSERA_VERIFY_ISSUER") {
            let verify = verify
                .parse::<bool>()
                .with_context(|| "parse TESSERA_VERIFY_ISSUER")?;
            builder = builder.verify_issuer(verify);
        }
        if let Some(drift) = lookup("TESSERA_ALLOWED_DRIFT") {
            let drift = parse_duration(&drift).context("parse TESSERA_ALLOWED_DRIFT")?;
            builder = builder.allowed_drift(drift);
        }
        Ok(builder.build()?)
    }

    /// Overlay settings from a YAML document and re-validate.
    ///
    /// The overlay is all or nothing: on error `self` is left untouched.
    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let overlay: TokenConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse token config yaml")?;
        let mut updated = self.clone();
        if let Some(issuer) = overlay.issuer {
            updated.issuer = issuer;
        }
        if let Some(algorithms) = overlay.algorithms {
            updated.algorithms = parse_algorithms(algorithms.iter().map(String::as_str))
                .with_context(|| "parse algorithms")?;
        }
        if let Some(ttl) = overlay.ttl {
            updated.ttl = parse_duration(&ttl).with_context(|| "parse ttl")?;
        }
        if let Some(token_ttl) = overlay.token_ttl {
            for (token_type, ttl) in token_ttl {
                let ttl = parse_duration(&ttl)
                    .with_context(|| format!("parse token_ttl.{token_type}"))?;
                updated.token_ttl.insert(token_type, ttl);
            }
        }
        if let Some(verify) = overlay.verify_issuer {
            updated.verify_issuer = verify;
        }
        if let Some(drift) = overlay.allowed_drift {
            updated.allowed_drift =
                parse_duration(&drift).with_context(|| "parse allowed_drift")?;
        }
        if let Some(permissions) = overlay.permissions {
            updated.permissions = permissions;
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenConfigOverride {
    issuer: Option<String>,
    algorithms: Option<Vec<String>>,
    ttl: Option<String>,
    token_ttl: Option<BTreeMap<String, String>>,
    verify_issuer: Option<bool>,
    allowed_drift: Option<String>,
    permissions: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone)]
pub struct TokenConfigBuilder {
    config: TokenConfig,
}

impl TokenConfigBuilder {
    pub fn new(issuer: impl Into<String>, secret: Secret) -> Self {
        let algorithms = match secret {
            Secret::Hmac(_) => vec![DEFAULT_HMAC_ALGORITHM],
            Secret::Ed25519 { .. } => vec![Algorithm::EdDSA],
        };
        Self {
            config: TokenConfig {
                issuer: issuer.into(),
                secret,
                kid: None,
                algorithms,
                ttl: DEFAULT_TTL,
                token_ttl: BTreeMap::new(),
                verify_issuer: true,
                allowed_drift: Duration::ZERO,
                permissions: BTreeMap::new(),
            },
        }
    }

    pub fn kid(mut self, kid: impl Into<String>) -> Self {
        self.config.kid = Some(kid.into());
        self
    }

    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.config.algorithms = algorithms;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn token_ttl(mut self, token_type: impl Into<String>, ttl: Duration) -> Self {
        self.config.token_ttl.insert(token_type.into(), ttl);
        self
    }

    pub fn verify_issuer(mut self, verify: bool) -> Self {
        self.config.verify_issuer = verify;
        self
    }

    pub fn allowed_drift(mut self, drift: Duration) -> Self {
        self.config.allowed_drift = drift;
        self
    }

    pub fn permission_set<I, S>(mut self, name: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .permissions
            .insert(name.into(), symbols.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> TokenResult<TokenConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Parse a duration such as `30days`, `12h` or `90s`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|err| anyhow!("invalid duration {value:?}: {err}"))
}

fn parse_algorithms<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<Algorithm>> {
    names
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            Algorithm::from_str(name).map_err(|_| anyhow!("unsupported algorithm {name:?}"))
        })
        .collect()
}

fn parse_seed(value: &str) -> Result<[u8; ED25519_KEY_LEN]> {
    let bytes = hex::decode(value.trim()).context("seed is not hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow!("seed must be {ED25519_KEY_LEN} bytes, got {len}"))
}
