use thiserror::Error;

/// Closed failure taxonomy for every token operation.
///
/// Middleware maps these onto transport responses through [`TokenError::code`],
/// which is stable across releases.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signature error: {0}")]
    Signature(String),
    #[error("token expired")]
    TokenExpired,
    #[error("token not yet valid")]
    TokenNotYetValid,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("token revoked")]
    Revoked,
    #[error("unknown permission {permission} in set {set}")]
    UnknownPermission { set: String, permission: String },
    #[error("unknown permission set: {0}")]
    UnknownPermissionSet(String),
    #[error("permission set {set} has {len} entries, at most 64 fit a bitmask")]
    PermissionSetOverflow { set: String, len: usize },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid token: {0}")]
    InvalidToken(Box<TokenError>),
    #[error("claim {0} is reserved and cannot be set by callers")]
    ReservedClaim(String),
    #[error("invalid claim {claim}: {reason}")]
    InvalidClaim { claim: String, reason: String },
    #[error("hook error: {0}")]
    Hook(String),
    #[error("config error: {0}")]
    Config(String),
}

impl TokenError {
    /// Stable, machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Signature(_) => "signature_error",
            TokenError::TokenExpired => "token_expired",
            TokenError::TokenNotYetValid => "token_not_yet_valid",
            TokenError::InvalidIssuer => "invalid_issuer",
            TokenError::InvalidAudience => "invalid_audience",
            TokenError::Revoked => "token_revoked",
            TokenError::UnknownPermission { .. } => "unknown_permission",
            TokenError::UnknownPermissionSet(_) => "unknown_permission_set",
            TokenError::PermissionSetOverflow { .. } => "permission_set_overflow",
            TokenError::Serialization(_) => "serialization_error",
            TokenError::InvalidToken(_) => "invalid_token",
            TokenError::ReservedClaim(_) => "reserved_claim",
            TokenError::InvalidClaim { .. } => "invalid_claim",
            TokenError::Hook(_) => "hook_error",
            TokenError::Config(_) => "config_error",
        }
    }

    /// The innermost reason, looking through `InvalidToken` wrappers.
    pub fn root_cause(&self) -> &TokenError {
        match self {
            TokenError::InvalidToken(inner) => inner.root_cause(),
            other => other,
        }
    }

    pub(crate) fn invalid_claim(claim: &str, reason: impl Into<String>) -> Self {
        TokenError::InvalidClaim {
            claim: claim.to_string(),
            reason: reason.into(),
        }
    }
}

// Anything jsonwebtoken rejects is a structural or cryptographic failure; the
// registered-claim checks it could perform are disabled in favour of the
// validator pipeline.
impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        TokenError::Signature(value.to_string())
    }
}

pub type TokenResult<T> = Result<T, TokenError>;
