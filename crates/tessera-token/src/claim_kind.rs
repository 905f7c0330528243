use std::borrow::Cow;

/// Tag used to key claim validators.
///
/// The five registered claims have fixed variants; anything else an
/// application wants to check goes through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    Iss,
    Nbf,
    Iat,
    Exp,
    Aud,
    Custom(Cow<'static, str>),
}

impl ClaimKind {
    /// Built-in validation order.
    pub const BUILT_IN: [ClaimKind; 5] = [
        ClaimKind::Iss,
        ClaimKind::Nbf,
        ClaimKind::Iat,
        ClaimKind::Exp,
        ClaimKind::Aud,
    ];

    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        ClaimKind::Custom(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            ClaimKind::Iss => "iss",
            ClaimKind::Nbf => "nbf",
            ClaimKind::Iat => "iat",
            ClaimKind::Exp => "exp",
            ClaimKind::Aud => "aud",
            ClaimKind::Custom(name) => name,
        }
    }

    pub fn is_built_in(&self) -> bool {
        !matches!(self, ClaimKind::Custom(_))
    }
}

impl std::fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClaimKind {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "iss" => ClaimKind::Iss,
            "nbf" => ClaimKind::Nbf,
            "iat" => ClaimKind::Iat,
            "exp" => ClaimKind::Exp,
            "aud" => ClaimKind::Aud,
            other => ClaimKind::Custom(Cow::Owned(other.to_string())),
        })
    }
}
