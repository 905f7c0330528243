//! Mapping between application resources and token subjects.
//!
//! # Purpose
//! The engine never interprets the `sub` claim; a [`ResourceSerializer`]
//! turns an application resource into the subject string at issuance and
//! resolves it back after verification.
//!
//! # Key invariants
//! - `from_token(for_token(r))` must identify the same resource as `r`.
//! - Serializer failures reach callers unchanged as
//!   [`TokenError::Serialization`].
//!
//! # Examples
//! ```rust
//! use tessera_token::{ResourceSerializer, SubjectSerializer};
//!
//! let serializer = SubjectSerializer;
//! let subject = serializer.for_token(&"User:42".to_string()).expect("subject");
//! assert_eq!(serializer.from_token(&subject).expect("resource"), "User:42");
//! ```
use crate::{TokenError, TokenResult};

pub trait ResourceSerializer: Send + Sync {
    type Resource;

    fn for_token(&self, resource: &Self::Resource) -> TokenResult<String>;

    fn from_token(&self, subject: &str) -> TokenResult<Self::Resource>;
}

/// Uses the subject string itself as the resource. Empty subjects are
/// rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectSerializer;

impl ResourceSerializer for SubjectSerializer {
    type Resource = String;

    fn for_token(&self, resource: &String) -> TokenResult<String> {
        non_empty(resource).map(str::to_string)
    }

    fn from_token(&self, subject: &str) -> TokenResult<String> {
        non_empty(subject).map(str::to_string)
    }
}

/// Build a `Kind:id` subject, the conventional shape for typed resources.
pub fn typed_subject(kind: &str, id: impl std::fmt::Display) -> String {
    format!("{kind}:{id}")
}

/// Split a `Kind:id` subject produced by [`typed_subject`].
///
/// # Errors
/// - [`TokenError::Serialization`] if the subject has no `:` or an empty part.
pub fn parse_typed_subject(subject: &str) -> TokenResult<(&str, &str)> {
    match subject.split_once(':') {
        Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok((kind, id)),
        _ => Err(TokenError::Serialization(format!(
            "subject {subject:?} is not of the form Kind:id"
        ))),
    }
}

fn non_empty(value: &str) -> TokenResult<&str> {
    if value.is_empty() {
        return Err(TokenError::Serialization("empty subject".to_string()));
    }
    Ok(value)
}
