//! Bit-packed permission sets.
//!
//! # Purpose
//! Converts named permission lists to and from `u64` bitmasks, one bitmask per
//! configured permission set, and answers `all`/`any` queries against them.
//!
//! # How it fits
//! The engine encodes caller grants into the `pem` claim at issuance; request
//! handlers decode or query that claim after verification.
//!
//! # Key invariants
//! - Bit `i` of a set means the `i`-th symbol of that set's vocabulary.
//! - A vocabulary holds at most 64 symbols.
//! - [`PermissionGrant::Max`] encodes every bit, including bits with no symbol
//!   yet. Symbols appended to the vocabulary later are granted to such tokens.
//!
//! # Important configuration
//! - The vocabulary order is part of the wire format. Reordering or removing
//!   symbols silently changes the meaning of tokens already issued; append
//!   only.
//!
//! # Examples
//! ```rust
//! use std::collections::BTreeMap;
//! use tessera_token::PermissionCodec;
//!
//! let mut vocabulary = BTreeMap::new();
//! vocabulary.insert("default".to_string(), vec!["read".to_string(), "write".to_string()]);
//! let codec = PermissionCodec::new(vocabulary).expect("codec");
//!
//! let bits = codec.encode("default", &["read"]).expect("encode");
//! assert!(codec.all(bits, &["read"], "default").expect("all"));
//! assert!(!codec.all(bits, &["read", "write"], "default").expect("all"));
//! ```
//!
//! # Common pitfalls
//! - Decoding ignores bits with no symbol; it never reports them as errors.
use crate::claims::PERMISSIONS;
use crate::{ClaimSet, TokenError, TokenResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_SET_WIDTH: usize = u64::BITS as usize;

/// Bitmask per permission set name, as embedded in the `pem` claim.
pub type EncodedPermissions = BTreeMap<String, u64>;

/// Requested permissions for one set.
///
/// Deserializes from either a list of symbols or the string `"max"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionGrant {
    Named(Vec<String>),
    Max(MaxMarker),
}

impl PermissionGrant {
    pub fn named<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionGrant::Named(symbols.into_iter().map(Into::into).collect())
    }

    pub fn max() -> Self {
        PermissionGrant::Max(MaxMarker::Max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxMarker {
    Max,
}

/// Requested permissions keyed by set name.
pub type PermissionGrants = BTreeMap<String, PermissionGrant>;

/// Encoder/decoder over a fixed permission vocabulary.
#[derive(Debug, Clone, Default)]
pub struct PermissionCodec {
    sets: BTreeMap<String, Vec<String>>,
}

impl PermissionCodec {
    /// Build a codec, rejecting any set wider than 64 symbols.
    ///
    /// # Errors
    /// - [`TokenError::PermissionSetOverflow`] for an oversized set.
    pub fn new(sets: BTreeMap<String, Vec<String>>) -> TokenResult<Self> {
        for (name, symbols) in &sets {
            check_width(name, symbols)?;
        }
        Ok(Self { sets })
    }

    pub fn set_names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn vocabulary(&self, set: &str) -> TokenResult<&[String]> {
        let symbols = self
            .sets
            .get(set)
            .ok_or_else(|| TokenError::UnknownPermissionSet(set.to_string()))?;
        check_width(set, symbols)?;
        Ok(symbols)
    }

    /// All 64 bits set.
    pub fn max(&self) -> u64 {
        u64::MAX
    }

    /// Encode symbols of `set` into a bitmask.
    ///
    /// # Errors
    /// - [`TokenError::UnknownPermissionSet`] if `set` is not configured.
    /// - [`TokenError::UnknownPermission`] if a symbol is not in the set.
    /// - [`TokenError::PermissionSetOverflow`] if the set exceeds 64 symbols.
    pub fn encode<S: AsRef<str>>(&self, set: &str, symbols: &[S]) -> TokenResult<u64> {
        let vocabulary = self.vocabulary(set)?;
        symbols.iter().try_fold(0u64, |bits, symbol| {
            Ok(bits | bit_for(set, vocabulary, symbol.as_ref())?)
        })
    }

    pub fn encode_grant(&self, set: &str, grant: &PermissionGrant) -> TokenResult<u64> {
        match grant {
            PermissionGrant::Named(symbols) => self.encode(set, symbols.as_slice()),
            PermissionGrant::Max(_) => {
                self.vocabulary(set)?;
                Ok(self.max())
            }
        }
    }

    pub fn encode_grants(&self, grants: &PermissionGrants) -> TokenResult<EncodedPermissions> {
        grants
            .iter()
            .map(|(set, grant)| Ok((set.clone(), self.encode_grant(set, grant)?)))
            .collect()
    }

    /// Decode a bitmask into symbols, in vocabulary order.
    ///
    /// Bits with no symbol are ignored.
    pub fn decode(&self, set: &str, bits: u64) -> TokenResult<Vec<String>> {
        let vocabulary = self.vocabulary(set)?;
        Ok(vocabulary
            .iter()
            .enumerate()
            .filter(|(index, _)| bits & (1u64 << index) != 0)
            .map(|(_, symbol)| symbol.clone())
            .collect())
    }

    /// Decode every set present in an encoded map. Sets missing from the
    /// vocabulary are skipped, like unknown bits.
    pub fn decode_all(
        &self,
        encoded: &EncodedPermissions,
    ) -> TokenResult<BTreeMap<String, Vec<String>>> {
        let mut decoded = BTreeMap::new();
        for (set, bits) in encoded {
            if self.sets.contains_key(set) {
                decoded.insert(set.clone(), self.decode(set, *bits)?);
            }
        }
        Ok(decoded)
    }

    /// True iff every requested symbol's bit is set.
    pub fn all<S: AsRef<str>>(&self, bits: u64, symbols: &[S], set: &str) -> TokenResult<bool> {
        let wanted = self.encode(set, symbols)?;
        Ok(bits & wanted == wanted)
    }

    /// True iff at least one requested symbol's bit is set.
    pub fn any<S: AsRef<str>>(&self, bits: u64, symbols: &[S], set: &str) -> TokenResult<bool> {
        let wanted = self.encode(set, symbols)?;
        Ok(bits & wanted != 0)
    }
}

/// Read the `pem` claim. An absent claim is an empty map.
///
/// # Errors
/// - [`TokenError::InvalidClaim`] if the claim is not an object of unsigned
///   integers.
pub fn permissions_from_claims(claims: &ClaimSet) -> TokenResult<EncodedPermissions> {
    let Some(value) = claims.get(PERMISSIONS) else {
        return Ok(EncodedPermissions::new());
    };
    let Value::Object(entries) = value else {
        return Err(TokenError::invalid_claim(PERMISSIONS, "expected an object"));
    };
    entries
        .iter()
        .map(|(set, bits)| {
            bits.as_u64()
                .map(|bits| (set.clone(), bits))
                .ok_or_else(|| {
                    TokenError::invalid_claim(PERMISSIONS, format!("set {set} is not a bitmask"))
                })
        })
        .collect()
}

fn check_width(set: &str, symbols: &[String]) -> TokenResult<()> {
    if symbols.len() > MAX_SET_WIDTH {
        return Err(TokenError::PermissionSetOverflow {
            set: set.to_string(),
            len: symbols.len(),
        });
    }
    Ok(())
}

fn bit_for(set: &str, vocabulary: &[String], symbol: &str) -> TokenResult<u64> {
    vocabulary
        .iter()
        .position(|candidate| candidate == symbol)
        .map(|index| 1u64 << index)
        .ok_or_else(|| TokenError::UnknownPermission {
            set: set.to_string(),
            permission: symbol.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> PermissionCodec {
        let mut sets = BTreeMap::new();
        sets.insert(
            "default".to_string(),
            vec!["read".to_string(), "write".to_string()],
        );
        sets.insert(
            "admin".to_string(),
            vec![
                "users".to_string(),
                "billing".to_string(),
                "audit".to_string(),
            ],
        );
        PermissionCodec::new(sets).expect("codec")
    }

    #[test]
    fn bit_position_follows_vocabulary_order() {
        let codec = codec();
        assert_eq!(codec.encode("default", &["read"]).expect("encode"), 0b01);
        assert_eq!(codec.encode("default", &["write"]).expect("encode"), 0b10);
        let admin = codec.encode("admin", &["audit", "users"]).expect("encode");
        assert_eq!(admin, 0b101);
        assert_eq!(codec.encode::<&str>("admin", &[]).expect("encode"), 0);
    }

    #[test]
    fn decode_inverts_encode() {
        let codec = codec();
        let bits = codec.encode("default", &["write", "read"]).expect("encode");
        assert_eq!(
            codec.decode("default", bits).expect("decode"),
            vec!["read".to_string(), "write".to_string()]
        );
    }

    #[test]
    fn all_and_any() {
        let codec = codec();
        let bits = codec.encode("default", &["read"]).expect("encode");
        let both = ["read", "write"];
        assert!(!codec.all(bits, &both, "default").expect("all"));
        assert!(codec.any(bits, &both, "default").expect("any"));
        assert!(codec.all(bits, &["read"], "default").expect("all"));
        assert!(!codec.any(bits, &["write"], "default").expect("any"));
        assert!(codec.all::<&str>(bits, &[], "default").expect("all"));
        assert!(!codec.any::<&str>(bits, &[], "default").expect("any"));
    }

    #[test]
    fn max_grants_everything_including_future_bits() {
        let codec = codec();
        let bits = codec
            .encode_grant("admin", &PermissionGrant::max())
            .expect("max");
        assert_eq!(bits, u64::MAX);
        assert!(
            codec
                .all(bits, &["users", "billing", "audit"], "admin")
                .expect("all")
        );

        let mut grown = BTreeMap::new();
        grown.insert(
            "admin".to_string(),
            vec![
                "users".to_string(),
                "billing".to_string(),
                "audit".to_string(),
                "exports".to_string(),
            ],
        );
        let grown = PermissionCodec::new(grown).expect("codec");
        assert!(grown.all(bits, &["exports"], "admin").expect("all"));
    }

    #[test]
    fn unknown_permission_and_set() {
        let codec = codec();
        let err = codec.encode("default", &["delete"]).expect_err("unknown");
        assert!(matches!(
            err,
            TokenError::UnknownPermission { ref permission, .. } if permission == "delete"
        ));
        let err = codec.encode("ops", &["read"]).expect_err("unknown set");
        assert!(matches!(err, TokenError::UnknownPermissionSet(_)));
        let err = codec.all(1, &["delete"], "default").expect_err("unknown");
        assert!(matches!(err, TokenError::UnknownPermission { .. }));
    }

    #[test]
    fn unknown_bits_are_ignored_on_decode() {
        let codec = codec();
        let decoded = codec.decode("default", 0b1111_0001).expect("decode");
        assert_eq!(decoded, vec!["read".to_string()]);
    }

    #[test]
    fn oversized_set_is_rejected() {
        let mut sets = BTreeMap::new();
        let wide: Vec<String> = (0..65).map(|i| format!("p{i}")).collect();
        sets.insert("wide".to_string(), wide);
        let err = PermissionCodec::new(sets).expect_err("overflow");
        assert!(matches!(err, TokenError::PermissionSetOverflow { len: 65, .. }));

        let mut sets = BTreeMap::new();
        let full: Vec<String> = (0..64).map(|i| format!("p{i}")).collect();
        sets.insert("full".to_string(), full);
        let codec = PermissionCodec::new(sets).expect("64 fits");
        assert_eq!(codec.encode("full", &["p63"]).expect("encode"), 1u64 << 63);
    }

    #[test]
    fn grants_deserialize_from_list_or_max() {
        let grants: PermissionGrants =
            serde_json::from_value(json!({"default": ["read"], "admin": "max"}))
                .expect("grants");
        assert_eq!(grants["default"], PermissionGrant::named(["read"]));
        assert_eq!(grants["admin"], PermissionGrant::max());

        let encoded = codec().encode_grants(&grants).expect("encode");
        assert_eq!(encoded["default"], 1);
        assert_eq!(encoded["admin"], u64::MAX);
    }

    #[test]
    fn claims_roundtrip_through_pem() {
        let codec = codec();
        let mut claims = ClaimSet::new();
        claims.insert(PERMISSIONS, json!({"default": 3, "legacy": 1}));
        let encoded = permissions_from_claims(&claims).expect("read pem");
        let decoded = codec.decode_all(&encoded).expect("decode");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["default"], vec!["read", "write"]);
    }

    #[test]
    fn malformed_pem_claim_is_rejected() {
        let mut claims = ClaimSet::new();
        claims.insert(PERMISSIONS, json!({"default": -1}));
        assert!(matches!(
            permissions_from_claims(&claims),
            Err(TokenError::InvalidClaim { .. })
        ));
        claims.insert(PERMISSIONS, json!(["read"]));
        assert!(permissions_from_claims(&claims).is_err());
        assert!(
            permissions_from_claims(&ClaimSet::new())
                .expect("absent")
                .is_empty()
        );
    }
}
