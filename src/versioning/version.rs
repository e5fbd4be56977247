//! Schema Versions and Versioned Keys
//!
//! Pure functions over `MAJOR.MINOR.PATCH` version strings and the
//! `base_key + ":v" + version` key suffix.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between a base key and its version.
pub const VERSION_SEPARATOR: &str = ":v";

/// A `MAJOR.MINOR.PATCH` schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SchemaVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a `MAJOR.MINOR.PATCH` string.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion(s.to_string());

        let mut parts = s.split('.');
        let mut next = || -> Result<u64> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }

    /// Same major version.
    pub fn is_compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<SchemaVersion> for String {
    fn from(v: SchemaVersion) -> Self {
        v.to_string()
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

/// Order two version strings numerically.
///
/// A string that does not parse sorts below any valid version; two invalid
/// strings fall back to lexical order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (SchemaVersion::parse(a), SchemaVersion::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// True iff both versions parse and share a major version.
pub fn compatible_versions(a: &str, b: &str) -> bool {
    match (SchemaVersion::parse(a), SchemaVersion::parse(b)) {
        (Ok(a), Ok(b)) => a.is_compatible_with(&b),
        _ => false,
    }
}

/// Append the version suffix to a base key.
pub fn versioned_key(base: &str, version: &SchemaVersion) -> String {
    format!("{}{}{}", base, VERSION_SEPARATOR, version)
}

/// Split a versioned key into its base key and version.
pub fn extract_version(key: &str) -> Result<(String, SchemaVersion)> {
    let idx = key
        .rfind(VERSION_SEPARATOR)
        .ok_or_else(|| Error::InvalidKey(key.to_string()))?;
    let (base, suffix) = key.split_at(idx);
    if base.is_empty() {
        return Err(Error::InvalidKey(key.to_string()));
    }
    let version = SchemaVersion::parse(&suffix[VERSION_SEPARATOR.len()..])
        .map_err(|_| Error::InvalidKey(key.to_string()))?;
    Ok((base.to_string(), version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse() {
        assert_eq!(SchemaVersion::parse("1.2.3").unwrap(), SchemaVersion::new(1, 2, 3));
        assert_eq!(SchemaVersion::parse("10.0.0").unwrap().major, 10);

        for bad in ["1.0", "1.0.0.0", "v1.0.0", "1.a.0", "", "1..0", "-1.0.0", "1.0.+1"] {
            assert_matches!(SchemaVersion::parse(bad), Err(Error::InvalidVersion(_)), "{}", bad);
        }
    }

    #[test]
    fn test_compare_is_numeric() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("0.9.9", "1.0.0"), Ordering::Less);
    }

    #[test]
    fn test_compare_invalid_sorts_lowest() {
        assert_eq!(compare_versions("garbage", "0.0.1"), Ordering::Less);
        assert_eq!(compare_versions("0.0.1", "garbage"), Ordering::Greater);
    }

    #[test]
    fn test_compatibility() {
        assert!(compatible_versions("1.0.0", "1.9.3"));
        assert!(!compatible_versions("1.0.0", "2.0.0"));
        assert!(!compatible_versions("1.0.0", "nope"));
    }

    #[test]
    fn test_versioned_key_and_extract() {
        let v = SchemaVersion::new(1, 0, 0);
        let key = versioned_key("esi:killmail:1001:abc", &v);
        assert_eq!(key, "esi:killmail:1001:abc:v1.0.0");
        assert_eq!(
            extract_version(&key).unwrap(),
            ("esi:killmail:1001:abc".to_string(), v)
        );
    }

    #[test]
    fn test_serializes_as_string() {
        let v = SchemaVersion::new(2, 1, 0);
        assert_eq!(serde_json::to_value(v).unwrap(), serde_json::json!("2.1.0"));
        let back: SchemaVersion = serde_json::from_value(serde_json::json!("2.1.0")).unwrap();
        assert_eq!(back, v);
        assert!(serde_json::from_value::<SchemaVersion>(serde_json::json!("2.1")).is_err());
    }

    #[test]
    fn test_extract_without_version_fails() {
        assert_matches!(extract_version("esi:character:1"), Err(Error::InvalidKey(_)));
        assert_matches!(extract_version("esi:character:1:vbeta"), Err(Error::InvalidKey(_)));
        assert_matches!(extract_version(":v1.0.0"), Err(Error::InvalidKey(_)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn version_strategy() -> impl Strategy<Value = SchemaVersion> {
        (0u64..1000, 0u64..1000, 0u64..1000).prop_map(|(a, b, c)| SchemaVersion::new(a, b, c))
    }

    proptest! {
        #[test]
        fn prop_display_parse_roundtrip(v in version_strategy()) {
            prop_assert_eq!(SchemaVersion::parse(&v.to_string()).unwrap(), v);
        }

        #[test]
        fn prop_extract_inverts_versioned_key(
            base in "[a-z]{1,8}(:[a-z0-9]{1,8}){1,3}",
            v in version_strategy(),
        ) {
            let key = versioned_key(&base, &v);
            let (got_base, got_v) = extract_version(&key).unwrap();
            prop_assert_eq!(got_base, base);
            prop_assert_eq!(got_v, v);
        }

        #[test]
        fn prop_compare_matches_tuple_order(a in version_strategy(), b in version_strategy()) {
            let expected = (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch));
            prop_assert_eq!(compare_versions(&a.to_string(), &b.to_string()), expected);
        }

        #[test]
        fn prop_compatible_iff_same_major(a in version_strategy(), b in version_strategy()) {
            prop_assert_eq!(
                compatible_versions(&a.to_string(), &b.to_string()),
                a.major == b.major
            );
        }
    }
}
