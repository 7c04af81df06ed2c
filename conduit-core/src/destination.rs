//! Destination descriptors.
//!
//! A destination is `scheme://authority/path`. Scheme and authority are kept
//! exactly as written: no case folding, no DNS or trailing-slash
//! normalization. Two destinations that differ lexically are different.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const SCHEME_SEPARATOR: &str = "://";

/// Where a backend handle connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    scheme: String,
    authority: String,
    path: String,
}

impl Destination {
    /// Build a destination from parts.
    ///
    /// Fails when `scheme` is empty, does not start with a letter, or
    /// contains characters outside `[A-Za-z0-9+.-]`. The authority may not
    /// contain `/`, and a non-empty path must start with `/`, so the
    /// displayed form always parses back to the same parts.
    pub fn new(
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let (scheme, authority, path) = (scheme.into(), authority.into(), path.into());
        validate_scheme(&scheme)?;
        if authority.contains('/') {
            return Err(invalid(&authority, "authority must not contain '/'"));
        }
        if !path.is_empty() && !path.starts_with('/') {
            return Err(invalid(&path, "path must start with '/'"));
        }
        Ok(Self {
            scheme,
            authority,
            path,
        })
    }

    /// Parse `scheme://authority[/path]`.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let (scheme, rest) = uri
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| invalid(uri, "expected scheme://authority"))?;
        let (authority, path) = split_authority(rest);
        Self::new(scheme, authority, path)
    }

    /// Parse `uri`, filling a missing scheme and authority from `default`.
    ///
    /// A URI without `://` is treated as a path on the default destination;
    /// a relative path is rooted at `/`. A URI with a scheme but an empty authority inherits the default
    /// authority only when the schemes match exactly.
    pub fn resolve(uri: &str, default: Option<&Destination>) -> Result<Self, ConfigError> {
        if uri.contains(SCHEME_SEPARATOR) {
            let parsed = Self::parse(uri)?;
            return Ok(match default {
                Some(d) if parsed.authority.is_empty() && d.scheme == parsed.scheme => Self {
                    authority: d.authority.clone(),
                    ..parsed
                },
                _ => parsed,
            });
        }

        let default = default.ok_or_else(|| ConfigError::MissingRequired {
            field: "default_destination".to_string(),
        })?;
        let path = if uri.is_empty() || uri.starts_with('/') {
            uri.to_string()
        } else {
            format!("/{}", uri)
        };
        Ok(Self {
            scheme: default.scheme.clone(),
            authority: default.authority.clone(),
            path,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `scheme://authority` without the path.
    pub fn root(&self) -> String {
        format!("{}{}{}", self.scheme, SCHEME_SEPARATOR, self.authority)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.scheme, SCHEME_SEPARATOR, self.authority, self.path
        )
    }
}

impl std::str::FromStr for Destination {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_authority(rest: &str) -> (&str, &str) {
    match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    }
}

pub(crate) fn validate_scheme(scheme: &str) -> Result<(), ConfigError> {
    let mut chars = scheme.chars();
    match chars.next() {
        None => Err(invalid(scheme, "scheme must not be empty")),
        Some(first) if !first.is_ascii_alphabetic() => {
            Err(invalid(scheme, "scheme must start with a letter"))
        }
        Some(_) => {
            if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
                Ok(())
            } else {
                Err(invalid(scheme, "scheme contains invalid characters"))
            }
        }
    }
}

fn invalid(value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: "destination".to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheme_and_authority() {
        let d = Destination::parse("cachedfile://a").unwrap();
        assert_eq!(d.scheme(), "cachedfile");
        assert_eq!(d.authority(), "a");
        assert_eq!(d.path(), "");
    }

    #[test]
    fn test_parse_with_path() {
        let d = Destination::parse("hdfs://nn:8020/user/foo").unwrap();
        assert_eq!(d.authority(), "nn:8020");
        assert_eq!(d.path(), "/user/foo");
        assert_eq!(d.root(), "hdfs://nn:8020");
        assert_eq!(d.to_string(), "hdfs://nn:8020/user/foo");
    }

    #[test]
    fn test_parse_empty_authority() {
        let d = Destination::parse("file:///tmp").unwrap();
        assert_eq!(d.authority(), "");
        assert_eq!(d.path(), "/tmp");
    }

    #[test]
    fn test_no_normalization() {
        let lower = Destination::parse("hdfs://host").unwrap();
        let upper = Destination::parse("HDFS://host").unwrap();
        let slash = Destination::parse("hdfs://host/").unwrap();
        assert_ne!(lower.scheme(), upper.scheme());
        assert_eq!(upper.scheme(), "HDFS");
        assert_eq!(lower.authority(), slash.authority());
        assert_ne!(lower, slash);
    }

    #[test]
    fn test_parse_rejects_empty_scheme() {
        let err = Destination::parse("://a").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref reason, .. } if reason.contains("empty")));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(Destination::parse("just-a-path").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_scheme_chars() {
        assert!(Destination::parse("1abc://a").is_err());
        assert!(Destination::parse("ab c://a").is_err());
        assert!(Destination::parse("s3a://bucket").is_ok());
        assert!(Destination::parse("web+hdfs://a").is_ok());
    }

    #[test]
    fn test_resolve_without_scheme_uses_default() {
        let default = Destination::parse("hdfs://nn:8020").unwrap();
        let d = Destination::resolve("/user/foo", Some(&default)).unwrap();
        assert_eq!(d.scheme(), "hdfs");
        assert_eq!(d.authority(), "nn:8020");
        assert_eq!(d.path(), "/user/foo");
    }

    #[test]
    fn test_resolve_roots_relative_path() {
        let default = Destination::parse("hdfs://nn:8020").unwrap();
        let d = Destination::resolve("user/foo", Some(&default)).unwrap();
        assert_eq!(d.path(), "/user/foo");
        assert_eq!(d.to_string(), "hdfs://nn:8020/user/foo");
        assert_eq!(Destination::parse(&d.to_string()).unwrap(), d);
    }

    #[test]
    fn test_new_rejects_parts_that_would_not_parse_back() {
        let err = Destination::new("hdfs", "nn", "x").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref reason, .. } if reason.contains("path")));
        let err = Destination::new("hdfs", "nn/x", "").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref reason, .. } if reason.contains("authority")));
        assert!(Destination::new("hdfs", "", "").is_ok());
        assert!(Destination::new("hdfs", "nn", "/x").is_ok());
    }

    #[test]
    fn test_resolve_without_scheme_or_default_fails() {
        let err = Destination::resolve("/user/foo", None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn test_resolve_empty_authority_same_scheme_inherits() {
        let default = Destination::parse("hdfs://nn:8020").unwrap();
        let d = Destination::resolve("hdfs:///tmp", Some(&default)).unwrap();
        assert_eq!(d.authority(), "nn:8020");

        let other = Destination::resolve("file:///tmp", Some(&default)).unwrap();
        assert_eq!(other.authority(), "");
    }

    #[test]
    fn test_from_str() {
        let d: Destination = "s3a://bucket/key".parse().unwrap();
        assert_eq!(d.scheme(), "s3a");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: parsing never panics, whatever the input.
        #[test]
        fn prop_parse_never_panics(input in ".{0,64}") {
            let _ = Destination::parse(&input);
        }

        /// Property: a displayed destination parses back to the same value.
        #[test]
        fn prop_display_parses_back(
            scheme in "[a-z][a-z0-9+.-]{0,8}",
            authority in "[a-zA-Z0-9.:-]{0,16}",
            path in "(/[a-z0-9]{1,6}){0,3}",
        ) {
            let d = Destination::new(scheme, authority, path).unwrap();
            let reparsed = Destination::parse(&d.to_string()).unwrap();
            prop_assert_eq!(d, reparsed);
        }

        /// Property: parts accepted by `new` always display to a parseable URI.
        #[test]
        fn prop_accepted_parts_parse_back(
            authority in "[a-z/:]{0,8}",
            path in "[a-z/]{0,8}",
        ) {
            if let Ok(d) = Destination::new("hdfs", authority, path) {
                prop_assert_eq!(Destination::parse(&d.to_string()).unwrap(), d);
            }
        }
    }
}
