use std::{fmt, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_RULE_TEXT_LEN: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("{kind}: empty value")]
    Empty { kind: &'static str },
    #[error("{kind}: length {len} exceeds {max}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{kind}: bad character {ch:?} at index {idx}")]
    BadChar {
        kind: &'static str,
        ch: char,
        idx: usize,
    },
}

pub(crate) fn validate_id(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if s.len() > MAX_ID_LEN {
        return Err(IdError::TooLong {
            kind,
            len: s.len(),
            max: MAX_ID_LEN,
        });
    }
    match s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_graphic() || *c == '/')
    {
        Some((idx, ch)) => Err(IdError::BadChar { kind, ch, idx }),
        None => Ok(()),
    }
}

macro_rules! string_id {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(std::sync::Arc<str>);

        impl $name {
            pub fn new(s: &str) -> Result<Self, $crate::filter::id::IdError> {
                $crate::filter::id::validate_id($kind, s)?;
                Ok(Self(std::sync::Arc::from(s)))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::filter::id::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use string_id;

string_id!(FilterId, "filter id");
string_id!(BlockedServiceId, "blocked service id");
string_id!(CategoryId, "category id");

impl FilterId {
    pub const CUSTOM: &'static str = "custom";
    pub const BLOCKED_SERVICE: &'static str = "blocked_service";
    pub const ADULT_BLOCKING: &'static str = "adult_blocking";
    pub const SAFE_BROWSING: &'static str = "safe_browsing";
    pub const NEWLY_REGISTERED: &'static str = "newly_registered_domains";
    pub const GENERAL_SAFE_SEARCH: &'static str = "general_safe_search";
    pub const YOUTUBE_SAFE_SEARCH: &'static str = "youtube_safe_search";

    pub fn reserved(id: &'static str) -> Self {
        Self(Arc::from(id))
    }

    pub fn is_reserved(&self) -> bool {
        [
            Self::CUSTOM,
            Self::BLOCKED_SERVICE,
            Self::ADULT_BLOCKING,
            Self::SAFE_BROWSING,
            Self::NEWLY_REGISTERED,
            Self::GENERAL_SAFE_SEARCH,
            Self::YOUTUBE_SAFE_SEARCH,
        ]
        .contains(&self.as_str())
    }
}

impl From<&CategoryId> for FilterId {
    fn from(id: &CategoryId) -> Self {
        Self(id.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RuleText(Arc<str>);

impl RuleText {
    pub fn new(s: &str) -> Result<Self, IdError> {
        let len = s.chars().count();
        if len > MAX_RULE_TEXT_LEN {
            return Err(IdError::TooLong {
                kind: "rule text",
                len,
                max: MAX_RULE_TEXT_LEN,
            });
        }
        Ok(Self(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RuleText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockedServiceId, FilterId, IdError, RuleText, MAX_ID_LEN};
    use pretty_assertions::assert_eq;

    #[test]
    fn should_accept_valid_ids() {
        assert_eq!(FilterId::new("adguard_dns_filter").unwrap().as_str(), "adguard_dns_filter");
        assert!(BlockedServiceId::new("youtube").is_ok());
        assert!(FilterId::new(&"a".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn should_reject_invalid_ids() {
        assert_eq!(
            FilterId::new(""),
            Err(IdError::Empty { kind: "filter id" })
        );
        assert!(matches!(
            FilterId::new(&"a".repeat(MAX_ID_LEN + 1)),
            Err(IdError::TooLong { .. })
        ));
        assert_eq!(
            FilterId::new("a/b"),
            Err(IdError::BadChar {
                kind: "filter id",
                ch: '/',
                idx: 1
            })
        );
        assert!(FilterId::new("with space").is_err());
        assert!(FilterId::new("юникод").is_err());
    }

    #[test]
    fn should_recognize_reserved_ids() {
        assert!(FilterId::reserved(FilterId::SAFE_BROWSING).is_reserved());
        assert!(!FilterId::new("my_list").unwrap().is_reserved());
    }

    #[test]
    fn should_bound_rule_text_by_runes() {
        assert!(RuleText::new(&"ы".repeat(1024)).is_ok());
        assert!(RuleText::new(&"a".repeat(1025)).is_err());
    }

    #[test]
    fn should_validate_on_deserialize() {
        let ids: Vec<FilterId> = serde_json::from_str(r#"["one", "two"]"#).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(serde_json::from_str::<FilterId>(r#""bad/id""#).is_err());
    }

    #[test]
    fn should_serialize_rule_text_as_string() {
        let rules = vec![RuleText::new("||ads.example^").unwrap()];

        let json = serde_json::to_string(&rules).unwrap();

        assert_eq!(json, r#"["||ads.example^"]"#);
        assert_eq!(serde_json::from_str::<Vec<RuleText>>(&json).unwrap(), rules);
    }
}
