// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validated tags and tag collections.
//!
//! A [`Tag`] can only be obtained through [`Tag::new`], so every tag that
//! reaches serialization has already been checked for embedded spaces.

use crate::errors::TsdbError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, TsdbError> {
        let key = key.into();
        let value = value.into();
        if key.contains(' ') {
            return Err(TsdbError::Validation(
                "Tag key cannot contain space".to_string(),
            ));
        }
        if value.contains(' ') {
            return Err(TsdbError::Validation(
                "Tag value cannot contain space".to_string(),
            ));
        }
        Ok(Self { key, value })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Ordered collection of tags attached to a data point.
///
/// On the wire this is a `{key: value}` object, so a key that appears more
/// than once keeps only the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<Tag>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, tag: Tag) {
        self.0.push(tag);
    }

    /// Returns a copy of this collection with `tag` appended.
    #[must_use]
    pub fn with(&self, tag: Tag) -> Self {
        let mut tags = self.clone();
        tags.push(tag);
        tags
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flattens the collection into the map that is actually sent.
    pub fn to_map(&self) -> BTreeMap<&str, &str> {
        self.0
            .iter()
            .map(|tag| (tag.key.as_str(), tag.value.as_str()))
            .collect()
    }
}

impl From<Vec<Tag>> for Tags {
    fn from(tags: Vec<Tag>) -> Self {
        Self(tags)
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for Tags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let flattened = self.to_map();
        let mut map = serializer.serialize_map(Some(flattened.len()))?;
        for (key, value) in flattened {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Builds a tag collection from key/value pairs, stopping at the first
/// invalid pair.
pub fn make_tags<I, K, V>(pairs: I) -> Result<Tags, TsdbError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(key, value)| Tag::new(key, value))
        .collect::<Result<Vec<_>, _>>()
        .map(Tags)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_tag_rejects_space_in_key() {
        let err = Tag::new("bad key", "v").unwrap_err();
        assert!(matches!(err, TsdbError::Validation(_)));
        assert_eq!(err.to_string(), "Tag key cannot contain space");
    }

    #[test]
    fn test_tag_rejects_space_in_value() {
        let err = Tag::new("k", "bad value").unwrap_err();
        assert_eq!(err.to_string(), "Tag value cannot contain space");
    }

    #[test]
    fn test_make_tags_short_circuits() {
        let pairs = vec![("a", "1"), ("b c", "2"), ("d", "3")];
        assert!(make_tags(pairs).is_err());
    }

    #[test]
    fn test_make_tags_from_map() {
        let mut pairs = HashMap::new();
        pairs.insert("host".to_string(), "web-1".to_string());
        pairs.insert("app".to_string(), "billing".to_string());
        let tags = make_tags(pairs).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.to_map().get("host"), Some(&"web-1"));
    }

    #[test]
    fn test_tags_serialize_as_object_last_write_wins() {
        let tags: Tags = vec![
            Tag::new("host", "a").unwrap(),
            Tag::new("env", "prod").unwrap(),
            Tag::new("host", "b").unwrap(),
        ]
        .into();
        let json = serde_json::to_value(&tags).unwrap();
        assert_eq!(json, serde_json::json!({"host": "b", "env": "prod"}));
    }

    #[test]
    fn test_with_does_not_mutate_original() {
        let base: Tags = vec![Tag::new("app", "x").unwrap()].into();
        let extended = base.with(Tag::new("rk_1", "east").unwrap());
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_tag_with_space_is_rejected(
            prefix in "[a-z]{0,8}",
            suffix in "[a-z]{0,8}",
            in_key in any::<bool>(),
        ) {
            let spaced = format!("{prefix} {suffix}");
            let result = if in_key {
                Tag::new(spaced, "v")
            } else {
                Tag::new("k", spaced)
            };
            prop_assert!(matches!(result, Err(TsdbError::Validation(_))));
        }

        #[test]
        fn prop_tag_without_space_round_trips(
            key in "[a-zA-Z0-9_.-]{1,16}",
            value in "[a-zA-Z0-9_./-]{0,16}",
        ) {
            let tag = Tag::new(key.clone(), value.clone()).unwrap();
            prop_assert_eq!(tag.to_string(), format!("{key}={value}"));
        }
    }
}
