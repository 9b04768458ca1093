use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

type Pair = (Arc<str>, Arc<str>);

/// Sample tags, kept sorted by key with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // SmallVec to avoid allocation for small tag sets (usually < 4)
    tags: SmallVec<[Pair; 4]>,
}

impl TagSet {
    /// Builds a tag set. When a key repeats, the last value wins.
    pub fn new<K, V>(iter: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Arc<str>>,
    {
        let mut tags: SmallVec<[Pair; 4]> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        tags.reverse();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        tags.dedup_by(|a, b| a.0 == b.0);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let slice: &[Pair] = &self.tags;
        let idx = slice.partition_point(|(k, _)| k.as_ref() < key);
        slice
            .get(idx)
            .and_then(|(k, v)| (k.as_ref() == key).then_some(v.as_ref()))
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    /// True when every pair of `filter` is present in `self`.
    pub fn matches(&self, filter: &TagSet) -> bool {
        filter.iter().all(|(k, v)| self.contains(k, v))
    }

    /// Returns a copy with `key` set to `value`.
    pub fn with(&self, key: impl Into<Arc<str>>, value: impl Into<Arc<str>>) -> TagSet {
        let key = key.into();
        let value = value.into();
        let mut tags = self.tags.clone();
        let idx = tags.partition_point(|(k, _)| *k < key);
        match tags.get_mut(idx) {
            Some(slot) if slot.0 == key => slot.1 = value,
            _ => tags.insert(idx, (key, value)),
        }
        TagSet { tags }
    }

    /// Returns the union of both sets; `other` wins on conflicting keys.
    pub fn merged(&self, other: &TagSet) -> TagSet {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        TagSet::new(self.tags.iter().chain(other.tags.iter()).cloned())
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

/// Splits a metric key such as `http_req_duration{method:GET}` into the
/// metric name and its tag filter.
pub fn parse_metric_key(key: &str) -> Result<(String, TagSet)> {
    let key = key.trim();
    let invalid = || Error::InvalidKey(key.to_string());

    let Some(open) = key.find('{') else {
        if key.is_empty() || key.contains('}') {
            return Err(invalid());
        }
        return Ok((key.to_string(), TagSet::default()));
    };

    let name = key[..open].trim();
    let rest = &key[open + 1..];
    let Some(inner) = rest.strip_suffix('}') else {
        return Err(invalid());
    };
    if name.is_empty() || inner.contains(['{', '}']) {
        return Err(invalid());
    }

    let mut pairs = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((k, v)) = part.split_once(':') else {
            return Err(invalid());
        };
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            return Err(invalid());
        }
        pairs.push((k.to_string(), v.to_string()));
    }
    if pairs.is_empty() {
        return Err(invalid());
    }

    Ok((name.to_string(), TagSet::new(pairs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagset_contains_and_get() {
        let set = TagSet::new([("method", "GET"), ("group", "api")]);
        assert!(set.contains("method", "GET"));
        assert!(!set.contains("method", "POST"));
        assert_eq!(set.get("group"), Some("api"));
        assert_eq!(set.get("status"), None);
        assert_eq!(set.to_string(), "{group:api,method:GET}");
    }

    #[test]
    fn later_duplicate_keys_win() {
        let set = TagSet::new([("a", "1"), ("b", "2"), ("a", "3")]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("a"), Some("3"));
    }

    #[test]
    fn matches_is_subset_check() {
        let sample = TagSet::new([("method", "GET"), ("status", "200")]);
        assert!(sample.matches(&TagSet::default()));
        assert!(sample.matches(&TagSet::new([("method", "GET")])));
        assert!(!sample.matches(&TagSet::new([("method", "POST")])));
        assert!(!sample.matches(&TagSet::new([("type", "GET")])));
    }

    #[test]
    fn with_and_merged_override() {
        let base = TagSet::new([("group", "a")]);
        let set = base.with("group", "b").with("name", "x");
        assert_eq!(set.get("group"), Some("b"));
        assert_eq!(set.get("name"), Some("x"));

        let merged = set.merged(&TagSet::new([("name", "y"), ("z", "1")]));
        assert_eq!(merged.to_string(), "{group:b,name:y,z:1}");
    }

    #[test]
    fn parses_metric_keys() {
        let (name, tags) = parse_metric_key("http_req_duration").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(name, "http_req_duration");
        assert!(tags.is_empty());

        let (name, tags) =
            parse_metric_key("http_req_duration{ type:GET, group: api }").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(name, "http_req_duration");
        assert_eq!(tags.get("type"), Some("GET"));
        assert_eq!(tags.get("group"), Some("api"));

        for bad in ["", "{a:b}", "m{a:b", "m{}", "m{ab}", "m}", "m{a:{b}}"] {
            assert!(parse_metric_key(bad).is_err(), "{bad} should be rejected");
        }
    }
}
