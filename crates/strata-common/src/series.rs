//! Strata Series - Series Identity
//!
//! Canonicalization of a metric name plus a tag set into a stable series
//! key. Tags are held in a sorted map, so the key is a pure function of the
//! name and the tag content and never of insertion order.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TAG_LEN: usize = 256;

/// Characters reserved by the canonical `name:k=v,k=v` key encoding.
const RESERVED_NAME_CHARS: &[char] = &[':', ',', '=', '{', '}'];

// =============================================================================
// Tags
// =============================================================================

/// Key-value tags for series identification, sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parse the `key1=value1,key2=value2` text form.
    ///
    /// Keys and values are trimmed, empty segments are skipped and the last
    /// occurrence of a duplicate key wins.
    pub fn parse(input: &str) -> Result<Self> {
        let mut tags = Tags::new();

        for segment in input.split(',') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| StrataError::InvalidTags(format!("missing '=' in '{}'", segment)))?;

            tags.insert(key.trim(), value.trim());
        }

        tags.validate()?;
        Ok(tags)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Check that every key and value is well-formed.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(StrataError::InvalidTags("empty tag key".to_string()));
            }
            if value.is_empty() {
                return Err(StrataError::InvalidTags(format!("empty value for tag '{}'", key)));
            }
            if key.len() > MAX_TAG_LEN || value.len() > MAX_TAG_LEN {
                return Err(StrataError::InvalidTags(format!(
                    "tag '{}' exceeds {} bytes",
                    key, MAX_TAG_LEN
                )));
            }
            if key.chars().any(|c| c == '=' || c == ',' || c.is_whitespace() || c.is_control()) {
                return Err(StrataError::InvalidTags(format!("invalid tag key '{}'", key)));
            }
            if value.chars().any(|c| c == ',' || c.is_control()) {
                return Err(StrataError::InvalidTags(format!(
                    "invalid value for tag '{}': '{}'",
                    key, value
                )));
            }
        }
        Ok(())
    }

    /// Canonical `k=v,k=v` encoding in key order.
    pub fn series_key(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Check if this tag set contains every pair of the filter.
    pub fn matches(&self, filter: &Tags) -> bool {
        filter.0.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }
}

impl From<HashMap<String, String>> for Tags {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for Tags {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl FromStr for Tags {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Tags::parse(s)
    }
}

// =============================================================================
// Series Key
// =============================================================================

/// Canonical identity of a series: metric name plus sorted tag set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    name: String,
    tags: Tags,
}

impl SeriesKey {
    /// Validate the name and tags and build the key.
    pub fn new(name: impl Into<String>, tags: Tags) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        tags.validate()?;
        Ok(Self { name, tags })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Check whether this series belongs to `name` and carries every filter tag.
    pub fn matches(&self, name: &str, filter: &Tags) -> bool {
        self.name == name && self.tags.matches(filter)
    }

    /// Approximate heap footprint of the key.
    pub fn size_bytes(&self) -> usize {
        self.name.len() + self.tags.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>()
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.name, self.tags.series_key())
        }
    }
}

/// Check that a metric name is non-empty and free of reserved characters.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(StrataError::InvalidSeriesName("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StrataError::InvalidSeriesName(format!(
            "name exceeds {} bytes",
            MAX_NAME_LEN
        )));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || RESERVED_NAME_CHARS.contains(&c))
    {
        return Err(StrataError::InvalidSeriesName(format!("invalid character in '{}'", name)));
    }
    Ok(())
}

// =============================================================================
// Metric Kind
// =============================================================================

/// How consumers interpret a series' values. Storage and aggregation ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Point-in-time measurement (e.g., temperature).
    #[default]
    Gauge,
    /// Monotonically increasing counter (e.g., request count).
    Counter,
    /// Pre-summarized distribution value (e.g., p99 latency).
    HistogramSummary,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::HistogramSummary => "histogram_summary",
        }
    }
}

impl FromStr for MetricKind {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            "histogram" | "summary" | "histogram_summary" => Ok(Self::HistogramSummary),
            other => Err(StrataError::InvalidValue(format!("unknown metric kind '{}'", other))),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Values
// =============================================================================

/// Check that a measurement is a finite double.
pub fn validate_value(value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(StrataError::InvalidValue(format!("{} is not a finite number", value)))
    }
}

/// Parse a measurement from its text form.
pub fn parse_value(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    let value = trimmed
        .parse::<f64>()
        .map_err(|_| StrataError::InvalidValue(format!("'{}' is not a number", trimmed)))?;
    validate_value(value)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_insertion_order_is_irrelevant() {
        let mut a = Tags::new();
        a.insert("a", "1");
        a.insert("b", "2");

        let mut b = Tags::new();
        b.insert("b", "2");
        b.insert("a", "1");

        let ka = SeriesKey::new("x", a).expect("key should build");
        let kb = SeriesKey::new("x", b).expect("key should build");
        assert_eq!(ka, kb);
        assert_eq!(ka.to_string(), "x:a=1,b=2");
    }

    #[test]
    fn test_different_content_different_key() {
        let base = SeriesKey::new("x", Tags::new().with("a", "1")).expect("key should build");
        let other_value = SeriesKey::new("x", Tags::new().with("a", "2")).expect("key should build");
        let other_name = SeriesKey::new("y", Tags::new().with("a", "1")).expect("key should build");
        let extra_tag =
            SeriesKey::new("x", Tags::new().with("a", "1").with("b", "1")).expect("key should build");

        assert_ne!(base, other_value);
        assert_ne!(base, other_name);
        assert_ne!(base, extra_tag);
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(matches!(
            SeriesKey::new("", Tags::new()),
            Err(StrataError::InvalidSeriesName(_))
        ));
        assert!(SeriesKey::new("   ", Tags::new()).is_err());
        assert!(SeriesKey::new("cpu usage", Tags::new()).is_err());
        assert!(SeriesKey::new("cpu:usage", Tags::new()).is_err());
        assert!(SeriesKey::new("cpu.usage", Tags::new()).is_ok());
    }

    #[test]
    fn test_parse_tags() {
        let tags = Tags::parse(" host = a , region=us-east ").expect("tags should parse");
        assert_eq!(tags.get("host"), Some(&"a".to_string()));
        assert_eq!(tags.get("region"), Some(&"us-east".to_string()));

        let dup = Tags::parse("host=a,host=b").expect("tags should parse");
        assert_eq!(dup.len(), 1);
        assert_eq!(dup.get("host"), Some(&"b".to_string()));

        assert!(Tags::parse("").expect("empty input should parse").is_empty());
        assert!(Tags::parse("path=/a=b").is_ok());
    }

    #[test]
    fn test_parse_tags_malformed() {
        assert!(matches!(Tags::parse("host"), Err(StrataError::InvalidTags(_))));
        assert!(matches!(Tags::parse("=a"), Err(StrataError::InvalidTags(_))));
        assert!(matches!(Tags::parse("host="), Err(StrataError::InvalidTags(_))));
        assert!(Tags::parse("my host=a").is_err());
    }

    #[test]
    fn test_tags_matching() {
        let tags = Tags::new().with("method", "GET").with("path", "/a");

        assert!(tags.matches(&Tags::new()));
        assert!(tags.matches(&Tags::new().with("method", "GET")));
        assert!(!tags.matches(&Tags::new().with("path", "/b")));
        assert!(!tags.matches(&Tags::new().with("status", "200")));
    }

    #[test]
    fn test_values() {
        assert_eq!(parse_value(" 12.5 ").expect("value should parse"), 12.5);
        assert!(matches!(parse_value("abc"), Err(StrataError::InvalidValue(_))));
        assert!(parse_value("NaN").is_err());
        assert!(validate_value(f64::INFINITY).is_err());
    }

    #[test]
    fn test_metric_kind() {
        assert_eq!("Counter".parse::<MetricKind>().expect("kind should parse"), MetricKind::Counter);
        assert_eq!(
            "histogram".parse::<MetricKind>().expect("kind should parse"),
            MetricKind::HistogramSummary
        );
        assert!("meter".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_key_serde() {
        let key = SeriesKey::new("req", Tags::new().with("method", "GET")).expect("key should build");
        let json = serde_json::to_string(&key).expect("key should serialize");
        let restored: SeriesKey = serde_json::from_str(&json).expect("key should deserialize");
        assert_eq!(restored, key);
    }
}
