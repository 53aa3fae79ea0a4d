//! Naming policy: logical name validation and physical name derivation.

use crate::clock::Timestamp;
use crate::error::IndexError;
use serde::Serialize;

/// Maximum byte length of an index name accepted by the engine
pub const MAX_INDEX_NAME_BYTES: usize = 255;

/// Byte length of the `-{timestamp}` suffix appended to physical names
pub const PHYSICAL_SUFFIX_BYTES: usize = 25;

/// Maximum byte length of a logical name
pub const MAX_LOGICAL_NAME_BYTES: usize = MAX_INDEX_NAME_BYTES - PHYSICAL_SUFFIX_BYTES;

const FORBIDDEN_CHARS: &[char] = &['#', '\\', '/', '*', '?', '"', '<', '>', '|'];
const FORBIDDEN_LEADING: &[char] = &['_', '-', '+'];

/// Stable, externally addressed name of an index (the alias)
///
/// Always trimmed and lowercase. Construct with [`LogicalName::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LogicalName(String);

impl LogicalName {
    pub fn parse(raw: &str) -> Result<Self, IndexError> {
        let name = raw.trim().to_lowercase();

        if name.is_empty() {
            return Err(IndexError::validation("index name must not be empty"));
        }
        if name == "." || name == ".." {
            return Err(IndexError::validation(format!(
                "index name must not be \"{}\"",
                name
            )));
        }
        if name.contains(FORBIDDEN_CHARS) {
            return Err(IndexError::validation(format!(
                "index name \"{}\" must not contain #, \\, /, *, ?, \", <, >, or |",
                name
            )));
        }
        if name.starts_with(FORBIDDEN_LEADING) {
            return Err(IndexError::validation(format!(
                "index name \"{}\" must not start with _, - or +",
                name
            )));
        }
        if name.len() > MAX_LOGICAL_NAME_BYTES {
            return Err(IndexError::validation(format!(
                "index name is {} bytes long, the limit is {}",
                name.len(),
                MAX_LOGICAL_NAME_BYTES
            )));
        }

        Ok(LogicalName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pattern matching every physical index derived from this name
    pub fn index_pattern(&self) -> String {
        format!("{}-*", self.0)
    }

    /// True when `index` was derived from this name
    pub fn owns(&self, index: &str) -> bool {
        index
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl std::fmt::Display for LogicalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for LogicalName {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogicalName::parse(s)
    }
}

/// `{name}-{YYYY-MM-DDTHH:MM:SS.mmmZ}`, lowercased
pub fn physical_name(name: &LogicalName, at: Timestamp) -> String {
    let suffix = at.to_utc().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    format!("{}-{}", name.0, suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_normalises() {
        let name = LogicalName::parse("  Orders ").unwrap();
        assert_eq!(name.as_str(), "orders");
        assert_eq!(name.index_pattern(), "orders-*");
    }

    #[test]
    fn test_parse_rejects_invalid_names() {
        let long = "a".repeat(MAX_LOGICAL_NAME_BYTES + 1);
        for raw in [
            "", "   ", ".", "..", "a#b", "a\\b", "a/b", "a*", "a?", "a\"b", "a<b", "a>b", "a|b",
            "_a", "-a", "+a", long.as_str(),
        ] {
            let err = LogicalName::parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{:?} should be rejected", raw);
        }
    }

    #[test]
    fn test_parse_limit_counts_bytes() {
        assert!(LogicalName::parse(&"a".repeat(MAX_LOGICAL_NAME_BYTES)).is_ok());
        // 2 bytes per char in UTF-8
        assert!(LogicalName::parse(&"é".repeat(MAX_LOGICAL_NAME_BYTES / 2 + 1)).is_err());
    }

    #[test]
    fn test_physical_name_format() {
        let name = LogicalName::parse("orders").unwrap();
        let index = physical_name(&name, Timestamp::from_millis(1_519_905_600_000));
        assert_eq!(index, "orders-2018-03-01t12:00:00.000z");
        assert_eq!(index.len(), name.as_str().len() + PHYSICAL_SUFFIX_BYTES);
        assert!(name.owns(&index));
    }

    #[test]
    fn test_physical_name_is_deterministic() {
        let name = LogicalName::parse("orders").unwrap();
        let ts = Timestamp::from_millis(1_519_905_600_123);
        assert_eq!(physical_name(&name, ts), physical_name(&name, ts));
        assert_ne!(
            physical_name(&name, ts),
            physical_name(&name, Timestamp::from_millis(1_519_905_600_124))
        );
    }

    #[test]
    fn test_owns_requires_separator() {
        let name = LogicalName::parse("orders").unwrap();
        assert!(!name.owns("orders"));
        assert!(!name.owns("ordersx-2018"));
        assert!(!name.owns("other-2018"));
    }
}
