//! Traversal policy carried by every request.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a missing document may come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Origin, with the store consulted first
    #[default]
    OriginStorage,
    /// Store first, falling back to origin when absent
    StorageOriginIfMissing,
    /// Store only; absent documents are unreachable
    StorageOnly,
}

/// When an existing document is processed again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Freshness {
    Always,
    Never,
    /// Stored schema version is absent or older than the processor's
    #[default]
    Version,
    /// Last processing is absent or older than `hours`
    Expired { hours: i64 },
}

/// Whether successors are queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transitivity {
    #[default]
    Deep,
    Shallow,
}

/// Eligibility and traversal decisions for a request and its successors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Policy {
    #[serde(default)]
    pub fetch: FetchMode,
    #[serde(default)]
    pub freshness: Freshness,
    #[serde(default)]
    pub transitivity: Transitivity,
}

impl Policy {
    /// Reprocess everything, fetching from origin when the store has nothing.
    pub fn always() -> Self {
        Self {
            freshness: Freshness::Always,
            ..Self::default()
        }
    }

    /// Reprocess only what is already stored.
    pub fn reprocess() -> Self {
        Self {
            fetch: FetchMode::StorageOnly,
            freshness: Freshness::Always,
            transitivity: Transitivity::Deep,
        }
    }

    pub fn should_fetch_missing(&self) -> bool {
        self.fetch != FetchMode::StorageOnly
    }

    /// Decide whether `document` is stale for a processor at `schema_version`.
    pub fn should_process(&self, document: Option<&Value>, schema_version: u64) -> bool {
        let Some(document) = document else {
            return true;
        };
        let metadata = document.get("_metadata");
        match self.freshness {
            Freshness::Always => true,
            Freshness::Never => false,
            Freshness::Version => metadata
                .and_then(|m| m.get("version"))
                .and_then(Value::as_u64)
                .is_none_or(|version| version < schema_version),
            Freshness::Expired { hours } => has_expired(
                metadata
                    .and_then(|m| m.get("processedAt"))
                    .and_then(Value::as_str),
                hours,
            ),
        }
    }

    pub fn should_traverse(&self) -> bool {
        self.transitivity == Transitivity::Deep
    }

    /// Policy for requests queued while processing under this one.
    pub fn successor(&self) -> Option<Policy> {
        match self.transitivity {
            Transitivity::Deep => Some(*self),
            Transitivity::Shallow => None,
        }
    }
}

/// True when `timestamp` is missing, unparsable, or more than `hours` old.
pub fn has_expired(timestamp: Option<&str>, hours: i64) -> bool {
    let Some(parsed) = timestamp.and_then(|t| DateTime::parse_from_rfc3339(t).ok()) else {
        return true;
    };
    parsed.with_timezone(&Utc) + Duration::hours(hours) <= Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_expired() {
        assert!(has_expired(None, 1));
        assert!(has_expired(Some(&Utc::now().to_rfc3339()), 0));

        let two_hours_ago = (Utc::now() - Duration::hours(2)).to_rfc3339();
        assert!(has_expired(Some(&two_hours_ago), 1));
        assert!(!has_expired(Some(&two_hours_ago), 3));

        let future = (Utc::now() + Duration::hours(2)).to_rfc3339();
        assert!(!has_expired(Some(&future), 1));
    }

    #[test]
    fn test_version_freshness() {
        let policy = Policy::default();
        let v1 = json!({ "_metadata": { "version": 1 } });
        assert!(policy.should_process(None, 1));
        assert!(!policy.should_process(Some(&v1), 1));
        assert!(policy.should_process(Some(&v1), 2));
        assert!(policy.should_process(Some(&json!({})), 1));
    }

    #[test]
    fn test_storage_only_is_not_fetched_when_missing() {
        assert!(Policy::default().should_fetch_missing());
        assert!(!Policy::reprocess().should_fetch_missing());
    }

    #[test]
    fn test_shallow_has_no_successor() {
        let shallow = Policy {
            transitivity: Transitivity::Shallow,
            ..Policy::default()
        };
        assert!(shallow.successor().is_none());
        assert_eq!(Policy::always().successor(), Some(Policy::always()));
    }
}
