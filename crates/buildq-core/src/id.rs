//! Job identifiers.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix shared by every job identifier.
pub const JOB_PREFIX: &str = "build-";

/// Identity of a queued job.
///
/// Formatted as `build-<UTC creation time>-<uuid v7>`. The fixed-width time
/// component keeps lexicographic order equal to creation order and the uuid
/// suffix keeps two jobs created in the same microsecond distinct.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct JobId(String);

impl JobId {
    /// Generate a new identifier stamped with the current time.
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Generate a new identifier stamped with the given time.
    pub fn at(created: DateTime<Utc>) -> Self {
        Self(format!(
            "{}{}-{}",
            JOB_PREFIX,
            created.format("%Y%m%dT%H%M%S%.6fZ"),
            Uuid::now_v7().simple()
        ))
    }

    /// Wrap an existing identifier, returning `None` if it lacks the job prefix.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.starts_with(JOB_PREFIX)
            && s.len() > JOB_PREFIX.len()
            && !s.contains(['/', '\\'])
            && !s.ends_with(crate::queue::CLAIMED_SUFFIX);
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("not a job id: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ids_sort_by_creation_time() {
        let earlier = JobId::at(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        let later = JobId::at(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert!(earlier < later);
        assert!(earlier.as_str().starts_with("build-20240101T090000.000000Z-"));
    }

    #[test]
    fn test_same_instant_ids_are_distinct() {
        let now = Utc::now();
        assert_ne!(JobId::at(now), JobId::at(now));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(JobId::parse("build-20240101T090000.000000Z-abc").is_some());
        assert!(JobId::parse("lock").is_none());
        assert!(JobId::parse("build-").is_none());
        assert!(JobId::parse("build-x.lock").is_none());
        assert!(JobId::parse("build-../etc").is_none());
    }
}
