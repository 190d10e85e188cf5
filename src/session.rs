use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_SESSION_ID_LEN: usize = 8;
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Reject anything that is not 8-64 characters of `[A-Za-z0-9_-]`.
/// Ids become path components, so this is also the traversal guard.
pub fn validate_session_id(session_id: &str) -> Result<(), Error> {
    let len = session_id.len();
    let valid_chars = session_id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if (MIN_SESSION_ID_LEN..=MAX_SESSION_ID_LEN).contains(&len) && valid_chars {
        Ok(())
    } else {
        Err(Error::InvalidSessionId(session_id.to_string()))
    }
}

/// The three parallel trees every session may own a directory in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Uploads,
    Processing,
    Downloads,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Uploads, Category::Processing, Category::Downloads];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Uploads => "uploads",
            Category::Processing => "processing",
            Category::Downloads => "downloads",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploads" => Ok(Category::Uploads),
            "processing" => Ok(Category::Processing),
            "downloads" => Ok(Category::Downloads),
            other => Err(Error::InvalidCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Registered and touched within the cleanup delay.
    Active,
    /// Registered, but the cleanup delay has elapsed since the last touch.
    Idle,
    /// Present on disk with no registry entry in this process.
    Abandoned,
    /// Directories removed. Terminal.
    Cleaned,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Abandoned => "abandoned",
            SessionStatus::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

/// Status of a registered session as of `now`.
pub fn registered_status(
    last_accessed: DateTime<Utc>,
    now: DateTime<Utc>,
    cleanup_delay_hours: f64,
) -> SessionStatus {
    if hours_between(last_accessed, now) < cleanup_delay_hours {
        SessionStatus::Active
    } else {
        SessionStatus::Idle
    }
}

/// Fractional hours from `earlier` to `later`, clamped at zero.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = (later - earlier).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

/// A session as seen by discovery: metadata merged from the registry (when
/// present) with usage measured on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub operation_count: u64,
    pub status: SessionStatus,
    /// Categories that currently have a directory on disk.
    pub categories: Vec<Category>,
    pub size_bytes: u64,
    pub file_count: u64,
}

impl Session {
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        hours_between(self.created_at, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validate_session_id_accepts_charset() {
        assert!(validate_session_id("abcd1234").is_ok());
        assert!(validate_session_id("job_2024-01-01_x").is_ok());
        assert!(validate_session_id(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_session_id_rejects_bad_input() {
        for id in ["short", "", "../../etc/passwd", "abc def ghi", "abcdefgh/ij", "sessión-01"] {
            assert!(
                matches!(validate_session_id(id), Err(Error::InvalidSessionId(_))),
                "{} should be rejected",
                id
            );
        }
        assert!(validate_session_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("uploads".parse::<Category>().unwrap(), Category::Uploads);
        assert_eq!("downloads".parse::<Category>().unwrap(), Category::Downloads);
        assert!(matches!(
            "Uploads".parse::<Category>(),
            Err(Error::InvalidCategory(_))
        ));
        assert!("tmp".parse::<Category>().is_err());
    }

    #[test]
    fn test_registered_status_by_last_access() {
        let now = Utc::now();
        assert_eq!(
            registered_status(now - Duration::hours(1), now, 8.0),
            SessionStatus::Active
        );
        assert_eq!(
            registered_status(now - Duration::hours(8), now, 8.0),
            SessionStatus::Idle
        );
    }

    #[test]
    fn test_hours_between_clamps_negative() {
        let now = Utc::now();
        assert_eq!(hours_between(now, now - Duration::hours(2)), 0.0);
        assert!((hours_between(now - Duration::minutes(90), now) - 1.5).abs() < 1e-9);
    }
}
