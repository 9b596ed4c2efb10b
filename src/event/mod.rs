//! First-blood events and their content-addressed identity.
//!
//! An event's ID is derived from what it says, not from any upstream row
//! key: SHA-256 over `subject|title|timestamp`. The same solve reported
//! twice hashes to the same ID, across restarts and across implementations.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Placeholder for fields the backend left out.
pub const UNKNOWN: &str = "<unknown>";

const ID_DELIMITER: &str = "|";

/// A single first-blood solve.
///
/// Field names on disk (`user`, `challenge`, `time`) match the history
/// files written by earlier versions of the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "user")]
    pub subject: String,
    #[serde(rename = "challenge")]
    pub title: String,
    pub category: String,
    #[serde(
        rename = "time",
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Build an event, deriving its ID from `raw_time` (the upstream
    /// timestamp string exactly as received). Returns `None` when the
    /// timestamp does not parse.
    pub fn new(subject: &str, title: &str, category: &str, raw_time: &str) -> Option<Self> {
        let occurred_at = parse_timestamp(raw_time)?;
        Some(Self {
            id: identity(subject, title, raw_time),
            subject: subject.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            occurred_at,
        })
    }

    /// Human-readable UTC timestamp, `YYYY-MM-DD HH:MM:SS`.
    pub fn display_time(&self) -> String {
        self.occurred_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Stable identifier for an event: lowercase hex SHA-256 of
/// `subject|title|timestamp`.
///
/// Callers pass the normalized subject and title, so a missing name hashes
/// as `<unknown>` (not `None`): history rows written by older versions for
/// such events get a new ID on upgrade.
pub fn identity(subject: &str, title: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(ID_DELIMITER.as_bytes());
    hasher.update(title.as_bytes());
    hasher.update(ID_DELIMITER.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lenient ISO-8601 parsing.
///
/// Accepts RFC 3339 (`Z` or numeric offset), a space in place of `T`,
/// offsets without minutes (`+00`, as Postgres prints them), optional
/// fractional seconds, and naive timestamps which are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%#z"];
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub(crate) fn serialize_timestamp<S: Serializer>(
    dt: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&dt.to_rfc3339())
}

pub(crate) fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

#[cfg(test)]
pub(crate) fn sample(subject: &str, title: &str, raw_time: &str) -> Event {
    Event::new(subject, title, "web", raw_time).expect("valid test timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_identity_is_deterministic() {
        let a = identity("alice", "pwn-1", "2024-10-01T12:00:00+00:00");
        let b = identity("alice", "pwn-1", "2024-10-01T12:00:00+00:00");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_identity_matches_plain_sha256() {
        assert_eq!(
            identity("a", "b", "c"),
            hex::encode(Sha256::digest(b"a|b|c"))
        );
        // sha256("") is the well-known e3b0c442... vector; "||" is not empty.
        assert_ne!(
            identity("", "", ""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_identity_distinguishes_fields() {
        // Same concatenated text, different field boundaries.
        let a = identity("ab", "c", "t");
        let b = identity("a", "bc", "t");
        assert_ne!(a, b);
        assert_ne!(identity("x", "y", "2024-01-01T00:00:00Z"), identity("x", "y", "2024-01-01T00:00:00+00:00"));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 10, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-10-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-10-01T12:30:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-10-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-10-01 12:30:00+00"), Some(expected));
        assert_eq!(parse_timestamp("2024-10-01T12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-10-01 12:30:00"), Some(expected));

        let with_frac = parse_timestamp("2024-10-01T12:30:00.123456+00:00").unwrap();
        assert_eq!(with_frac.timestamp(), expected.timestamp());
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("   "), None);
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("2024-13-45T99:00:00Z"), None);
    }

    #[test]
    fn test_event_serde_uses_legacy_field_names() {
        let ev = sample("alice", "pwn-1", "2024-10-01T12:00:00Z");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["user"], "alice");
        assert_eq!(json["challenge"], "pwn-1");
        assert_eq!(json["category"], "web");
        assert!(json["time"].as_str().unwrap().starts_with("2024-10-01T12:00:00"));

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn test_display_time() {
        let ev = sample("alice", "pwn-1", "2024-10-01T14:05:09+02:00");
        assert_eq!(ev.display_time(), "2024-10-01 12:05:09");
    }
}
