//! Typed record codec.
//!
//! Records are stored as JSON with camelCase field names and timestamps as ISO-8601
//! strings carrying exactly millisecond precision. Decoding never panics: malformed
//! input comes back as a [`DecodeError`] the repository layer can recover from.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

/// Serialize a record to its stored JSON form
pub fn encode<T: Serialize>(record: &T) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Parse a stored JSON value, tagging failures with `key`
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> std::result::Result<T, DecodeError> {
    serde_json::from_str(raw).map_err(|e| DecodeError {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Drop sub-millisecond precision, matching what survives a round trip
#[must_use]
pub fn truncate_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(3)
}

/// Current time at stored precision
#[must_use]
pub fn now() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

/// Format a timestamp the way it is persisted
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Timestamps written by older app builds: ISO strings with or without an offset,
/// or raw epoch milliseconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
}

impl RawTimestamp {
    fn into_datetime(self) -> std::result::Result<DateTime<Utc>, String> {
        let parsed = match self {
            Self::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                        .map(|naive| naive.and_utc())
                })
                .map_err(|e| format!("invalid timestamp `{text}`: {e}"))?,
            Self::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| format!("epoch milliseconds out of range: {ms}"))?,
        };
        Ok(truncate_millis(parsed))
    }
}

/// Serde adapter for `DateTime<Utc>` fields.
pub mod iso_millis {
    use super::{format_timestamp, RawTimestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Write as an ISO-8601 string with milliseconds
    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(dt))
    }

    /// Read an ISO-8601 string or epoch milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        RawTimestamp::deserialize(deserializer)?
            .into_datetime()
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
pub mod iso_millis_option {
    use super::{format_timestamp, RawTimestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Write as an ISO-8601 string with milliseconds, or null
    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_some(&format_timestamp(dt)),
            None => serializer.serialize_none(),
        }
    }

    /// Read an optional ISO-8601 string or epoch milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<RawTimestamp>::deserialize(deserializer)?
            .map(RawTimestamp::into_datetime)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Stamped {
        #[serde(with = "iso_millis")]
        created_at: DateTime<Utc>,
        #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
        taken_at: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_timestamps_are_iso_millis() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let raw = encode(&Stamped { created_at: at, taken_at: None }).unwrap();
        assert_eq!(raw, r#"{"createdAt":"2024-03-01T08:30:00.000Z"}"#);
    }

    #[test]
    fn test_legacy_epoch_millis_accepted() {
        let decoded: Stamped = decode("t", r#"{"createdAt":1709281800000,"takenAt":null}"#).unwrap();
        assert_eq!(decoded.created_at, Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap());
        assert_eq!(decoded.taken_at, None);
    }

    #[test]
    fn test_offsetless_iso_accepted() {
        let decoded: Stamped = decode("t", r#"{"createdAt":"2024-03-01T08:30:00.123456"}"#).unwrap();
        assert_eq!(decoded.created_at.timestamp_subsec_millis(), 123);
        assert_eq!(decoded.created_at.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_malformed_input_is_tagged() {
        let err = decode::<Stamped>("health_data", "not json").unwrap_err();
        assert_eq!(err.key, "health_data");
        assert!(!err.message.is_empty());

        let err = decode::<Stamped>("health_data", r#"{"createdAt":"yesterday"}"#).unwrap_err();
        assert!(err.message.contains("yesterday"));
    }
}
