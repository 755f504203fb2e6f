use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Root record for one ingested capture bundle
///
/// Decoded from the normalized telemetry payload. Store-managed fields
/// (timestamps of the row itself, media keys) are never read from the payload.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Source {
    /// Externally supplied identifier, unique
    pub id: String,
    pub device_id: String,
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub message: String,
    /// Highest risk probability reported by the device
    #[serde(default)]
    pub max_prob: f64,
    pub organization_id: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub incident_time: Option<DateTime<Utc>>,
    #[serde(skip_deserializing)]
    pub created_at: DateTime<Utc>,
    #[serde(skip_deserializing)]
    pub updated_at: DateTime<Utc>,
    /// Absolute path of the stored thumbnail, empty when none was uploaded
    #[serde(skip_deserializing)]
    pub thumbnail_key: String,
    /// Absolute path of the stored video
    #[serde(skip_deserializing)]
    pub video_key: String,
    #[serde(default)]
    #[sqlx(skip)]
    pub accelerometer: Vec<AccelerometerData>,
    #[serde(default)]
    #[sqlx(skip)]
    pub location: Vec<LocationData>,
    #[serde(default)]
    #[sqlx(skip)]
    pub risk: Vec<RiskData>,
    #[serde(default)]
    #[sqlx(skip)]
    pub events: Vec<Event>,
}

/// Three-axis accelerometer sample
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccelerometerData {
    #[serde(skip_deserializing)]
    pub id: i64,
    /// Owning source id, stored under the upstream `event_id` column name
    #[serde(skip_deserializing)]
    pub event_id: String,
    pub recording_time: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// GPS sample; every measurement may be unknown
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocationData {
    #[serde(skip_deserializing)]
    pub id: i64,
    #[serde(skip_deserializing)]
    pub source_id: String,
    pub recording_time: DateTime<Utc>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub speed_knots: Option<f64>,
    #[serde(default)]
    pub speed_mph: Option<f64>,
}

/// Risk probability sample
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RiskData {
    #[serde(skip_deserializing)]
    pub id: i64,
    /// Owning source id, stored under the upstream `event_id` column name
    #[serde(skip_deserializing)]
    pub event_id: String,
    pub recording_time: DateTime<Utc>,
    pub prob: f64,
}

/// Classification of an asserted interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTag {
    Danger,
    Safe,
}

#[derive(Debug, Error)]
#[error("tag must be one of: danger, safe (got {0:?})")]
pub struct InvalidTag(pub String);

impl EventTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTag::Danger => "danger",
            EventTag::Safe => "safe",
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventTag {
    type Err = InvalidTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "danger" => Ok(EventTag::Danger),
            "safe" => Ok(EventTag::Safe),
            other => Err(InvalidTag(other.to_string())),
        }
    }
}

impl TryFrom<String> for EventTag {
    type Error = InvalidTag;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Tagged interval `[start_time, end_time]` in seconds over a source's video
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    #[serde(skip_deserializing)]
    pub id: i64,
    #[serde(skip_deserializing)]
    pub source_id: String,
    pub start_time: f64,
    pub end_time: f64,
    #[sqlx(try_from = "String")]
    pub tag: EventTag,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(skip_deserializing)]
    pub created_at: DateTime<Utc>,
    #[serde(skip_deserializing)]
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Check the interval invariant
    pub fn validate_interval(start_time: f64, end_time: f64) -> crate::Result<()> {
        if !start_time.is_finite() || !end_time.is_finite() {
            return Err(crate::Error::Validation(
                "start_time and end_time must be finite numbers".to_string(),
            ));
        }
        if end_time < start_time {
            return Err(crate::Error::Validation(
                "EndTime must be after StartTime".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validated input for a new event row
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub source_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub tag: EventTag,
    pub comment: Option<String>,
}

/// Event as returned by the event endpoints, with epoch-second timestamps
#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    pub id: i64,
    pub source_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub tag: EventTag,
    pub comment: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Event> for EventResponse {
    fn from(e: Event) -> Self {
        Self {
            id: e.id,
            source_id: e.source_id,
            start_time: e.start_time,
            end_time: e.end_time,
            tag: e.tag,
            comment: e.comment,
            created_at: e.created_at.timestamp(),
            updated_at: e.updated_at.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_source_decode_ignores_store_managed_fields() {
        let payload = json!({
            "id": "src-1",
            "device_id": "dev-9",
            "event_id": "evt-3",
            "event_type": "harsh_braking",
            "organization_id": "org-1",
            "video_key": "/etc/passwd",
            "thumbnail_key": "/etc/shadow",
            "unknown_field": 42,
            "start_time": "2024-01-15T10:30:45Z",
            "location": [
                {"recording_time": "2024-01-15T10:30:46Z", "speed_kmh": 61.5, "source_id": "other"}
            ],
            "risk": [
                {"recording_time": "2024-01-15T10:30:47Z", "prob": 0.8, "id": 77}
            ]
        });

        let source: Source = serde_json::from_value(payload).unwrap();
        assert_eq!(source.id, "src-1");
        assert!(source.video_key.is_empty());
        assert!(source.thumbnail_key.is_empty());
        assert!(!source.hidden);
        assert_eq!(source.start_time, Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap()));
        assert_eq!(source.location[0].speed_kmh, Some(61.5));
        assert_eq!(source.location[0].altitude, None);
        assert!(source.location[0].source_id.is_empty());
        assert_eq!(source.risk[0].id, 0);
        assert!(source.accelerometer.is_empty());
    }

    #[test]
    fn test_source_decode_requires_identity_fields() {
        let payload = json!({"id": "src-1", "device_id": "dev-9"});
        assert!(serde_json::from_value::<Source>(payload).is_err());
    }

    #[test]
    fn test_event_tag_parsing() {
        assert_eq!("danger".parse::<EventTag>().unwrap(), EventTag::Danger);
        assert_eq!("safe".parse::<EventTag>().unwrap(), EventTag::Safe);
        assert!("Danger".parse::<EventTag>().is_err());
        assert!("".parse::<EventTag>().is_err());
    }

    #[test]
    fn test_interval_validation() {
        assert!(Event::validate_interval(1.0, 2.5).is_ok());
        assert!(Event::validate_interval(3.0, 3.0).is_ok());
        assert!(matches!(
            Event::validate_interval(5.0, 4.0),
            Err(crate::Error::Validation(_))
        ));
        assert!(Event::validate_interval(f64::NAN, 4.0).is_err());
    }

    #[test]
    fn test_event_response_uses_epoch_seconds() {
        let created = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let event = Event {
            id: 7,
            source_id: "src-1".to_string(),
            start_time: 1.5,
            end_time: 4.0,
            tag: EventTag::Danger,
            comment: None,
            created_at: created,
            updated_at: created,
        };

        let response = serde_json::to_value(EventResponse::from(event)).unwrap();
        assert_eq!(response["created_at"], json!(created.timestamp()));
        assert_eq!(response["tag"], json!("danger"));
    }
}
