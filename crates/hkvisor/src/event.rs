//! Event records parsed from a camera's alert stream, and the logical events
//! handed to the dispatcher.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::CameraConfig;
use crate::xml;

/// Root element of every alert pushed by the camera.
const ALERT_ROOT: &str = "EventNotificationAlert";

/// Errors from turning a multipart body into a [`RawEventRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("payload is not UTF-8")]
    NotUtf8,
    #[error("missing <EventNotificationAlert> root element")]
    NotAnAlert,
    #[error("missing required element <{0}>")]
    MissingField(&'static str),
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Value of `<eventState>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventState {
    Active,
    Inactive,
    Other(String),
}

impl EventState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "active" => EventState::Active,
            "inactive" => EventState::Inactive,
            other => EventState::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventState::Active => f.write_str("active"),
            EventState::Inactive => f.write_str("inactive"),
            EventState::Other(s) => f.write_str(s),
        }
    }
}

/// One alert as pushed by the camera. Transient: folded into the
/// subscriber's state and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventRecord {
    pub ip_address: String,
    pub port: u16,
    pub channel_id: u32,
    /// Camera wall-clock time reinterpreted in the configured zone
    pub timestamp: Option<DateTime<Tz>>,
    /// `activePostCount`, the camera's sequence counter
    pub sequence: u64,
    pub event_type: String,
    pub state: EventState,
    pub description: String,
}

impl RawEventRecord {
    /// Parse one multipart body.
    ///
    /// `eventType` and `eventState` are required. An unreadable `dateTime`
    /// leaves `timestamp` unset rather than rejecting the record.
    pub fn parse(body: &[u8], tz: Tz) -> Result<Self, EventParseError> {
        let doc = std::str::from_utf8(body).map_err(|_| EventParseError::NotUtf8)?;
        if !xml::has_element(doc, ALERT_ROOT) {
            return Err(EventParseError::NotAnAlert);
        }

        let event_type = xml::element_text(doc, "eventType")
            .filter(|s| !s.is_empty())
            .ok_or(EventParseError::MissingField("eventType"))?;
        let state = xml::element_text(doc, "eventState")
            .map(|s| EventState::parse(&s))
            .ok_or(EventParseError::MissingField("eventState"))?;

        let timestamp = match xml::element_text(doc, "dateTime") {
            Some(raw) => match parse_camera_time(&raw, tz) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    log::debug!("Ignoring timestamp: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            ip_address: xml::element_text(doc, "ipAddress").unwrap_or_default(),
            port: number(doc, "portNo"),
            channel_id: number(doc, "channelID"),
            timestamp,
            sequence: number(doc, "activePostCount"),
            event_type,
            state,
            description: xml::element_text(doc, "eventDescription").unwrap_or_default(),
        })
    }
}

fn number<T: std::str::FromStr + Default>(doc: &str, tag: &str) -> T {
    xml::element_text(doc, tag)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

/// Length of a trailing zone designator (`Z`, `±HH:MM`, `±HHMM`), if any.
///
/// Works on bytes: a matched suffix is pure ASCII, so the returned length
/// always leaves a char boundary.
fn zone_suffix_len(raw: &str) -> usize {
    let bytes = raw.as_bytes();
    if bytes.ends_with(b"Z") || bytes.ends_with(b"z") {
        return 1;
    }
    // Only look past the time-of-day so date hyphens are never mistaken for a sign.
    let time_start = match bytes.iter().position(|b| *b == b'T' || *b == b' ') {
        Some(t) => t + 1,
        None => return 0,
    };
    for len in [6, 5] {
        if bytes.len() < time_start + len {
            continue;
        }
        let suffix = &bytes[bytes.len() - len..];
        if suffix[0] != b'+' && suffix[0] != b'-' {
            continue;
        }
        let digits_ok = match len {
            6 => {
                suffix[3] == b':'
                    && suffix[1..3].iter().all(u8::is_ascii_digit)
                    && suffix[4..].iter().all(u8::is_ascii_digit)
            }
            _ => suffix[1..].iter().all(u8::is_ascii_digit),
        };
        if digits_ok {
            return len;
        }
    }
    0
}

/// Interpret a camera timestamp as wall-clock time in `tz`.
///
/// Any offset the camera appends is discarded: cameras report a local time and
/// frequently get the offset wrong, so the literal date and time are read in
/// the configured zone instead.
pub fn parse_camera_time(raw: &str, tz: Tz) -> Result<DateTime<Tz>, EventParseError> {
    let trimmed = raw.trim();
    let local = &trimmed[..trimmed.len() - zone_suffix_len(trimmed)];
    let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| EventParseError::InvalidTimestamp(raw.to_string()))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| EventParseError::InvalidTimestamp(raw.to_string()))
}

/// An inactive to active transition, sent from a subscriber to the dispatcher.
#[derive(Debug, Clone)]
pub struct LogicalEvent {
    pub camera: Arc<CameraConfig>,
    pub event_type: String,
    pub detected_at: DateTime<Tz>,
}

impl LogicalEvent {
    /// Build from the record that triggered it, falling back to the current
    /// time when the camera sent no usable timestamp.
    pub fn from_record(camera: Arc<CameraConfig>, record: &RawEventRecord, tz: Tz) -> Self {
        Self {
            camera,
            event_type: record.event_type.clone(),
            detected_at: record
                .timestamp
                .unwrap_or_else(|| Utc::now().with_timezone(&tz)),
        }
    }

    pub fn camera_name(&self) -> &str {
        &self.camera.name
    }
}
