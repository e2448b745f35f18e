use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};

/// Calendar used when formatting the timestamp written into file metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneMode {
    #[default]
    Utc,
    Local,
}

/// Zero-padded UTC date components used for the destination layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParts {
    pub year: String,
    pub month: String,
    pub day: String,
}

fn to_utc(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
}

/// Year, month and day of a Unix timestamp, in UTC. `None` when out of chrono's range.
pub fn date_parts(timestamp: i64) -> Option<DateParts> {
    let t = to_utc(timestamp)?;
    Some(DateParts {
        year: format!("{:04}", t.year()),
        month: format!("{:02}", t.month()),
        day: format!("{:02}", t.day()),
    })
}

/// Exif-style `YYYY:MM:DD HH:MM:SS` string for a Unix timestamp.
pub fn exif_datetime(timestamp: i64, tz: TimeZoneMode) -> Option<String> {
    const FORMAT: &str = "%Y:%m:%d %H:%M:%S";
    let utc = to_utc(timestamp)?;
    Some(match tz {
        TimeZoneMode::Utc => utc.format(FORMAT).to_string(),
        TimeZoneMode::Local => utc.with_timezone(&Local).format(FORMAT).to_string(),
    })
}
