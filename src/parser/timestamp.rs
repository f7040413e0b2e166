use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("regex compilation failed: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("pattern missing 'ts' capture group")]
    MissingTsGroup,

    #[error("failed to parse timestamp '{value}' as {format}: {reason}")]
    Unparseable {
        value: String,
        format: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    Iso8601,
    Epoch,
    EpochMs,
    Strptime(String),
}

impl TimestampFormat {
    pub fn from_name(name: &str) -> Self {
        match name {
            "iso8601" => Self::Iso8601,
            "epoch" => Self::Epoch,
            "epoch_ms" => Self::EpochMs,
            other => Self::Strptime(other.to_string()),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Iso8601 => "iso8601",
            Self::Epoch => "epoch",
            Self::EpochMs => "epoch_ms",
            Self::Strptime(fmt) => fmt,
        }
    }

    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>, TimestampError> {
        let unparseable = |reason: String| TimestampError::Unparseable {
            value: value.to_string(),
            format: self.name().to_string(),
            reason,
        };

        match self {
            Self::Iso8601 => DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| unparseable(e.to_string())),
            Self::Epoch => {
                let seconds: i64 = value.parse().map_err(|e: std::num::ParseIntError| {
                    unparseable(e.to_string())
                })?;
                Utc.timestamp_opt(seconds, 0)
                    .single()
                    .ok_or_else(|| unparseable("timestamp out of range".to_string()))
            }
            Self::EpochMs => {
                let millis: i64 = value.parse().map_err(|e: std::num::ParseIntError| {
                    unparseable(e.to_string())
                })?;
                from_epoch_millis(millis)
                    .ok_or_else(|| unparseable("timestamp out of range".to_string()))
            }
            Self::Strptime(fmt) => {
                if fmt.contains("%z") || fmt.contains("%Z") || fmt.contains("%:z") {
                    DateTime::parse_from_str(value, fmt)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| unparseable(e.to_string()))
                } else {
                    // Naive timestamps are taken as UTC
                    NaiveDateTime::parse_from_str(value, fmt)
                        .map(|ndt| Utc.from_utc_datetime(&ndt))
                        .map_err(|e| unparseable(e.to_string()))
                }
            }
        }
    }
}

pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Finds a timestamp in a text line via a regex with a named `ts` group.
#[derive(Debug)]
pub struct TimestampExtractor {
    pattern: Regex,
    format: TimestampFormat,
}

impl TimestampExtractor {
    pub fn new(pattern: &str, format: &str) -> Result<Self, TimestampError> {
        let regex = Regex::new(pattern)?;
        if regex.capture_names().all(|name| name != Some("ts")) {
            return Err(TimestampError::MissingTsGroup);
        }

        Ok(Self {
            pattern: regex,
            format: TimestampFormat::from_name(format),
        })
    }

    /// `Ok(None)` when the pattern does not match the line
    pub fn extract(&self, line: &str) -> Result<Option<DateTime<Utc>>, TimestampError> {
        let Some(ts) = self.pattern.captures(line).and_then(|c| c.name("ts")) else {
            return Ok(None);
        };
        self.format.parse(ts.as_str()).map(Some)
    }
}
