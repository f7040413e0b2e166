pub mod event;
pub mod json;
pub mod text;
pub mod timestamp;

use crate::config::types::{RecordFormat, SourceConfig};
use crate::source::RawRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

pub use event::{Level, LogEvent, SourcePosition};
use text::TextParser;
use timestamp::{TimestampError, TimestampExtractor};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("JSON payload is not an object")]
    NotAnObject,

    #[error("timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("timestamp config: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("level pattern: {0}")]
    LevelPattern(#[from] regex::Error),
}

/// Fields recovered from a payload, before sequencing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFields {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: Option<Level>,
    pub message: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug)]
enum RecordParser {
    Json,
    Text(TextParser),
}

/// Turns raw records from one source into sequenced events.
///
/// Owns the source's sequence counter, so there must be exactly one
/// normalizer per source. Malformed records become error-level events
/// carrying the raw payload; nothing is dropped.
#[derive(Debug)]
pub struct Normalizer {
    source_id: String,
    parser: RecordParser,
    static_attributes: BTreeMap<String, String>,
    next_sequence: u64,
}

impl Normalizer {
    pub fn new(
        source_id: String,
        config: &SourceConfig,
        next_sequence: u64,
    ) -> Result<Self, SetupError> {
        let parser = match config.format {
            RecordFormat::Json => RecordParser::Json,
            RecordFormat::Text => {
                let timestamp = config
                    .timestamp
                    .as_ref()
                    .map(|ts| TimestampExtractor::new(&ts.pattern, &ts.format))
                    .transpose()?;
                let level = config
                    .level_pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()?;
                RecordParser::Text(TextParser::new(timestamp, level))
            }
        };

        Ok(Self {
            source_id,
            parser,
            static_attributes: config.attributes.clone(),
            next_sequence,
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Sequence number the next event will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Parse a record into an event with the given sequence number.
    pub fn parse(&self, record: &RawRecord, sequence_no: u64) -> Result<LogEvent, ParseError> {
        let line = std::str::from_utf8(&record.payload).map_err(|_| ParseError::InvalidUtf8)?;

        let fields = match &self.parser {
            RecordParser::Json => json::parse_json(line)?,
            RecordParser::Text(parser) => parser.parse(line)?,
        };

        let mut attributes = self.static_attributes.clone();
        attributes.extend(fields.attributes);

        Ok(LogEvent {
            source_id: record.source_id.clone(),
            sequence_no,
            timestamp: fields.timestamp.unwrap_or(record.ingest_time),
            level: fields.level.unwrap_or(Level::Info),
            message: fields.message,
            attributes,
            position: position_of(record),
        })
    }

    /// Parse and sequence a record. Always yields an event.
    pub fn normalize(&mut self, record: RawRecord) -> LogEvent {
        let sequence_no = self.next_sequence;
        self.next_sequence += 1;

        match self.parse(&record, sequence_no) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(
                    source_id = %record.source_id,
                    offset = record.byte_offset,
                    error = %e,
                    "Wrapping unparseable record"
                );
                self.wrap_error(record, sequence_no, e)
            }
        }
    }

    fn wrap_error(&self, record: RawRecord, sequence_no: u64, error: ParseError) -> LogEvent {
        let mut attributes = self.static_attributes.clone();
        attributes.insert(
            "raw".to_string(),
            String::from_utf8_lossy(&record.payload).into_owned(),
        );
        attributes.insert("parse_error".to_string(), error.to_string());

        LogEvent {
            position: position_of(&record),
            source_id: record.source_id,
            sequence_no,
            timestamp: record.ingest_time,
            level: Level::Error,
            message: format!("unparseable record: {}", error),
            attributes,
        }
    }
}

fn position_of(record: &RawRecord) -> SourcePosition {
    SourcePosition {
        offset: record.byte_offset,
        next_offset: record.next_offset,
        inode: record.inode,
    }
}
