use super::event::Level;
use super::timestamp::TimestampExtractor;
use super::{ParseError, ParsedFields};
use regex::Regex;
use std::collections::BTreeMap;

/// Unstructured lines: the whole line is the message, with an optional
/// timestamp and level pulled out by regex.
#[derive(Debug)]
pub struct TextParser {
    timestamp: Option<TimestampExtractor>,
    level: Option<Regex>,
}

impl TextParser {
    pub fn new(timestamp: Option<TimestampExtractor>, level: Option<Regex>) -> Self {
        Self { timestamp, level }
    }

    pub fn parse(&self, line: &str) -> Result<ParsedFields, ParseError> {
        let timestamp = match &self.timestamp {
            Some(extractor) => extractor.extract(line)?,
            None => None,
        };

        let level = self
            .level
            .as_ref()
            .and_then(|re| re.captures(line))
            .and_then(|caps| caps.name("level"))
            .and_then(|m| Level::from_name(m.as_str()));

        Ok(ParsedFields {
            timestamp,
            level,
            message: line.to_string(),
            attributes: BTreeMap::new(),
        })
    }
}
