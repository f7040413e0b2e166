use super::event::Level;
use super::timestamp::{from_epoch_millis, TimestampFormat};
use super::{ParseError, ParsedFields};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const TIME_KEYS: [&str; 3] = ["time", "timestamp", "ts"];
const MESSAGE_KEYS: [&str; 2] = ["message", "msg"];

/// Parse one JSON object per line, pino-compatible:
/// `{"level":30,"time":1700000000000,"message":"hello","pid":1}`
pub fn parse_json(line: &str) -> Result<ParsedFields, ParseError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(ParseError::NotAnObject);
    };

    let timestamp = take_first(&mut object, &TIME_KEYS, timestamp_from_value);
    let level = take_first(&mut object, &["level"], level_from_value);
    let message = take_first(&mut object, &MESSAGE_KEYS, |v| match v {
        Value::String(s) => Some(s.clone()),
        _ => None,
    })
    .unwrap_or_default();

    let attributes = object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect();

    Ok(ParsedFields {
        timestamp,
        level,
        message,
        attributes,
    })
}

/// Remove and convert the first key whose value converts; keys whose value
/// does not convert stay in the object as plain attributes.
fn take_first<T>(
    object: &mut Map<String, Value>,
    keys: &[&str],
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    for key in keys {
        if let Some(converted) = object.get(*key).and_then(&convert) {
            object.remove(*key);
            return Some(converted);
        }
    }
    None
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_epoch_millis),
        Value::String(s) => TimestampFormat::Iso8601
            .parse(s)
            .ok()
            .or_else(|| TimestampFormat::EpochMs.parse(s).ok()),
        _ => None,
    }
}

fn level_from_value(value: &Value) -> Option<Level> {
    match value {
        Value::Number(n) => n.as_u64().map(Level::from_number),
        Value::String(s) => Level::from_name(s),
        _ => None,
    }
}
