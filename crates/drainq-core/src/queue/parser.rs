//! Payload parsers and the malformed-record policy.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Turns the raw JSON of a dequeued record into `T`.
///
/// An `Err` is reported as `DrainqError::MalformedPayload`.
pub trait PayloadParser<T>: Send + Sync {
    fn parse(&self, raw: Value) -> Result<T, String>;
}

/// Structural parse through serde. This is the default parser: with
/// `T = Params` it accepts exactly a flat object of string values.
pub struct JsonParser<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonParser<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> PayloadParser<T> for JsonParser<T> {
    fn parse(&self, raw: Value) -> Result<T, String> {
        serde_json::from_value(raw).map_err(|e| e.to_string())
    }
}

impl<T, F> PayloadParser<T> for F
where
    F: Fn(Value) -> Result<T, String> + Send + Sync,
{
    fn parse(&self, raw: Value) -> Result<T, String> {
        self(raw)
    }
}

/// What happens to a head record that cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MalformedPolicy {
    /// Remove the record, then report the error. The record is lost.
    #[default]
    Discard,
    /// Leave the record at the head and report the error. Every later
    /// dequeue fails on it until someone removes it.
    Retain,
}

impl MalformedPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discard => "discard",
            Self::Retain => "retain",
        }
    }
}

impl fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MalformedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "retain" => Ok(Self::Retain),
            other => Err(format!("unknown malformed policy `{other}` (expected discard|retain)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Params;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn json_parser_accepts_flat_string_map() {
        let parsed = JsonParser::<Params>::new().parse(json!({"a": "1", "b": "2"})).unwrap();
        assert_eq!(parsed.get("b").map(String::as_str), Some("2"));
    }

    #[rstest]
    #[case::number_value(json!({"a": 1}))]
    #[case::nested(json!({"a": {"b": "c"}}))]
    #[case::array(json!(["a"]))]
    fn json_parser_rejects_non_string_maps(#[case] raw: Value) {
        let parser = JsonParser::<Params>::new();
        assert!(parser.parse(raw).is_err());
    }

    #[test]
    fn closures_are_parsers() {
        let parser = |raw: Value| -> Result<u64, String> {
            raw.get("n").and_then(Value::as_u64).ok_or_else(|| "missing n".to_string())
        };
        assert_eq!(parser.parse(json!({"n": 7})).unwrap(), 7);
        assert_eq!(parser.parse(json!({})).unwrap_err(), "missing n");
    }

    #[rstest]
    #[case("discard", MalformedPolicy::Discard)]
    #[case("Retain", MalformedPolicy::Retain)]
    fn policy_parses(#[case] raw: &str, #[case] expected: MalformedPolicy) {
        assert_eq!(raw.parse::<MalformedPolicy>().unwrap(), expected);
    }
}
