//! Decoding of matched radio-tag signals.
//!
//! A receiver station publishes each matched signal as a CBOR array
//! `[ts, frequency_hz, duration_s, avgs, ...]` on
//! `<station>/radiotracking/matched/cbor`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use ciborium::value::Value;

use crate::error::{Error, Result};

/// CBOR tag for an RFC 3339 date/time string.
const TAG_DATETIME_STRING: u64 = 0;

/// CBOR tag for an epoch-based date/time.
const TAG_DATETIME_EPOCH: u64 = 1;

/// A signal seen by one or more receivers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedSignal {
    /// Station that published the signal.
    pub station: String,
    /// When the signal was received.
    pub ts: DateTime<Utc>,
    /// Centre frequency.
    pub frequency_hz: f64,
    /// Signal length.
    pub duration_s: f64,
    /// Average power per receiver, in dBW.
    pub avgs: Vec<f64>,
}

impl MatchedSignal {
    /// Power of the first receiver, used for classification.
    #[must_use]
    pub fn power_dbw(&self) -> f64 {
        self.avgs.first().copied().unwrap_or(f64::NEG_INFINITY)
    }

    /// Decode a signal from its topic and CBOR payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is malformed or the payload does not
    /// hold a matched signal.
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self> {
        let station = station_of(topic)?.to_string();

        let value: Value = ciborium::de::from_reader(payload)
            .map_err(|e| Error::signal_decode(format!("invalid CBOR: {e}")))?;
        let Value::Array(items) = value else {
            return Err(Error::signal_decode("payload is not an array"));
        };
        if items.len() < 4 {
            return Err(Error::signal_decode(format!(
                "expected at least 4 fields, got {}",
                items.len()
            )));
        }

        let ts = timestamp(&items[0])?;
        let frequency_hz = number(&items[1]).ok_or_else(|| Error::signal_decode("frequency is not a number"))?;
        let duration_s = number(&items[2]).ok_or_else(|| Error::signal_decode("duration is not a number"))?;

        let avgs = match &items[3] {
            Value::Array(avgs) => avgs.iter().filter_map(number).collect(),
            // remaining fields are further per-receiver averages
            _ => items[3..].iter().filter_map(number).collect::<Vec<_>>(),
        };
        if avgs.is_empty() {
            return Err(Error::signal_decode("signal carries no power averages"));
        }

        Ok(Self {
            station,
            ts,
            frequency_hz,
            duration_s,
            avgs,
        })
    }
}

/// Extract the station from a `<station>/radiotracking/matched/cbor` topic.
///
/// # Errors
///
/// Returns an error if the topic does not have exactly four segments.
pub fn station_of(topic: &str) -> Result<&str> {
    let segments: Vec<&str> = topic.split('/').collect();
    match segments.as_slice() {
        [station, _, _, _] => Ok(station),
        _ => Err(Error::signal_decode(format!(
            "unexpected topic '{topic}', expected 4 segments"
        ))),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        #[allow(clippy::cast_precision_loss)]
        Value::Integer(i) => Some(i128::from(*i) as f64),
        Value::Tag(_, inner) => number(inner),
        _ => None,
    }
}

fn timestamp(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::Tag(TAG_DATETIME_STRING, inner) | Value::Tag(TAG_DATETIME_EPOCH, inner) => {
            timestamp(inner)
        }
        Value::Text(text) => parse_text_timestamp(text),
        other => {
            let secs = number(other).ok_or_else(|| Error::signal_decode("timestamp has unsupported type"))?;
            epoch(secs)
        }
    }
}

fn parse_text_timestamp(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    // naive timestamps are taken as UTC
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| Error::signal_decode(format!("invalid timestamp '{text}'")))
}

fn epoch(secs: f64) -> Result<DateTime<Utc>> {
    #[allow(clippy::cast_possible_truncation)]
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::signal_decode(format!("timestamp {secs} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "station1/radiotracking/matched/cbor";

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf).unwrap();
        buf
    }

    fn signal(ts: Value, avgs: Value) -> Vec<u8> {
        encode(&Value::Array(vec![
            ts,
            Value::Integer(150_077_000.into()),
            Value::Float(0.012),
            avgs,
        ]))
    }

    #[test]
    fn test_station_of() {
        assert_eq!(station_of(TOPIC).unwrap(), "station1");
        assert!(station_of("station1/radiotracking/matched").is_err());
        assert!(station_of("a/b/c/d/e").is_err());
    }

    #[test]
    fn test_decode_tagged_string_timestamp() {
        let payload = signal(
            Value::Tag(0, Box::new(Value::Text("2023-06-01T21:30:00.5+00:00".into()))),
            Value::Array(vec![Value::Float(-42.5), Value::Float(-60.0)]),
        );
        let sig = MatchedSignal::decode(TOPIC, &payload).unwrap();

        assert_eq!(sig.station, "station1");
        assert_eq!(sig.ts.to_rfc3339(), "2023-06-01T21:30:00.500+00:00");
        assert!((sig.frequency_hz - 150_077_000.0).abs() < f64::EPSILON);
        assert!((sig.duration_s - 0.012).abs() < f64::EPSILON);
        assert!((sig.power_dbw() + 42.5).abs() < f64::EPSILON);
        assert_eq!(sig.avgs.len(), 2);
    }

    #[test]
    fn test_decode_epoch_timestamp() {
        let payload = signal(
            Value::Tag(1, Box::new(Value::Float(1_685_655_000.25))),
            Value::Float(-55.0),
        );
        let sig = MatchedSignal::decode(TOPIC, &payload).unwrap();

        assert_eq!(sig.ts.timestamp(), 1_685_655_000);
        assert_eq!(sig.ts.timestamp_subsec_millis(), 250);
        assert_eq!(sig.avgs, vec![-55.0]);
    }

    #[test]
    fn test_decode_naive_text_timestamp() {
        let payload = signal(
            Value::Text("2023-06-01T21:30:00".into()),
            Value::Array(vec![Value::Integer((-48).into())]),
        );
        let sig = MatchedSignal::decode(TOPIC, &payload).unwrap();
        assert_eq!(sig.ts.to_rfc3339(), "2023-06-01T21:30:00+00:00");
        assert!((sig.power_dbw() + 48.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_tagged_duration() {
        let payload = encode(&Value::Array(vec![
            Value::Integer(1_685_655_000.into()),
            Value::Float(150_164_000.0),
            Value::Tag(1337, Box::new(Value::Float(0.02))),
            Value::Float(-50.0),
        ]));
        let sig = MatchedSignal::decode(TOPIC, &payload).unwrap();
        assert!((sig.duration_s - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        let payload = encode(&Value::Array(vec![Value::Integer(1.into())]));
        let err = MatchedSignal::decode(TOPIC, &payload).unwrap_err();
        assert!(err.to_string().contains("at least 4 fields"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(MatchedSignal::decode(TOPIC, b"\xff\x00garbage").is_err());
        let payload = encode(&Value::Text("hello".into()));
        assert!(MatchedSignal::decode(TOPIC, &payload).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_topic() {
        let payload = signal(Value::Integer(0.into()), Value::Float(-50.0));
        assert!(MatchedSignal::decode("station1/cbor", &payload).is_err());
    }
}
