use chrono::{DateTime, Utc};
use serde::Deserialize;

use relay_api::{Event, RelayError};

use crate::SseFrame;

/// JSON body of one feed event, e.g.
/// `{"data":"23.5","ttl":60,"published_at":"2018-03-01T12:00:00.000Z","coreid":"3a00..."}`.
#[derive(Deserialize)]
struct FeedPayload {
    #[serde(default)]
    data: serde_json::Value,
    published_at: DateTime<Utc>,
    #[serde(default)]
    coreid: Option<String>,
    #[serde(default)]
    ttl: Option<serde_json::Value>,
    /// Some feeds repeat the event name inside the payload.
    #[serde(default)]
    name: Option<String>,
}

/// Build an [`Event`] from one SSE frame.
///
/// The topic is the SSE event name, else the payload's `name`, else
/// `"message"`. Any decoding problem is a [`RelayError::StreamDecode`]
/// scoped to this frame.
pub fn decode_event(frame: &SseFrame) -> Result<Event, RelayError> {
    let payload: FeedPayload = serde_json::from_str(&frame.data)
        .map_err(|e| RelayError::StreamDecode(format!("payload: {e}")))?;

    let topic = frame
        .event
        .clone()
        .filter(|e| !e.is_empty())
        .or(payload.name)
        .unwrap_or_else(|| "message".to_string());

    let mut event = Event::new(
        topic,
        payload.coreid.unwrap_or_default(),
        payload.data,
        payload.published_at,
    );
    event.ttl = payload.ttl.as_ref().and_then(ttl_seconds);
    Ok(event)
}

// Older feeds send ttl as a string.
fn ttl_seconds(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(event: Option<&str>, data: &str) -> SseFrame {
        SseFrame {
            event: event.map(str::to_string),
            data: data.to_string(),
            id: None,
        }
    }

    #[test]
    fn decodes_particle_payload() {
        let f = frame(
            Some("power"),
            r#"{"data":"23.5","ttl":"60","published_at":"2018-03-01T12:00:00.000Z","coreid":"3a00"}"#,
        );
        let event = decode_event(&f).unwrap();
        assert_eq!(event.topic, "power");
        assert_eq!(event.source, "3a00");
        assert_eq!(event.payload, serde_json::json!("23.5"));
        assert_eq!(event.ttl, Some(60));
        assert_eq!(
            event.published_at,
            Utc.with_ymd_and_hms(2018, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn topic_falls_back_to_payload_name_then_default() {
        let named = frame(None, r#"{"name":"temp","published_at":"2018-03-01T12:00:00Z"}"#);
        assert_eq!(decode_event(&named).unwrap().topic, "temp");

        let bare = frame(None, r#"{"published_at":"2018-03-01T12:00:00Z"}"#);
        let event = decode_event(&bare).unwrap();
        assert_eq!(event.topic, "message");
        assert_eq!(event.payload, serde_json::Value::Null);
    }

    #[test]
    fn invalid_payloads_are_decode_errors() {
        for data in ["{not json", r#"{"data":"x"}"#, r#"{"published_at":"yesterday"}"#] {
            let err = decode_event(&frame(Some("x"), data)).unwrap_err();
            assert!(matches!(err, RelayError::StreamDecode(_)), "{data}");
        }
    }
}
