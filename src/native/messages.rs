use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Both directions share the `{type, payload}` shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn web_blocklist(domains: &[String]) -> Self {
        Self::new("web_blocklist", Value::from(domains.to_vec()))
    }

    pub fn stopping() -> Self {
        Self::new("stopping", Value::Null)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogUrlPayload {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub visit_time: f64,
}

impl LogUrlPayload {
    /// Unix seconds of the visit. Zero means "now"; values above 10^12 are milliseconds.
    pub fn visit_timestamp(&self, now: i64) -> i64 {
        let raw = self.visit_time;
        if !raw.is_finite() || raw <= 0.0 {
            now
        } else if raw > 1e12 {
            (raw / 1000.0) as i64
        } else {
            raw as i64
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebMetadataPayload {
    pub domain: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub icon_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn visit_time_units() {
        let payload = |visit_time| LogUrlPayload {
            url: "https://example.com".into(),
            title: String::new(),
            visit_time,
        };
        assert_eq!(payload(0.0).visit_timestamp(42), 42);
        assert_eq!(payload(1_700_000_000.0).visit_timestamp(42), 1_700_000_000);
        assert_eq!(payload(1_700_000_000_123.0).visit_timestamp(42), 1_700_000_000);
    }

    #[test]
    fn stopping_carries_null_payload() {
        let encoded = serde_json::to_value(Envelope::stopping()).unwrap();
        assert_eq!(encoded, json!({"type": "stopping", "payload": null}));
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"get_web_blocklist"}"#).unwrap();
        assert_eq!(envelope.kind, "get_web_blocklist");
        assert!(envelope.payload.is_null());
    }
}
