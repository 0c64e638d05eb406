//! Analytics events as delivered by the webhook, parsed once into a closed
//! set of variants. Anything that does not fit becomes [`Event::Unknown`].

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Track {
        event: Option<String>,
        user_id: Option<String>,
    },
    Page {
        path: Option<String>,
    },
    Identify {
        collector_level: Option<i64>,
    },
    Unknown,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Track { .. } => "track",
            Event::Page { .. } => "page",
            Event::Identify { .. } => "identify",
            Event::Unknown => "unknown",
        }
    }
}

impl From<&Value> for Event {
    fn from(payload: &Value) -> Self {
        match payload.get("type").and_then(Value::as_str) {
            Some("track") => Event::Track {
                event: string_at(payload, &["event"]),
                user_id: id_at(payload, "userId"),
            },
            Some("page") => Event::Page {
                path: string_at(payload, &["properties", "path"]),
            },
            Some("identify") => Event::Identify {
                collector_level: payload
                    .pointer("/traits/collector_level")
                    .and_then(level_of),
            },
            _ => Event::Unknown,
        }
    }
}

fn string_at(payload: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(payload, |v, key| v.get(key))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Integral JSON numbers of any representation. Huge values saturate, so
/// they still rank as the highest level; fractional levels are not levels.
fn level_of(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if v.as_u64().is_some() {
        return Some(i64::MAX);
    }
    v.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

/// Identifiers are sometimes numeric; only `null` or absence count as missing.
fn id_at(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
