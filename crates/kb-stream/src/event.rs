//! Typed events carried by the frame payloads.

use serde::{Deserialize, Serialize};

use crate::errors::StreamError;

/// Chart payload attached to a chat answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    pub chart_type: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// One incremental update decoded from a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Text to append to the projection's running text.
    Content(String),
    /// Text to append to one named section.
    SectionContent { section: String, content: String },
    /// Source links; replaces any previous list.
    Metadata { sources: Vec<String> },
    /// Chart payload; replaces any previous one.
    Visualization(Visualization),
    /// Typeless full-result object. Whether it matches the projection shape is
    /// decided by the projection when the snapshot is applied.
    CacheSnapshot(serde_json::Map<String, serde_json::Value>),
    /// Resets append accumulators without closing the session.
    Initial,
    /// Terminal marker.
    Stop,
}

impl Event {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content(_) => "content",
            Self::SectionContent { .. } => "section_content",
            Self::Metadata { .. } => "metadata",
            Self::Visualization(_) => "visualization",
            Self::CacheSnapshot(_) => "cache_snapshot",
            Self::Initial => "initial",
            Self::Stop => "stop",
        }
    }
}

#[derive(Deserialize)]
struct ContentPayload {
    content: serde_json::Value,
    #[serde(default)]
    section: Option<String>,
}

#[derive(Deserialize)]
struct MetadataPayload {
    #[serde(default)]
    sources: Vec<String>,
}

#[derive(Deserialize)]
struct VisualizationPayload {
    content: Visualization,
}

/// Parses one frame payload (marker already stripped).
///
/// Returns `Ok(None)` for payloads that are deliberately not events (blank or
/// the `[DONE]` sentinel). Malformed JSON is a `Parse` error and an
/// unrecognized shape a `Protocol` error; callers skip the frame in both cases.
pub fn parse_event(payload: &str) -> Result<Option<Event>, StreamError> {
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| StreamError::parse(format!("invalid frame JSON: {e}")))?;
    classify(value).map(Some)
}

fn classify(value: serde_json::Value) -> Result<Event, StreamError> {
    let serde_json::Value::Object(object) = value else {
        return Err(StreamError::protocol("frame payload is not a JSON object"));
    };
    let Some(kind) = object.get("type") else {
        return Ok(Event::CacheSnapshot(object));
    };
    let Some(kind) = kind.as_str().map(str::to_owned) else {
        return Err(StreamError::protocol("event discriminant is not a string"));
    };
    let value = serde_json::Value::Object(object);

    match kind.as_str() {
        "content" => {
            let payload: ContentPayload = from_payload(&kind, value)?;
            let content = match payload.content {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            Ok(match payload.section {
                Some(section) => Event::SectionContent { section, content },
                None => Event::Content(content),
            })
        }
        "metadata" => {
            let payload: MetadataPayload = from_payload(&kind, value)?;
            Ok(Event::Metadata {
                sources: payload.sources,
            })
        }
        "visualization" => {
            let payload: VisualizationPayload = from_payload(&kind, value)?;
            Ok(Event::Visualization(payload.content))
        }
        "initial" => Ok(Event::Initial),
        "stop" => Ok(Event::Stop),
        other => Err(StreamError::protocol(format!(
            "unrecognized event type `{other}`"
        ))),
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(
    kind: &str,
    value: serde_json::Value,
) -> Result<T, StreamError> {
    serde_json::from_value(value)
        .map_err(|e| StreamError::protocol(format!("malformed `{kind}` event: {e}")))
}
