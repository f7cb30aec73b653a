use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound request body. `order_number` is accepted for compatibility with
/// older clients but nothing in the pipeline reads it.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoRequest {
    pub response: String,
    #[serde(default, rename = "orderNumber")]
    pub order_number: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "16:9" => Some(AspectRatio::Widescreen),
            "9:16" => Some(AspectRatio::Portrait),
            "1:1" => Some(AspectRatio::Square),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_DURATION_SEC: i64 = 5;

/// The structured object driving one generation. Produced by extraction from
/// agent output, or by [`Plan::fallback`] when no plan is discoverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub prompt: String,
    pub duration_sec: i64,
    pub aspect_ratio: AspectRatio,
}

impl Plan {
    /// Default plan substituted when extraction comes up empty: the raw
    /// request text, five seconds, widescreen.
    pub fn fallback(raw_text: &str) -> Self {
        Self {
            prompt: raw_text.to_string(),
            duration_sec: DEFAULT_DURATION_SEC,
            aspect_ratio: AspectRatio::Widescreen,
        }
    }
}

/// One conversation turn from the agent engine. `state_delta` is the state
/// snapshot the turn carried, if any.
#[derive(Debug, Clone, Default)]
pub struct AgentEvent {
    pub state_delta: Option<Value>,
    pub parts: Vec<EventPart>,
}

#[derive(Debug, Clone)]
pub enum EventPart {
    Text(String),
    FunctionCall { name: String, args: Value },
}

/// Everything the agent collaborator hands back for one request: the final
/// session state and the ordered event transcript. Read-only to the core.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub state: Map<String, Value>,
    pub events: Vec<AgentEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_round_trips_wire_strings() {
        for s in ["16:9", "9:16", "1:1"] {
            assert_eq!(AspectRatio::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(AspectRatio::parse("4:3"), None);
    }

    #[test]
    fn video_request_accepts_legacy_order_number() {
        let req: VideoRequest =
            serde_json::from_str(r#"{"response":"rain on a tent","orderNumber":3}"#).unwrap();
        assert_eq!(req.response, "rain on a tent");
        assert_eq!(req.order_number, Some(3));
    }

    #[test]
    fn fallback_plan_uses_defaults() {
        let plan = Plan::fallback("soft rain");
        assert_eq!(plan.prompt, "soft rain");
        assert_eq!(plan.duration_sec, 5);
        assert_eq!(plan.aspect_ratio, AspectRatio::Widescreen);
    }
}
