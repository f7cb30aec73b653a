use lull_contracts::{AgentOutput, AspectRatio, EventPart, Plan, DEFAULT_DURATION_SEC};
use serde_json::{Map, Value};

/// Domain tag appended to request text that does not already carry it.
pub const DOMAIN_TAG: &str = "ASMR";

/// State-tree paths checked before falling back to a full walk. Order is
/// fixed so repeated extraction over the same output is reproducible.
const KNOWN_STATE_PATHS: &[&str] = &[
    "final_response",
    "variables.final_response",
    "output.final_response",
    "draft",
    "variables.draft",
    "verify_report",
];

const REQUIRED_PLAN_KEYS: &[&str] = &["prompt", "duration_sec", "aspect_ratio"];

/// Trims the text and appends the domain tag unless it is already present
/// (case-insensitively). Idempotent, so normalized text is a stable cache key.
pub fn normalize_request_text(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.to_lowercase().contains(&DOMAIN_TAG.to_lowercase()) {
        trimmed.to_string()
    } else {
        format!("{trimmed} {DOMAIN_TAG}")
    }
}

/// Final prompt handed to the generation backend, embedding the plan's
/// duration and aspect ratio.
pub fn compose_generation_prompt(plan: &Plan) -> String {
    format!(
        "{} (duration: {} seconds, aspect ratio: {})",
        plan.prompt.trim(),
        plan.duration_sec,
        plan.aspect_ratio
    )
}

/// Locates a plan object anywhere in the agent's output, or `None` if no
/// object with the required shape exists. Search order: known state paths,
/// then a depth-first walk of the whole state tree, then the event
/// transcript most recent first.
pub fn extract_plan(output: &AgentOutput) -> Option<Plan> {
    for path in KNOWN_STATE_PATHS {
        if let Some(value) = resolve_path(&output.state, path) {
            if let Some(plan) = coerce_value(value) {
                return Some(plan);
            }
        }
    }

    if looks_like_plan(&output.state) {
        if let Some(plan) = plan_from_map(&output.state) {
            return Some(plan);
        }
    }
    for value in output.state.values() {
        if let Some(plan) = walk_value(value) {
            return Some(plan);
        }
    }

    for event in output.events.iter().rev() {
        if let Some(delta) = &event.state_delta {
            if let Some(plan) = walk_value(delta) {
                return Some(plan);
            }
        }
        for part in &event.parts {
            let found = match part {
                EventPart::Text(text) => coerce_text(text),
                EventPart::FunctionCall { args, .. } => walk_value(args),
            };
            if found.is_some() {
                return found;
            }
        }
    }

    None
}

/// Shape check: key set is a case-insensitive superset of the plan keys.
fn looks_like_plan(map: &Map<String, Value>) -> bool {
    REQUIRED_PLAN_KEYS
        .iter()
        .all(|required| map.keys().any(|k| k.eq_ignore_ascii_case(required)))
}

fn get_ignore_case<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn plan_from_map(map: &Map<String, Value>) -> Option<Plan> {
    let prompt = get_ignore_case(map, "prompt")?.as_str()?.trim();
    if prompt.is_empty() {
        return None;
    }
    let duration_sec = get_ignore_case(map, "duration_sec")
        .and_then(coerce_duration)
        .unwrap_or(DEFAULT_DURATION_SEC);
    let aspect_ratio = get_ignore_case(map, "aspect_ratio")
        .and_then(Value::as_str)
        .and_then(AspectRatio::parse)
        .unwrap_or_default();
    Some(Plan {
        prompt: prompt.to_string(),
        duration_sec,
        aspect_ratio,
    })
}

fn coerce_duration(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coercion used by the path probe and transcript scan: a mapping is checked
/// directly; text is parsed strictly, then scanned for the first embedded
/// JSON object.
fn coerce_value(value: &Value) -> Option<Plan> {
    match value {
        Value::Object(map) if looks_like_plan(map) => plan_from_map(map),
        Value::String(text) => coerce_text(text),
        _ => None,
    }
}

fn coerce_text(text: &str) -> Option<Plan> {
    let parsed: Option<Value> = serde_json::from_str(text.trim()).ok();
    let parsed = parsed.or_else(|| {
        first_json_object(text).and_then(|raw| serde_json::from_str(raw).ok())
    })?;
    match parsed {
        Value::Object(map) if looks_like_plan(&map) => plan_from_map(&map),
        _ => None,
    }
}

fn walk_value(value: &Value) -> Option<Plan> {
    if let Some(plan) = coerce_value(value) {
        return Some(plan);
    }
    match value {
        Value::Object(map) => map.values().find_map(walk_value),
        Value::Array(items) => items.iter().find_map(walk_value),
        _ => None,
    }
}

/// Dot-separated lookup through nested mappings.
fn resolve_path<'a>(state: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = state.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Returns the first balanced-brace substring of `text`. Brace depth is only
/// counted outside string literals; inside a string, a backslash escapes the
/// next character, so quoted braces and escaped quotes cannot corrupt the
/// count.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
