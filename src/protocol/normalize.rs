//! Provider payload normalization.
//!
//! One decoded `data:` payload is probed for each known wire shape. Every
//! probe yields a typed partial result, and `merge` folds them into a single
//! [`SseMessage`]:
//!
//! - flat / Anthropic-compatible: `{content, error, usage, finished, reasoning}`
//!   where `content` is a string or an array of `text`/`thinking` blocks
//! - OpenAI chat: `{choices: [{delta | message, finish_reason}]}`
//! - plain text: a bare string

use serde_json::{Map, Value};

use super::message::{SseMessage, TokenUsage};

/// Reasoning field names looked up under `choices[0]`, highest priority first.
const CHOICE_REASONING_FIELDS: [(ChoiceSlot, &str); 6] = [
    (ChoiceSlot::Delta, "reasoning"),
    (ChoiceSlot::Delta, "reasoning_content"),
    (ChoiceSlot::Delta, "thinking"),
    (ChoiceSlot::Delta, "thought"),
    (ChoiceSlot::Message, "reasoning"),
    (ChoiceSlot::Message, "reasoning_content"),
];

#[derive(Debug, Clone, Copy)]
enum ChoiceSlot {
    Delta,
    Message,
}

/// Shape of a decoded payload, discovered before any field extraction.
enum PayloadShape<'a> {
    Text(&'a str),
    Object(&'a Map<String, Value>),
    Opaque,
}

fn classify(raw: &Value) -> PayloadShape<'_> {
    match raw {
        Value::String(text) if !text.is_empty() => PayloadShape::Text(text),
        Value::Object(obj) => PayloadShape::Object(obj),
        _ => PayloadShape::Opaque,
    }
}

/// Fields carried by the flat shape.
#[derive(Debug, Default)]
struct FlatFields {
    content: Option<String>,
    block_reasoning: Option<String>,
    reasoning: Option<String>,
    error: Option<String>,
    usage: Option<TokenUsage>,
    finished: Option<bool>,
}

/// Fields carried by `choices[0]` of the OpenAI chat shape.
#[derive(Debug, Default)]
struct ChoiceFields {
    content: Option<String>,
    reasoning: Option<String>,
    finished: bool,
}

/// Normalize one decoded `data:` payload.
///
/// Returns `None` for falsy input (`null`, `false`, `0`, `""`) and for
/// payloads in which no known field was found.
#[must_use]
pub fn normalize_payload(raw: &Value) -> Option<SseMessage> {
    match classify(raw) {
        PayloadShape::Text(text) => Some(SseMessage::text(text)),
        PayloadShape::Object(obj) => {
            let flat = probe_flat(obj);
            // Non-empty flat content wins; choices are only consulted
            // without it so the same text is never appended twice.
            let choice = if flat.content.as_deref().map_or(true, str::is_empty) {
                probe_choice(obj)
            } else {
                None
            };
            let message = merge(flat, choice);
            (!message.is_empty()).then_some(message)
        }
        PayloadShape::Opaque => None,
    }
}

fn probe_flat(obj: &Map<String, Value>) -> FlatFields {
    let mut fields = FlatFields::default();

    match obj.get("content") {
        Some(Value::String(text)) => fields.content = Some(text.clone()),
        Some(Value::Array(blocks)) => {
            let (content, reasoning) = collect_content_blocks(blocks);
            fields.content = content;
            fields.block_reasoning = reasoning;
        }
        _ => {}
    }

    if let Some(error) = obj.get("error") {
        fields.error = coerce_error(error);
    }

    if let Some(usage) = obj.get("usage").filter(|usage| usage.is_object()) {
        match serde_json::from_value::<TokenUsage>(usage.clone()) {
            Ok(parsed) => fields.usage = Some(parsed),
            Err(err) => tracing::trace!("ignoring malformed usage object: {err}"),
        }
    }

    if let Some(finished) = obj.get("finished") {
        fields.finished = Some(is_truthy(finished));
    }

    if let Some(Value::String(reasoning)) = obj.get("reasoning") {
        fields.reasoning = Some(reasoning.clone());
    }

    fields
}

/// Concatenate Anthropic-style content blocks in order.
///
/// One frame may carry several blocks; none of them may be dropped.
fn collect_content_blocks(blocks: &[Value]) -> (Option<String>, Option<String>) {
    let mut content: Option<String> = None;
    let mut reasoning: Option<String> = None;

    for block in blocks {
        let Some(block) = block.as_object() else {
            continue;
        };
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    content.get_or_insert_with(String::new).push_str(text);
                }
            }
            Some("thinking") => {
                if let Some(thinking) = block.get("thinking").and_then(Value::as_str) {
                    reasoning.get_or_insert_with(String::new).push_str(thinking);
                }
            }
            _ => {}
        }
    }

    (content, reasoning)
}

fn probe_choice(obj: &Map<String, Value>) -> Option<ChoiceFields> {
    let choice = obj
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(Value::as_object)?;
    let delta = choice.get("delta").and_then(Value::as_object);
    let message = choice.get("message").and_then(Value::as_object);

    let slot = |slot: ChoiceSlot| match slot {
        ChoiceSlot::Delta => delta,
        ChoiceSlot::Message => message,
    };

    let content = non_empty_str(message, "content").or_else(|| non_empty_str(delta, "content"));
    let reasoning = CHOICE_REASONING_FIELDS
        .iter()
        .find_map(|&(which, field)| non_empty_str(slot(which), field));
    let finished = choice.get("finish_reason").is_some_and(is_truthy);

    Some(ChoiceFields {
        content,
        reasoning,
        finished,
    })
}

/// Fold the probe results into one message.
///
/// Precedence: non-empty flat content over choice content; reasoning from content
/// blocks, then from the choice, then the top-level `reasoning` string;
/// a choice `finish_reason` always marks the message finished.
fn merge(flat: FlatFields, choice: Option<ChoiceFields>) -> SseMessage {
    let choice = choice.unwrap_or_default();

    SseMessage {
        content: match flat.content {
            Some(content) if !content.is_empty() => Some(content),
            empty => choice.content.or(empty),
        },
        reasoning: flat
            .block_reasoning
            .or(choice.reasoning)
            .or(flat.reasoning),
        error: flat.error,
        usage: flat.usage,
        finished: if choice.finished {
            Some(true)
        } else {
            flat.finished
        },
        ..SseMessage::default()
    }
}

/// Coerce an `error` field into display text.
///
/// Strings pass through; objects use their `message` when present, else
/// their JSON text. `null` counts as "no error".
fn coerce_error(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Object(obj) => match obj.get("message") {
            Some(Value::String(message)) if !message.is_empty() => Some(message.clone()),
            Some(message) if is_truthy(message) => Some(message.to_string()),
            _ => Some(error.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn non_empty_str(obj: Option<&Map<String, Value>>, field: &str) -> Option<String> {
    obj?.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// JavaScript-style truthiness, which the upstream producers rely on for
/// `finish_reason` and `finished`.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
