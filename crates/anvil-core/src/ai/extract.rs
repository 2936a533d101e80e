//! Tool-call extraction from raw assistant text.
//!
//! Models that lack native tool calling emit invocations in several textual
//! conventions. Resolution order, first stage producing at least one call
//! wins (stages are never merged):
//!
//! 1. Native structured calls from the response, used verbatim.
//! 2. Fenced code blocks (``` optionally tagged `json`).
//! 3. Brace-balanced scan of the whole text.
//! 4. XML-style tags: `<tool_call>{json}</tool_call>` and
//!    `<function=NAME>{json}</function>`.
//!
//! Malformed candidates are dropped silently; extraction is never fatal.
//! Output preserves first-appearance order.

use serde_json::Value;

use super::types::ToolCall;

/// Resolve the invocations of a model response: native calls verbatim when
/// present, otherwise whatever can be recovered from the text.
pub fn resolve_tool_calls(native: &[ToolCall], text: &str) -> Vec<ToolCall> {
    if !native.is_empty() {
        return native.to_vec();
    }
    extract_tool_calls(text)
}

/// Extract tool calls from assistant text alone.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let fenced = extract_from_fences(text);
    if !fenced.is_empty() {
        return fenced;
    }

    let scanned = extract_from_balanced_objects(text);
    if !scanned.is_empty() {
        return scanned;
    }

    extract_from_tags(text)
}

/// Accepted object shapes: `{name, arguments}` and
/// `{function: {name, arguments}}`. Arguments must be a JSON object.
fn parse_call_value(value: &Value) -> Option<(String, Value)> {
    let obj = value.as_object()?;
    let target = match obj.get("function") {
        Some(Value::Object(inner)) => inner,
        _ => obj,
    };
    let name = target.get("name")?.as_str()?.trim();
    let arguments = target.get("arguments")?;
    if name.is_empty() || !arguments.is_object() {
        return None;
    }
    Some((name.to_string(), arguments.clone()))
}

// ── Stage 2: fenced code blocks ────────────────────────────────────────

fn extract_from_fences(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for body in fenced_blocks(text) {
        calls.extend(parse_block(body));
    }
    calls
}

/// Bodies of ``` blocks whose info string is empty or `json`.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(close) = after.find("```") else {
            break;
        };
        let block = &after[..close];

        // The first line is an info string only when it looks like a
        // language tag; a block opening straight into JSON has none.
        let (info, body) = match block.find('\n') {
            Some(nl)
                if block[..nl]
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                (block[..nl].trim(), &block[nl + 1..])
            }
            _ => ("", block),
        };

        if info.is_empty() || info.eq_ignore_ascii_case("json") {
            blocks.push(body);
        }

        rest = &after[close + 3..];
    }

    blocks
}

/// Parse a fenced block body as one or more tool-call objects: a single
/// object, an array of objects, or concatenated objects.
fn parse_block(body: &str) -> Vec<ToolCall> {
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(parse_call_value)
            .map(|(name, args)| ToolCall::new(name, args))
            .collect(),
        Ok(value) => parse_call_value(&value)
            .map(|(name, args)| vec![ToolCall::new(name, args)])
            .unwrap_or_default(),
        Err(_) => balanced_objects(body)
            .into_iter()
            .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
            .filter_map(|value| parse_call_value(&value))
            .map(|(name, args)| ToolCall::new(name, args))
            .collect(),
    }
}

// ── Stage 3: brace-balanced scan ───────────────────────────────────────

fn extract_from_balanced_objects(text: &str) -> Vec<ToolCall> {
    balanced_objects(text)
        .into_iter()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter_map(|value| parse_call_value(&value))
        .map(|(name, args)| ToolCall::new(name, args))
        .collect()
}

/// Every top-level balanced `{...}` span in `text`.
///
/// Tracks string-literal state and backslash escapes inside a candidate so
/// braces within string values are not mistaken for structural braces.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            spans.push(&text[s..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    spans
}

// ── Stage 4: XML-style tags ────────────────────────────────────────────

fn extract_from_tags(text: &str) -> Vec<ToolCall> {
    let mut found: Vec<(usize, ToolCall)> = Vec::new();

    // <tool_call>{json}</tool_call> — payload is a tool-call object.
    let mut search = 0;
    while let Some(rel) = text[search..].find("<tool_call>") {
        let start = search + rel;
        let body_start = start + "<tool_call>".len();
        let Some(end_rel) = text[body_start..].find("</tool_call>") else {
            break;
        };
        let body = text[body_start..body_start + end_rel].trim();
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Some((name, args)) = parse_call_value(&value) {
                found.push((start, ToolCall::new(name, args)));
            }
        }
        search = body_start + end_rel + "</tool_call>".len();
    }

    // <function=NAME>{json}</function> — payload is the arguments map.
    let mut search = 0;
    while let Some(rel) = text[search..].find("<function=") {
        let start = search + rel;
        let name_start = start + "<function=".len();
        let Some(gt_rel) = text[name_start..].find('>') else {
            break;
        };
        let name = text[name_start..name_start + gt_rel].trim();
        let body_start = name_start + gt_rel + 1;
        let Some(end_rel) = text[body_start..].find("</function>") else {
            break;
        };
        let body = text[body_start..body_start + end_rel].trim();
        if !name.is_empty() {
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                if value.is_object() {
                    found.push((start, ToolCall::new(name, value)));
                }
            }
        }
        search = body_start + end_rel + "</function>".len();
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, call)| call).collect()
}
