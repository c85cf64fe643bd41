use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::TakeoffError;
use crate::model::{CalcMode, ReplyRow, RowInput, TakeoffTable};
use crate::recompute::{coerce_f64, recompute_reply};

const LABEL_KEYS: &[&str] = &["item_name", "item", "label", "name"];
const DIM1_KEYS: &[&str] = &["dim1", "length", "perimeter"];
const DIM2_KEYS: &[&str] = &["dim2", "width"];
const RESULT_KEYS: &[&str] = &["result", "subtotal"];
const LIST_KEYS: &[&str] = &["items", "rows", "data"];

/// Parse a model reply and recompute it into a table
pub fn parse_table(content: &str, mode: CalcMode) -> Result<TakeoffTable, TakeoffError> {
    let rows = parse_reply(content, mode)?;
    Ok(recompute_reply(&rows, mode))
}

/// Parse the model's JSON reply into rows.
///
/// Rows that only carry a reported result (no dimensions) get their first
/// dimension backfilled from that result so recomputation reproduces it.
pub fn parse_reply(content: &str, mode: CalcMode) -> Result<Vec<ReplyRow>, TakeoffError> {
    let json_str = extract_json_from_response(content);

    let value: Value = match serde_json::from_str(&json_str) {
        Ok(value) => value,
        Err(first_err) => [json_str.as_str(), content]
            .into_iter()
            .filter_map(outermost_json)
            .find_map(|slice| serde_json::from_str(slice).ok())
            .ok_or_else(|| TakeoffError::malformed(first_err.to_string(), content))?,
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let key = LIST_KEYS
                .iter()
                .find(|k| map.get(**k).map(Value::is_array).unwrap_or(false));
            match key.and_then(|k| map.remove(*k)) {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(map)],
            }
        }
        other => {
            return Err(TakeoffError::malformed(
                format!("expected a JSON list, found {}", json_kind(&other)),
                content,
            ))
        }
    };

    let rows: Vec<ReplyRow> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Value::Object(obj) => Some(row_from_object(i, obj, mode)),
            other => {
                warn!("Skipping reply item {} ({} is not an object)", i, json_kind(other));
                None
            }
        })
        .collect();

    info!("Parsed {} takeoff rows from model reply", rows.len());

    Ok(rows)
}

fn row_from_object(index: usize, obj: &Map<String, Value>, mode: CalcMode) -> ReplyRow {
    let label = first_present(obj, LABEL_KEYS)
        .and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| format!("Item {}", index + 1));

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let dim1 = first_present(obj, DIM1_KEYS).map(coerce_f64);
    let dim2 = first_present(obj, DIM2_KEYS).map(coerce_f64);
    let reported_result = first_present(obj, RESULT_KEYS).map(coerce_f64);

    let (dim1, dim2) = match (dim1, dim2, reported_result) {
        (None, None, Some(reported)) => backfill_dimensions(mode, reported),
        (d1, d2, _) => (d1.unwrap_or(0.0), d2.unwrap_or(0.0)),
    };

    ReplyRow {
        input: RowInput {
            label,
            description,
            dim1,
            dim2,
        },
        reported_result,
    }
}

fn backfill_dimensions(mode: CalcMode, reported: f64) -> (f64, f64) {
    match mode {
        CalcMode::Area => (reported, 1.0),
        CalcMode::Perimeter => (reported, 0.0),
        CalcMode::WallArea { height } if height > 0.0 => (reported / height, 0.0),
        CalcMode::WallArea { .. } => (0.0, 0.0),
    }
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Extract JSON from a model reply (handles markdown code blocks)
pub fn extract_json_from_response(content: &str) -> String {
    let trimmed = content.trim();

    // Prose before the fence is common; start from the fence itself
    let fenced = match trimmed.find("```") {
        Some(start) => &trimmed[start..],
        None => return trimmed.to_string(),
    };

    // Skip the fence and its language tag; the payload may share its line
    let body = fenced[3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };

    body.trim().to_string()
}

/// The span from the first `[`/`{` to the matching last `]`/`}`, if any
fn outermost_json(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let close = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
