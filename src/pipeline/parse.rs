//! Reply parsing: model text → validated [`ExtractionRecord`]s.
//!
//! Even with a response schema in the prompt, models drift in small ways:
//!
//! - wrapping the JSON in ` ```json ... ``` ` fences
//! - returning one object instead of a one-element array
//! - wrapping the array in an object, as JSON mode requires
//! - writing prices as strings with currency symbols ("S/ 1.234,50")
//! - returning product codes as numbers, dropping leading zeros' quotes
//!
//! Parsing is tolerant of all of these; validation is not. A record without
//! a code or a name is dropped, whatever else it carries.

use crate::output::ExtractionRecord;
use crate::prompts::{BrandInstructions, PRODUCTS_FIELD};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Why a reply could not be read at all.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("reply is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a JSON array or object, got {0}")]
    UnexpectedShape(&'static str),
}

/// Parse a reply and normalise every usable record in it.
///
/// Records keep the order the model listed them in.
pub fn parse_records(
    reply: &str,
    page_number: usize,
    instructions: &BrandInstructions,
) -> Result<Vec<ExtractionRecord>, ReplyError> {
    let raw = parse_reply(reply)?;
    let total = raw.len();
    let records: Vec<ExtractionRecord> = raw
        .iter()
        .filter_map(|v| normalize_record(v, page_number, instructions))
        .collect();
    if records.len() < total {
        debug!(
            "Page {}: dropped {} of {} raw records without code or name",
            page_number,
            total - records.len(),
            total
        );
    }
    Ok(records)
}

/// Parse reply text into a list of raw JSON values.
///
/// Accepts an array of objects, an object wrapping such an array (under
/// `products` or as its only array field), or a single bare record.
pub fn parse_reply(reply: &str) -> Result<Vec<Value>, ReplyError> {
    let body = strip_code_fences(reply);
    let value = match serde_json::from_str::<Value>(body) {
        Ok(v) => v,
        Err(e) => match outermost_json(body).map(serde_json::from_str::<Value>) {
            Some(Ok(v)) => v,
            _ => return Err(ReplyError::InvalidJson(e)),
        },
    };

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(unwrap_products(map)),
        Value::Null => Err(ReplyError::UnexpectedShape("null")),
        Value::Bool(_) => Err(ReplyError::UnexpectedShape("a boolean")),
        Value::Number(_) => Err(ReplyError::UnexpectedShape("a number")),
        Value::String(_) => Err(ReplyError::UnexpectedShape("a string")),
    }
}

/// Normalise one raw record; `None` when it is not an object or lacks a
/// code or a name.
pub fn normalize_record(
    raw: &Value,
    page_number: usize,
    instructions: &BrandInstructions,
) -> Option<ExtractionRecord> {
    let obj = raw.as_object()?;

    let code = text_field(obj, "code");
    let name = text_field(obj, "name");
    if code.is_empty() || name.is_empty() {
        return None;
    }

    let brand = non_empty_or(text_field(obj, "brand"), &instructions.default_brand);
    let campaign = non_empty_or(text_field(obj, "campaign"), &instructions.default_campaign);

    Some(ExtractionRecord {
        code,
        name,
        presentation: text_field(obj, "presentation"),
        content: number_field(obj, "content"),
        offer_price: number_field(obj, "offerPrice"),
        regular_price: number_field(obj, "regularPrice"),
        brand,
        campaign,
        page_number,
    })
}

fn unwrap_products(mut map: Map<String, Value>) -> Vec<Value> {
    if let Some(Value::Array(items)) = map.get_mut(PRODUCTS_FIELD) {
        return std::mem::take(items);
    }
    if !map.contains_key("code") && !map.contains_key("name") {
        let mut arrays = map.values_mut().filter(|v| v.is_array());
        if let (Some(Value::Array(items)), None) = (arrays.next(), arrays.next()) {
            return std::mem::take(items);
        }
    }
    vec![Value::Object(map)]
}

// ── Fences ───────────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n?(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => trimmed,
    }
}

/// Slice from the first `[`/`{` to the last `]`/`}`, for replies that wrap
/// the JSON in prose.
fn outermost_json(input: &str) -> Option<&str> {
    let start = input.find(['[', '{'])?;
    let end = input.rfind([']', '}'])?;
    (end > start).then(|| &input[start..=end])
}

// ── Field coercion ───────────────────────────────────────────────────────────

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Non-negative number, 0 when missing or unreadable.
fn number_field(obj: &Map<String, Value>, key: &str) -> f64 {
    let n = match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_decimal(s),
        _ => None,
    };
    match n {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d[\d.,]*").unwrap());

/// Read a human-formatted number: "S/ 29.90", "1.234,50", "1,234.50", "12%".
fn parse_decimal(input: &str) -> Option<f64> {
    let m = RE_NUMBER.find(input)?;
    let s = m.as_str().trim_end_matches(['.', ',']);

    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');
    let normalized = match (last_dot, last_comma) {
        // Whichever separator comes last is the decimal point.
        (Some(d), Some(c)) if d > c => s.replace(',', ""),
        (Some(_), Some(_)) => s.replace('.', "").replace(',', "."),
        (None, Some(c)) => {
            let decimals = s.len() - c - 1;
            if s.matches(',').count() == 1 && decimals != 3 {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (Some(_), None) if s.matches('.').count() > 1 => s.replace('.', ""),
        _ => s.to_string(),
    };
    normalized.parse::<f64>().ok()
}
