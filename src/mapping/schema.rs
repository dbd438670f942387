//! Leaf layout of [`CanonicalRecord`] and value coercion into it.
//!
//! Field mappings and transform output are both funnelled through this table,
//! so a source value of the wrong shape degrades to the field's zero value
//! instead of failing deserialization.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::models::vacancy::{Address, CanonicalRecord};

use super::path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    OptionalFloat,
    Bool,
    TextList,
    Date,
    AddressList,
    Json,
}

/// Every mappable leaf of the canonical record, by dotted path.
pub const CANONICAL_FIELDS: &[(&str, FieldKind)] = &[
    ("vacancy_reference", FieldKind::Text),
    ("source", FieldKind::Text),
    ("title", FieldKind::Text),
    ("description", FieldKind::Text),
    ("short_description", FieldKind::Text),
    ("employer.name", FieldKind::Text),
    ("employer.description", FieldKind::Text),
    ("employer.website_url", FieldKind::Text),
    ("employer.contact_name", FieldKind::Text),
    ("employer.contact_email", FieldKind::Text),
    ("employer.contact_phone", FieldKind::Text),
    ("provider.name", FieldKind::Text),
    ("provider.ukprn", FieldKind::Text),
    ("provider.contact_name", FieldKind::Text),
    ("provider.contact_email", FieldKind::Text),
    ("provider.contact_phone", FieldKind::Text),
    ("address.line1", FieldKind::Text),
    ("address.line2", FieldKind::Text),
    ("address.line3", FieldKind::Text),
    ("address.line4", FieldKind::Text),
    ("address.postcode", FieldKind::Text),
    ("address.latitude", FieldKind::OptionalFloat),
    ("address.longitude", FieldKind::OptionalFloat),
    ("addresses", FieldKind::AddressList),
    ("course.title", FieldKind::Text),
    ("course.level", FieldKind::Integer),
    ("course.route", FieldKind::Text),
    ("course.lars_code", FieldKind::Integer),
    ("qualifications", FieldKind::TextList),
    ("wage.wage_type", FieldKind::Text),
    ("wage.amount", FieldKind::Float),
    ("wage.amount_lower_bound", FieldKind::Float),
    ("wage.amount_upper_bound", FieldKind::Float),
    ("wage.unit", FieldKind::Text),
    ("wage.additional_information", FieldKind::Text),
    ("wage.working_week_description", FieldKind::Text),
    ("wage.hours_per_week", FieldKind::Float),
    ("skills", FieldKind::TextList),
    ("things_to_consider", FieldKind::TextList),
    ("posted_date", FieldKind::Date),
    ("closing_date", FieldKind::Date),
    ("start_date", FieldKind::Date),
    ("application_url", FieldKind::Text),
    ("application_instructions", FieldKind::Text),
    ("number_of_positions", FieldKind::Integer),
    ("is_disability_confident", FieldKind::Bool),
    ("is_national_vacancy", FieldKind::Bool),
    ("raw", FieldKind::Json),
    ("imported_at", FieldKind::Date),
];

pub fn field_kind(target: &str) -> Option<FieldKind> {
    CANONICAL_FIELDS
        .iter()
        .find(|(name, _)| *name == target)
        .map(|(_, kind)| *kind)
}

/// Top-level canonical keys (`employer`, `title`, ...), in declaration order.
pub fn top_level_fields() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = Vec::new();
    for (name, _) in CANONICAL_FIELDS {
        let head = name.split('.').next().unwrap_or(name);
        if !keys.contains(&head) {
            keys.push(head);
        }
    }
    keys
}

/// Coerce an optional source value into the JSON shape of `kind`.
pub fn coerce(kind: FieldKind, value: Option<&Value>) -> Value {
    let value = value.unwrap_or(&Value::Null);
    match kind {
        FieldKind::Text => Value::String(as_text(value).unwrap_or_default()),
        FieldKind::Integer => Value::from(as_f64(value).map(|f| f.trunc() as i64).unwrap_or(0)),
        FieldKind::Float => Value::from(as_f64(value).unwrap_or(0.0)),
        FieldKind::OptionalFloat => as_f64(value).map(Value::from).unwrap_or(Value::Null),
        FieldKind::Bool => Value::Bool(as_bool(value)),
        FieldKind::TextList => Value::Array(
            as_list(value)
                .iter()
                .filter_map(as_text)
                .filter(|s| !s.is_empty())
                .map(Value::String)
                .collect(),
        ),
        FieldKind::Date => as_date(value)
            .map(|d| Value::String(d.to_rfc3339()))
            .unwrap_or(Value::Null),
        FieldKind::AddressList => {
            Value::Array(as_list(value).iter().filter_map(coerce_address).collect())
        }
        FieldKind::Json => value.clone(),
    }
}

/// Address leaves with the source spellings accepted for each.
const ADDRESS_LEAVES: &[(&str, &[&str], FieldKind)] = &[
    ("line1", &["line1", "addressLine1", "address_line1"], FieldKind::Text),
    ("line2", &["line2", "addressLine2", "address_line2"], FieldKind::Text),
    ("line3", &["line3", "addressLine3", "address_line3"], FieldKind::Text),
    ("line4", &["line4", "addressLine4", "address_line4"], FieldKind::Text),
    ("postcode", &["postcode", "postCode", "post_code"], FieldKind::Text),
    ("latitude", &["latitude", "lat"], FieldKind::OptionalFloat),
    ("longitude", &["longitude", "lon", "lng"], FieldKind::OptionalFloat),
];

/// Coerce one address object leaf by leaf. Null or mistyped leaves take
/// their zero value; only non-objects are dropped.
fn coerce_address(value: &Value) -> Option<Value> {
    let source = value.as_object()?;
    let mut address = Map::new();
    for (name, spellings, kind) in ADDRESS_LEAVES {
        let leaf = spellings
            .iter()
            .find_map(|key| source.get(*key).filter(|v| !v.is_null()));
        address.insert(name.to_string(), coerce(*kind, leaf));
    }
    Some(Value::Object(address))
}

/// Write `value` at dotted `target` inside `root`, creating objects as needed.
pub fn set_path(root: &mut Value, target: &str, value: Value) {
    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    let Some(map) = root.as_object_mut() else {
        return;
    };
    match target.split_once('.') {
        None => {
            map.insert(target.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(child, rest, value);
        }
    }
}

/// Rebuild a canonical JSON object from `candidate`, coercing every leaf.
/// Keys outside the schema are dropped.
pub fn conform(candidate: &Value) -> Value {
    let mut out = Value::Object(Map::new());
    for (name, kind) in CANONICAL_FIELDS {
        set_path(&mut out, name, coerce(*kind, path::resolve(candidate, name)));
    }
    out
}

/// Conform `candidate` and deserialize it into a record.
pub fn build_record(candidate: &Value) -> Result<CanonicalRecord, SyncError> {
    let mut value = conform(candidate);
    promote_primary_address(&mut value);
    serde_json::from_value(value)
        .map_err(|e| SyncError::Record(format!("Failed to build canonical record: {e}")))
}

/// The primary address falls back to the first entry of the address list.
fn promote_primary_address(value: &mut Value) {
    let blank = serde_json::to_value(Address::default()).unwrap_or(Value::Null);
    let first = match value.get("addresses").and_then(|a| a.get(0)) {
        Some(first) if value.get("address") == Some(&blank) => first.clone(),
        _ => return,
    };
    set_path(value, "address", first);
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => {
            let parts: Vec<String> = map
                .values()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            Some(parts.join(" "))
        }
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.filter(|f| f.is_finite())
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "y"
        ),
        _ => false,
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC), `YYYY-MM-DD`, or
/// unix seconds.
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(naive.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}
