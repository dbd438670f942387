//! Dot-path lookups into raw JSON payloads.
//!
//! Paths are dotted keys with optional list indices: `vacancies`,
//! `employer.name`, `addresses[0].postcode`, `addresses.0.postcode`.
//! An empty path addresses the value itself.

use serde_json::Value;

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn segments(path: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    for part in path.split('.') {
        let part = part.trim();
        let (name, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            out.push(Segment::Key(name));
        }
        while let Some(inner) = rest.strip_prefix('[') {
            let Some(end) = inner.find(']') else {
                // Unbalanced bracket: treat the remainder as a literal key.
                out.push(Segment::Key(rest));
                break;
            };
            let token = inner[..end].trim();
            match token.parse::<usize>() {
                Ok(i) => out.push(Segment::Index(i)),
                Err(_) => out.push(Segment::Key(token.trim_matches(['"', '\'']))),
            }
            rest = &inner[end + 1..];
        }
    }
    out
}

/// Resolve `path` against `value`. Returns `None` when any segment is missing.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments(path) {
        current = match (segment, current) {
            (Segment::Index(i), Value::Array(items)) => items.get(i)?,
            (Segment::Key(k), Value::Array(items)) => items.get(k.parse::<usize>().ok()?)?,
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolve `path` to a non-empty scalar rendered as text.
///
/// Used for dedup keys: strings are trimmed, numbers and booleans are
/// rendered; null, empty strings, arrays and objects yield `None`.
pub fn resolve_text(value: &Value, path: &str) -> Option<String> {
    let text = match resolve(value, path)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Resolve `path` to an unsigned integer, accepting numeric strings.
pub fn resolve_u64(value: &Value, path: &str) -> Option<u64> {
    match resolve(value, path)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_keys_and_indices() {
        let raw = json!({
            "employer": { "name": "Acme" },
            "addresses": [{ "postcode": "AB1 2CD" }, { "postcode": "EF3 4GH" }]
        });
        assert_eq!(resolve(&raw, "employer.name"), Some(&json!("Acme")));
        assert_eq!(
            resolve(&raw, "addresses[1].postcode"),
            Some(&json!("EF3 4GH"))
        );
        assert_eq!(
            resolve(&raw, "addresses.0.postcode"),
            Some(&json!("AB1 2CD"))
        );
    }

    #[test]
    fn empty_path_is_the_root() {
        let raw = json!([1, 2]);
        assert_eq!(resolve(&raw, ""), Some(&raw));
    }

    #[test]
    fn missing_segments_resolve_to_none() {
        let raw = json!({ "a": { "b": [] } });
        assert_eq!(resolve(&raw, "a.c"), None);
        assert_eq!(resolve(&raw, "a.b[0]"), None);
        assert_eq!(resolve(&raw, "a.b.x"), None);
    }

    #[test]
    fn text_resolution_rejects_blank_values() {
        let raw = json!({ "id": "  ", "num": 42, "nested": { "ref": " R1 " } });
        assert_eq!(resolve_text(&raw, "id"), None);
        assert_eq!(resolve_text(&raw, "num").as_deref(), Some("42"));
        assert_eq!(resolve_text(&raw, "nested.ref").as_deref(), Some("R1"));
        assert_eq!(resolve_text(&raw, "nested"), None);
    }

    #[test]
    fn numeric_resolution_accepts_strings() {
        let raw = json!({ "totalPages": "3", "total": 12 });
        assert_eq!(resolve_u64(&raw, "totalPages"), Some(3));
        assert_eq!(resolve_u64(&raw, "total"), Some(12));
        assert_eq!(resolve_u64(&raw, "missing"), None);
    }
}
