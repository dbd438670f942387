// Field mapping layer: declarative dot-path extraction from raw source
// records into the canonical vacancy record, plus the sandboxed transform pass.

pub mod path;
pub mod schema;
pub mod transform;

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::models::vacancy::CanonicalRecord;

use self::schema::{FieldKind, coerce, field_kind, set_path};

/// Maps raw source items onto [`CanonicalRecord`] using canonical-field →
/// source-path pairs. Targets outside the canonical schema are discarded when
/// the mapper is built.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    source: String,
    mappings: Vec<(String, FieldKind, String)>,
}

impl FieldMapper {
    pub fn new(mappings: &BTreeMap<String, String>, source: &str) -> Self {
        let mut resolved = Vec::with_capacity(mappings.len());
        for (target, source_path) in mappings {
            let target = target.trim();
            match field_kind(target) {
                Some(_) if matches!(target, "raw" | "imported_at" | "source") => {
                    tracing::warn!("Field mapping target '{target}' is managed by the importer, ignoring");
                }
                Some(kind) => resolved.push((target.to_string(), kind, source_path.trim().to_string())),
                None => {
                    tracing::warn!("Unknown canonical field '{target}' in field mappings, ignoring");
                }
            }
        }
        Self {
            source: source.to_string(),
            mappings: resolved,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Build a canonical record from one raw item. Missing source paths yield
    /// the target's zero value.
    pub fn map(&self, raw: &Value) -> Result<CanonicalRecord, SyncError> {
        finish(self.candidate(raw), &self.source, raw)
    }

    /// Mapped values as a partial canonical JSON object, for callers that
    /// add hand-built fields before calling [`finish`].
    pub fn candidate(&self, raw: &Value) -> Value {
        let mut candidate = Value::Object(Map::new());
        for (target, kind, source_path) in &self.mappings {
            set_path(&mut candidate, target, coerce(*kind, path::resolve(raw, source_path)));
        }
        candidate
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Stamp importer-managed fields onto a candidate and build the record.
pub fn finish(mut candidate: Value, source: &str, raw: &Value) -> Result<CanonicalRecord, SyncError> {
    set_path(&mut candidate, "source", Value::String(source.to_string()));
    set_path(&mut candidate, "raw", raw.clone());
    set_path(
        &mut candidate,
        "imported_at",
        Value::String(Utc::now().to_rfc3339()),
    );
    schema::build_record(&candidate)
}
