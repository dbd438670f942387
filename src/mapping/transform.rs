//! Sandboxed second-pass transform over mapped records.
//!
//! Task transform code is a Rhai script. The script sees a copy of the record
//! as the `record` map and either returns a map or mutates `record` in place.
//! Only values of existing canonical fields survive the merge; `raw` and
//! `imported_at` are never writable. The engine has no I/O, no module loading,
//! and bounded operations, depth, collection sizes and wall-clock time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rhai::{AST, Dynamic, Engine, Scope};
use serde_json::Value;

use crate::error::SyncError;
use crate::models::vacancy::CanonicalRecord;

use super::schema::{self, top_level_fields};

const READ_ONLY_FIELDS: &[&str] = &["raw", "imported_at"];

#[derive(Debug, Clone)]
pub struct TransformLimits {
    pub max_operations: u64,
    pub timeout: Duration,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for TransformLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            timeout: Duration::from_millis(250),
            max_call_levels: 16,
            max_expr_depth: 64,
            max_string_size: 256 * 1024,
            max_array_size: 10_000,
            max_map_size: 1_000,
        }
    }
}

pub struct TransformScript {
    engine: Engine,
    ast: AST,
    started: Arc<Mutex<Instant>>,
}

impl std::fmt::Debug for TransformScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformScript").finish_non_exhaustive()
    }
}

impl TransformScript {
    /// Compile transform code. A script that does not parse is a
    /// configuration problem, not a per-record one.
    pub fn compile(code: &str, limits: &TransformLimits) -> Result<Self, SyncError> {
        let started = Arc::new(Mutex::new(Instant::now()));
        let engine = sandboxed_engine(limits, started.clone());
        let ast = engine
            .compile(code)
            .map_err(|e| SyncError::Configuration(format!("Transform code does not compile: {e}")))?;
        Ok(Self {
            engine,
            ast,
            started,
        })
    }

    /// Run the script over a copy of `record` and return the merged result.
    pub fn apply(&self, record: &CanonicalRecord) -> Result<CanonicalRecord, SyncError> {
        let original = serde_json::to_value(record)
            .map_err(|e| SyncError::Record(format!("Failed to serialize record: {e}")))?;

        let mut exposed = original.clone();
        if let Some(obj) = exposed.as_object_mut() {
            for field in READ_ONLY_FIELDS {
                obj.remove(*field);
            }
        }
        let input = rhai::serde::to_dynamic(&exposed)
            .map_err(|e| SyncError::Record(format!("Transform input rejected: {e}")))?;

        let mut scope = Scope::new();
        scope.push("record", input);

        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        let returned = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast)
            .map_err(|e| SyncError::Record(format!("Transform failed: {e}")))?;

        let output = if returned.is_map() {
            returned
        } else {
            scope
                .get_value::<Dynamic>("record")
                .ok_or_else(|| SyncError::Record("Transform removed the record".to_string()))?
        };
        if !output.is_map() {
            return Err(SyncError::Record(format!(
                "Transform must produce a map, got {}",
                output.type_name()
            )));
        }
        let output: Value = rhai::serde::from_dynamic(&output)
            .map_err(|e| SyncError::Record(format!("Transform output rejected: {e}")))?;

        schema::build_record(&merge(original, &output))
    }
}

/// Overlay allow-listed top-level keys of `changes` onto `original`.
fn merge(original: Value, changes: &Value) -> Value {
    let mut merged = match original {
        Value::Object(map) => map,
        other => return other,
    };
    let allowed = top_level_fields();
    if let Some(changes) = changes.as_object() {
        for (key, value) in changes {
            if READ_ONLY_FIELDS.contains(&key.as_str()) || !allowed.contains(&key.as_str()) {
                tracing::debug!("Transform output key '{key}' is not writable, dropping");
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

fn sandboxed_engine(limits: &TransformLimits, started: Arc<Mutex<Instant>>) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth / 2);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_max_modules(0);
    engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
    engine.disable_symbol("eval");

    let timeout = limits.timeout;
    engine.on_progress(move |_ops| {
        let elapsed = started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed();
        (elapsed > timeout).then(|| Dynamic::from("transform timed out"))
    });
    engine.on_print(|text| tracing::debug!(target: "transform", "{text}"));
    engine.on_debug(|text, _source, _pos| tracing::debug!(target: "transform", "{text}"));
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CanonicalRecord {
        CanonicalRecord {
            title: "  plumbing apprentice ".into(),
            vacancy_reference: "R1".into(),
            raw: json!({ "vacancyReference": "R1" }),
            ..CanonicalRecord::default()
        }
    }

    #[test]
    fn script_can_reshape_existing_fields() {
        let script = TransformScript::compile(
            r#"
                record.title.trim();
                record.title = record.title.to_upper();
                record.wage.amount = 300;
                record.skills.push("Teamwork");
                record
            "#,
            &TransformLimits::default(),
        )
        .unwrap();

        let out = script.apply(&sample()).unwrap();
        assert_eq!(out.title, "PLUMBING APPRENTICE");
        assert_eq!(out.wage.amount, 300.0);
        assert_eq!(out.skills, vec!["Teamwork".to_string()]);
        assert_eq!(out.vacancy_reference, "R1");
    }

    #[test]
    fn in_place_mutation_without_return_is_kept() {
        let script =
            TransformScript::compile(r#"record.short_description = "short";"#, &TransformLimits::default())
                .unwrap();
        let out = script.apply(&sample()).unwrap();
        assert_eq!(out.short_description, "short");
    }

    #[test]
    fn new_keys_and_read_only_fields_are_dropped() {
        let script = TransformScript::compile(
            r#"
                record.invented = "nope";
                record.raw = #{ hacked: true };
                record.employer.extra = 1;
                record
            "#,
            &TransformLimits::default(),
        )
        .unwrap();

        let original = sample();
        let out = script.apply(&original).unwrap();
        assert_eq!(out.raw, original.raw);
        let value = serde_json::to_value(&out).unwrap();
        assert!(value.get("invented").is_none());
        assert!(value["employer"].get("extra").is_none());
    }

    #[test]
    fn runaway_scripts_are_stopped() {
        let limits = TransformLimits {
            max_operations: 10_000,
            ..TransformLimits::default()
        };
        let script = TransformScript::compile("loop { }", &limits).unwrap();
        let err = script.apply(&sample()).unwrap_err();
        assert!(matches!(err, SyncError::Record(_)));
    }

    #[test]
    fn runtime_errors_are_record_errors() {
        let script =
            TransformScript::compile("record.title = record.title.no_such_method(); record", &TransformLimits::default())
                .unwrap();
        assert!(matches!(script.apply(&sample()), Err(SyncError::Record(_))));
    }

    #[test]
    fn syntax_errors_are_configuration_errors() {
        let err = TransformScript::compile("record.title = ", &TransformLimits::default()).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn module_imports_are_refused() {
        let result = TransformScript::compile(r#"import "fs" as fs; record"#, &TransformLimits::default())
            .and_then(|s| s.apply(&sample()));
        assert!(result.is_err());
    }
}
