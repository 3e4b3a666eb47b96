//! Flat record to extension attribute-map encoding.
//!
//! # Responsibility
//! - Resolve the canonical form behind an environment's short name/id pair.
//! - Turn `Form#Field`, `Form#Field#Index` and
//!   `Form#Subform#Index#SubField` columns into the nested attribute map
//!   the platform's extension payload expects.
//!
//! # Invariants
//! - Output is always an object; no applicable columns yields `{}`.
//! - Every applicable column resolves to a local code or the record fails.
//! - Subform instances keep the order their index tokens first appear in.

use crate::model::environment::Environment;
use crate::model::registry::{FieldRecord, RegistrySnapshot, ResolutionError};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator between column name segments.
pub const COLUMN_DELIMITER: char = '#';

/// One tabular record: column name to raw cell value, in column order.
pub type FlatRecord = IndexMap<String, String>;

/// Form identity as an environment returns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormRef {
    pub short_name: String,
    pub local_id: i64,
}

impl FormRef {
    pub fn new(short_name: impl Into<String>, local_id: i64) -> Self {
        Self {
            short_name: short_name.into(),
            local_id,
        }
    }
}

/// Extension slot of a write payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionPayload {
    #[serde(rename = "attrsMap")]
    pub attrs_map: Map<String, Value>,
}

impl ExtensionPayload {
    /// The explicit empty payload; never serialized as `null`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs_map.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let mut wrapper = Map::new();
        wrapper.insert("attrsMap".to_string(), Value::Object(self.attrs_map.clone()));
        Value::Object(wrapper)
    }
}

/// Per-record results of [`ExtensionCodec::encode_batch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// `(record index, payload)` for every record that encoded.
    pub payloads: Vec<(usize, ExtensionPayload)>,
    pub failures: Vec<(usize, ResolutionError)>,
}

#[derive(Debug, PartialEq, Eq)]
enum ColumnShape<'c> {
    Simple { field: &'c str },
    Repeating { field: &'c str },
    SubformField {
        subform: &'c str,
        index: &'c str,
        field: &'c str,
    },
}

/// Encoder over one registry snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionCodec<'a> {
    snapshot: &'a RegistrySnapshot,
}

impl<'a> ExtensionCodec<'a> {
    pub fn new(snapshot: &'a RegistrySnapshot) -> Self {
        Self { snapshot }
    }

    /// Canonical caption of the form `form` names in `env`.
    pub fn resolve_form_name(
        &self,
        env: &Environment,
        form: &FormRef,
    ) -> Result<&'a str, ResolutionError> {
        self.snapshot
            .forms
            .find_by_local(env, &form.short_name, form.local_id)
            .map(|row| row.caption.as_str())
            .ok_or_else(|| ResolutionError::UnknownForm {
                environment: env.clone(),
                short_name: form.short_name.clone(),
                local_id: form.local_id,
            })
    }

    pub fn encode(
        &self,
        env: &Environment,
        form: &FormRef,
        record: &FlatRecord,
    ) -> Result<ExtensionPayload, ResolutionError> {
        let form_name = self.resolve_form_name(env, form)?;

        let mut attrs = Map::new();
        let mut instances: IndexMap<String, IndexMap<&str, Map<String, Value>>> = IndexMap::new();

        for (column, value) in record {
            if value.trim().is_empty() {
                continue;
            }
            let segments: Vec<&str> = column.split(COLUMN_DELIMITER).collect();
            if segments[0] != form_name {
                continue;
            }

            match classify(column, &segments)? {
                ColumnShape::Simple { field } => {
                    let code = self.field_code(env, form_name, field, None)?;
                    attrs.insert(code, Value::String(value.clone()));
                }
                ColumnShape::Repeating { field } => {
                    let code = self.field_code(env, form_name, field, None)?;
                    let slot = attrs
                        .entry(code)
                        .or_insert_with(|| Value::Array(Vec::new()));
                    match slot {
                        Value::Array(values) => values.push(Value::String(value.clone())),
                        other => {
                            let previous = other.take();
                            *other = Value::Array(vec![previous, Value::String(value.clone())]);
                        }
                    }
                }
                ColumnShape::SubformField {
                    subform,
                    index,
                    field,
                } => {
                    let parent = self.field_code(env, form_name, subform, None)?;
                    let child = self.field_code(env, form_name, field, Some(subform))?;
                    // Reserve the parent's position among plain attributes.
                    attrs.entry(parent.clone()).or_insert(Value::Null);
                    instances
                        .entry(parent)
                        .or_default()
                        .entry(index)
                        .or_default()
                        .entry(child)
                        .or_insert_with(|| Value::String(value.clone()));
                }
            }
        }

        for (parent, rows) in instances {
            let rows = rows.into_values().map(Value::Object).collect();
            attrs.insert(parent, Value::Array(rows));
        }

        debug!(
            "event=extension_encode module=codec status=ok env={} attributes={}",
            env,
            attrs.len()
        );
        Ok(ExtensionPayload { attrs_map: attrs })
    }

    /// Encodes every record, collecting failures instead of stopping.
    pub fn encode_batch<'r>(
        &self,
        env: &Environment,
        form: &FormRef,
        records: impl IntoIterator<Item = &'r FlatRecord>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, record) in records.into_iter().enumerate() {
            match self.encode(env, form, record) {
                Ok(payload) => outcome.payloads.push((index, payload)),
                Err(err) => outcome.failures.push((index, err)),
            }
        }
        if !outcome.failures.is_empty() {
            debug!(
                "event=extension_batch module=codec status=error env={} encoded={} failed={}",
                env,
                outcome.payloads.len(),
                outcome.failures.len()
            );
        }
        outcome
    }

    fn field_code(
        &self,
        env: &Environment,
        form_name: &str,
        field: &str,
        parent_subform: Option<&str>,
    ) -> Result<String, ResolutionError> {
        self.snapshot
            .fields
            .resolve_in_form(env, form_name, field, parent_subform)
            .and_then(|row: &FieldRecord| row.local_code(env))
            .map(str::to_string)
            .ok_or_else(|| ResolutionError::UnknownField {
                environment: env.clone(),
                form: form_name.to_string(),
                field: field.to_string(),
            })
    }
}

fn classify<'c>(column: &str, segments: &[&'c str]) -> Result<ColumnShape<'c>, ResolutionError> {
    let last = segments[segments.len() - 1];
    match segments.len() {
        4 => Ok(ColumnShape::SubformField {
            subform: segments[1],
            index: segments[2],
            field: segments[3],
        }),
        3 if is_index(last) => Ok(ColumnShape::Repeating { field: segments[1] }),
        2 | 3 if !is_index(last) => Ok(ColumnShape::Simple { field: segments[1] }),
        _ => Err(ResolutionError::MalformedColumn {
            column: column.to_string(),
        }),
    }
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
