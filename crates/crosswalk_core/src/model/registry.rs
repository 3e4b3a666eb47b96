//! Canonical cross-environment identity registry.
//!
//! # Responsibility
//! - Hold one row per canonical business key (protocol short title, form
//!   caption, field caption scoped to form/subform).
//! - Keep at most one mapping per (row, environment).
//! - Answer the lookups codec and translator need without rescanning wide
//!   tables per call.
//!
//! # Invariants
//! - A mapping entry absent from a row means "null in that environment".
//! - Rows keep their insertion order; new keys are appended.
//! - A row is only dropped once every environment mapping is null.

use crate::model::environment::Environment;
use indexmap::IndexMap;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

/// Reserved title marking protocol-group workflow rows.
pub const GROUP_WORKFLOW_TITLE: &str = "Group Workflow";

/// Row shape shared by all registry tables.
pub trait CanonicalRecord {
    type Key: Clone + Eq + Hash + Debug;
    type Mapping: Clone + PartialEq;

    fn key(&self) -> Self::Key;
    fn mappings(&self) -> &BTreeMap<Environment, Self::Mapping>;
    fn mappings_mut(&mut self) -> &mut BTreeMap<Environment, Self::Mapping>;

    fn mapping(&self, env: &Environment) -> Option<&Self::Mapping> {
        self.mappings().get(env)
    }

    /// Returns `true` when no environment maps this row anymore.
    fn is_orphaned(&self) -> bool {
        self.mappings().is_empty()
    }
}

/// Result of writing one environment mapping into a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was appended for a never-seen key.
    Added,
    /// An existing row got a new or different mapping.
    Updated,
    /// The row already carried an identical mapping.
    Unchanged,
}

/// Registry table indexed by canonical key, preserving insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryTable<R: CanonicalRecord> {
    rows: IndexMap<R::Key, R>,
}

impl<R: CanonicalRecord> Default for RegistryTable<R> {
    fn default() -> Self {
        Self {
            rows: IndexMap::new(),
        }
    }
}

impl<R: CanonicalRecord> RegistryTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from persisted rows, keeping the first row per key.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.insert(record);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        R::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.rows.contains_key(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&R>
    where
        R::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.rows.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut R>
    where
        R::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.rows.get_mut(key)
    }

    /// Iterates rows in persisted order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut R> {
        self.rows.values_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &R::Key> {
        self.rows.keys()
    }

    /// Appends a row. Returns `false` (and keeps the existing row) when the
    /// key is already present.
    pub fn insert(&mut self, record: R) -> bool {
        let key = record.key();
        if self.rows.contains_key(&key) {
            return false;
        }
        self.rows.insert(key, record);
        true
    }

    /// Writes `mapping` for `env` on the row keyed by `key`, appending a row
    /// built by `make_row` when the key has never been observed.
    pub fn upsert_mapping(
        &mut self,
        key: &R::Key,
        env: &Environment,
        mapping: R::Mapping,
        make_row: impl FnOnce() -> R,
    ) -> UpsertOutcome {
        if let Some(row) = self.rows.get_mut(key) {
            if row.mapping(env) == Some(&mapping) {
                return UpsertOutcome::Unchanged;
            }
            row.mappings_mut().insert(env.clone(), mapping);
            return UpsertOutcome::Updated;
        }

        let mut row = make_row();
        row.mappings_mut().insert(env.clone(), mapping);
        self.rows.insert(key.clone(), row);
        UpsertOutcome::Added
    }

    /// Nulls the mapping of one row in one environment.
    ///
    /// Returns `true` when a non-null mapping was cleared.
    pub fn clear_mapping(&mut self, key: &R::Key, env: &Environment) -> bool {
        self.rows
            .get_mut(key)
            .map(|row| row.mappings_mut().remove(env).is_some())
            .unwrap_or(false)
    }

    /// Drops rows whose every environment mapping is null.
    pub fn drop_orphans(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, row| !row.is_orphaned());
        before - self.rows.len()
    }

    /// Keys of rows that currently map `env`.
    pub fn keys_mapped_in(&self, env: &Environment) -> Vec<R::Key> {
        self.rows
            .iter()
            .filter(|(_, row)| row.mapping(env).is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Canonical collection protocol (or protocol group) row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolRecord {
    /// Canonical key.
    pub short_title: String,
    pub title: String,
    pub local_ids: BTreeMap<Environment, i64>,
}

impl ProtocolRecord {
    pub fn new(short_title: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            short_title: short_title.into(),
            title: title.into(),
            local_ids: BTreeMap::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.title == GROUP_WORKFLOW_TITLE
    }

    pub fn kind(&self) -> ProtocolKind {
        if self.is_group() {
            ProtocolKind::Group
        } else {
            ProtocolKind::Protocol
        }
    }
}

impl CanonicalRecord for ProtocolRecord {
    type Key = String;
    type Mapping = i64;

    fn key(&self) -> Self::Key {
        self.short_title.clone()
    }

    fn mappings(&self) -> &BTreeMap<Environment, i64> {
        &self.local_ids
    }

    fn mappings_mut(&mut self) -> &mut BTreeMap<Environment, i64> {
        &mut self.local_ids
    }
}

/// Distinguishes collection protocols from protocol groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Protocol,
    Group,
}

impl ProtocolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Group => "group",
        }
    }
}

/// Per-environment form mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormMapping {
    pub local_id: i64,
    pub short_name: Option<String>,
    /// Epoch milliseconds of the last observed modification (or creation).
    pub last_modified: Option<i64>,
}

/// Canonical form row keyed by caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormRecord {
    pub caption: String,
    pub mappings: BTreeMap<Environment, FormMapping>,
}

impl FormRecord {
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            mappings: BTreeMap::new(),
        }
    }
}

impl CanonicalRecord for FormRecord {
    type Key = String;
    type Mapping = FormMapping;

    fn key(&self) -> Self::Key {
        self.caption.clone()
    }

    fn mappings(&self) -> &BTreeMap<Environment, FormMapping> {
        &self.mappings
    }

    fn mappings_mut(&mut self) -> &mut BTreeMap<Environment, FormMapping> {
        &mut self.mappings
    }
}

/// Canonical business key of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub form_name: String,
    pub field_name: String,
    pub is_sub_field: bool,
    pub parent_subform: Option<String>,
}

impl FieldKey {
    pub fn field(form_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            form_name: form_name.into(),
            field_name: field_name.into(),
            is_sub_field: false,
            parent_subform: None,
        }
    }

    pub fn sub_field(
        form_name: impl Into<String>,
        parent_subform: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        Self {
            form_name: form_name.into(),
            field_name: field_name.into(),
            is_sub_field: true,
            parent_subform: Some(parent_subform.into()),
        }
    }
}

/// Per-environment field mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Code used in write payloads.
    pub local_code: String,
    /// Secondary reference code used in query contexts.
    pub udn: Option<String>,
    pub subform_udn: Option<String>,
    pub subform_name: Option<String>,
}

impl FieldMapping {
    pub fn new(local_code: impl Into<String>) -> Self {
        Self {
            local_code: local_code.into(),
            udn: None,
            subform_udn: None,
            subform_name: None,
        }
    }
}

/// Canonical field row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub form_name: String,
    /// `true` for subform fields and for the fields nested inside them.
    pub is_sub_form: bool,
    pub field_name: String,
    pub is_sub_field: bool,
    pub parent_subform: Option<String>,
    pub mappings: BTreeMap<Environment, FieldMapping>,
}

impl FieldRecord {
    pub fn from_key(key: &FieldKey, is_sub_form: bool) -> Self {
        Self {
            form_name: key.form_name.clone(),
            is_sub_form,
            field_name: key.field_name.clone(),
            is_sub_field: key.is_sub_field,
            parent_subform: key.parent_subform.clone(),
            mappings: BTreeMap::new(),
        }
    }

    pub fn local_code(&self, env: &Environment) -> Option<&str> {
        self.mappings.get(env).map(|m| m.local_code.as_str())
    }

    /// Returns whether this row lives in the form/subform named `scope`.
    fn in_scope(&self, env: &Environment, scope: &str) -> bool {
        if self.form_name == scope || self.parent_subform.as_deref() == Some(scope) {
            return true;
        }
        self.mappings
            .get(env)
            .and_then(|m| m.subform_name.as_deref())
            .is_some_and(|name| name == scope)
    }
}

impl CanonicalRecord for FieldRecord {
    type Key = FieldKey;
    type Mapping = FieldMapping;

    fn key(&self) -> Self::Key {
        FieldKey {
            form_name: self.form_name.clone(),
            field_name: self.field_name.clone(),
            is_sub_field: self.is_sub_field,
            parent_subform: self.parent_subform.clone(),
        }
    }

    fn mappings(&self) -> &BTreeMap<Environment, FieldMapping> {
        &self.mappings
    }

    fn mappings_mut(&mut self) -> &mut BTreeMap<Environment, FieldMapping> {
        &mut self.mappings
    }
}

pub type ProtocolTable = RegistryTable<ProtocolRecord>;
pub type FormTable = RegistryTable<FormRecord>;
pub type FieldTable = RegistryTable<FieldRecord>;

impl RegistryTable<ProtocolRecord> {
    /// Short titles of rows of `kind` that currently map `env`.
    pub fn mapped_of_kind(&self, env: &Environment, kind: ProtocolKind) -> Vec<String> {
        self.iter()
            .filter(|row| row.kind() == kind && row.local_ids.contains_key(env))
            .map(|row| row.short_title.clone())
            .collect()
    }
}

impl RegistryTable<FormRecord> {
    /// Resolves a form from the short name/id pair an environment returns.
    pub fn find_by_local(
        &self,
        env: &Environment,
        short_name: &str,
        local_id: i64,
    ) -> Option<&FormRecord> {
        self.iter().find(|row| {
            row.mappings.get(env).is_some_and(|m| {
                m.local_id == local_id && m.short_name.as_deref() == Some(short_name)
            })
        })
    }

    pub fn find_by_local_id(&self, env: &Environment, local_id: i64) -> Option<&FormRecord> {
        self.iter()
            .find(|row| row.mappings.get(env).is_some_and(|m| m.local_id == local_id))
    }
}

impl RegistryTable<FieldRecord> {
    pub fn fields_of_form<'a>(&'a self, form_name: &'a str) -> impl Iterator<Item = &'a FieldRecord> {
        self.iter().filter(move |row| row.form_name == form_name)
    }

    /// Resolves a field of `form_name` by caption for `env`.
    ///
    /// With `parent_subform` only sub-field rows of that subform match;
    /// without it only top-level rows do. A caption shared with another
    /// subform never stands in for the requested one.
    pub fn resolve_in_form(
        &self,
        env: &Environment,
        form_name: &str,
        field_name: &str,
        parent_subform: Option<&str>,
    ) -> Option<&FieldRecord> {
        self.iter().find(|row| {
            row.form_name == form_name
                && row.field_name == field_name
                && row.mappings.contains_key(env)
                && match parent_subform {
                    Some(parent) => {
                        row.is_sub_field && row.parent_subform.as_deref() == Some(parent)
                    }
                    None => !row.is_sub_field,
                }
        })
    }

    /// Rows whose `env` code equals `code`, in table order, optionally
    /// restricted to rows living in one of the `scopes` (form or subform names).
    pub fn all_by_local_code(
        &self,
        env: &Environment,
        code: &str,
        scopes: &[&str],
    ) -> Vec<&FieldRecord> {
        self.iter()
            .filter(|row| {
                row.local_code(env) == Some(code)
                    && (scopes.is_empty() || scopes.iter().any(|scope| row.in_scope(env, scope)))
            })
            .collect()
    }
}

/// Read-only view over all three registry tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub protocols: ProtocolTable,
    pub forms: FormTable,
    pub fields: FieldTable,
}

/// A required business key or field code is missing from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    UnknownForm {
        environment: Environment,
        short_name: String,
        local_id: i64,
    },
    UnknownField {
        environment: Environment,
        form: String,
        field: String,
    },
    UnknownReference {
        environment: Environment,
        reference: String,
    },
    MalformedColumn {
        column: String,
    },
}

impl Display for ResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownForm {
                environment,
                short_name,
                local_id,
            } => write!(
                f,
                "no registry form maps `{short_name}` (id {local_id}) in environment `{environment}`"
            ),
            Self::UnknownField {
                environment,
                form,
                field,
            } => write!(
                f,
                "field `{field}` of form `{form}` has no code in environment `{environment}`"
            ),
            Self::UnknownReference {
                environment,
                reference,
            } => write!(
                f,
                "field reference `{reference}` cannot be resolved from environment `{environment}`"
            ),
            Self::MalformedColumn { column } => {
                write!(f, "column `{column}` does not follow the Form#Field convention")
            }
        }
    }
}

impl Error for ResolutionError {}
