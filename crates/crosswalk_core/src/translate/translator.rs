//! Workflow document field-reference translation.
//!
//! # Responsibility
//! - Walk the known workflow blocks and rewrite custom-field references from
//!   source-environment codes to target-environment codes.
//! - Report the forms the document depends on and a reviewable text diff.
//!
//! # Invariants
//! - Rewrites append the target code as a new final segment; nothing is
//!   replaced.
//! - The sink holds every accepted rewrite before the next one is attempted.
//! - In lenient mode unresolved references stay byte-identical.
//! - Unknown or malformed blocks are skipped, never fatal.

use crate::model::environment::Environment;
use crate::model::registry::{FieldRecord, RegistrySnapshot, ResolutionError};
use crate::translate::diff::TextDiff;
use crate::translate::reference::{subform_display_name, FieldReference};
use crate::translate::sink::DocumentSink;
use indexmap::IndexSet;
use log::{info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

const SPECIMEN_COLLECTION_BLOCK: &str = "specimenCollection";
const DICTIONARY_BLOCK: &str = "dictionary";

/// Suffix appended to a dropdown source's form name once its control name
/// was rewritten; the form must be checked by hand in the target.
pub const FORM_PRESENCE_MARKER: &str = ".verifyFormPresenceInNewEnv";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Fail on the first reference the registry cannot resolve.
    pub strict: bool,
}

/// One accepted rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// JSON pointer of the rewritten string.
    pub pointer: String,
    pub before: String,
    pub after: String,
}

/// A candidate reference left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub pointer: String,
    pub reference: String,
}

/// A top-level block that matched no known substructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBlock {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationReport {
    pub document: Value,
    /// Canonical form names the document depends on, in first-seen order.
    pub required_forms: Vec<String>,
    pub rewrites: Vec<Rewrite>,
    pub unresolved: Vec<UnresolvedReference>,
    pub skipped_blocks: Vec<SkippedBlock>,
    pub diff: TextDiff,
}

#[derive(Debug)]
pub enum TranslateError {
    Resolution(ResolutionError),
    Sink(String),
}

impl Display for TranslateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolution(err) => write!(f, "{err}"),
            Self::Sink(message) => write!(f, "failed to persist translated document: {message}"),
        }
    }
}

impl Error for TranslateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resolution(err) => Some(err),
            Self::Sink(_) => None,
        }
    }
}

impl From<ResolutionError> for TranslateError {
    fn from(value: ResolutionError) -> Self {
        Self::Resolution(value)
    }
}

/// Kind of string slot found while walking a block.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// A dotted field reference (`name`, `baseField`, rule `field`).
    Reference(String),
    /// A dropdown source control name plus the sibling `formName`, if any.
    ControlName {
        pointer: String,
        form_name: Option<String>,
    },
}

/// Translator over one registry snapshot.
#[derive(Debug, Clone, Copy)]
pub struct FieldTranslator<'a> {
    snapshot: &'a RegistrySnapshot,
    options: TranslateOptions,
}

struct Pass<'e> {
    source: &'e Environment,
    target: &'e Environment,
    required_forms: IndexSet<String>,
    rewrites: Vec<Rewrite>,
    unresolved: Vec<UnresolvedReference>,
}

impl<'a> FieldTranslator<'a> {
    pub fn new(snapshot: &'a RegistrySnapshot, options: TranslateOptions) -> Self {
        Self { snapshot, options }
    }

    pub fn options(&self) -> TranslateOptions {
        self.options
    }

    /// Rewrites `document` from `source` codes to `target` codes.
    ///
    /// The working document goes to `sink` after every rewrite and once more
    /// when the walk completes.
    pub fn translate(
        &self,
        document: &Value,
        source: &Environment,
        target: &Environment,
        sink: &mut dyn DocumentSink,
    ) -> Result<TranslationReport, TranslateError> {
        let mut working = document.clone();
        let mut skipped_blocks = Vec::new();
        let mut slots = Vec::new();

        match document {
            Value::Array(blocks) => {
                for (index, block) in blocks.iter().enumerate() {
                    let pointer = format!("/{index}");
                    if let Err(reason) = collect_block(block, &pointer, &mut slots) {
                        skipped_blocks.push(SkippedBlock { index, reason });
                    }
                }
            }
            Value::Object(_) => {
                if let Err(reason) = collect_block(document, "", &mut slots) {
                    skipped_blocks.push(SkippedBlock { index: 0, reason });
                }
            }
            _ => skipped_blocks.push(SkippedBlock {
                index: 0,
                reason: "document is neither a block list nor a block".to_string(),
            }),
        }

        for skipped in &skipped_blocks {
            warn!(
                "event=workflow_block module=translate status=skip index={} reason={}",
                skipped.index, skipped.reason
            );
        }

        let mut pass = Pass {
            source,
            target,
            required_forms: IndexSet::new(),
            rewrites: Vec::new(),
            unresolved: Vec::new(),
        };
        for slot in slots {
            match slot {
                Slot::Reference(pointer) => {
                    self.translate_reference(&mut working, &pointer, &mut pass, sink)?
                }
                Slot::ControlName { pointer, form_name } => self.translate_control_name(
                    &mut working,
                    &pointer,
                    form_name.as_deref(),
                    &mut pass,
                    sink,
                )?,
            }
        }
        sink.persist(&working).map_err(TranslateError::Sink)?;

        let diff = TextDiff::between(
            source.as_str(),
            target.as_str(),
            &pretty(document),
            &pretty(&working),
        );
        info!(
            "event=workflow_translate module=translate status=ok source={} target={} rewrites={} unresolved={} skipped_blocks={}",
            source,
            target,
            pass.rewrites.len(),
            pass.unresolved.len(),
            skipped_blocks.len()
        );

        Ok(TranslationReport {
            document: working,
            required_forms: pass.required_forms.into_iter().collect(),
            rewrites: pass.rewrites,
            unresolved: pass.unresolved,
            skipped_blocks,
            diff,
        })
    }

    fn translate_reference(
        &self,
        working: &mut Value,
        pointer: &str,
        pass: &mut Pass<'_>,
        sink: &mut dyn DocumentSink,
    ) -> Result<(), TranslateError> {
        let Some(raw) = working.pointer(pointer).and_then(Value::as_str).map(str::to_string) else {
            return Ok(());
        };
        let Some(reference) = FieldReference::parse(&raw) else {
            return Ok(());
        };

        let scopes: Vec<String> = reference
            .events_token()
            .map(|token| vec![subform_display_name(token), token.to_string()])
            .unwrap_or_default();

        let Some((row, target_code)) = self.resolve(&reference, &scopes, pass.source, pass.target)
        else {
            if let Some(display_name) = scopes.first() {
                pass.required_forms.insert(display_name.clone());
            }
            return self.unresolved(pointer, &raw, pass);
        };
        pass.required_forms.insert(row.form_name.clone());

        if target_code == reference.code() {
            return Ok(());
        }
        let rewritten = reference.appended(target_code);
        apply(working, pointer, &raw, rewritten, pass, sink)
    }

    fn translate_control_name(
        &self,
        working: &mut Value,
        pointer: &str,
        form_pointer: Option<&str>,
        pass: &mut Pass<'_>,
        sink: &mut dyn DocumentSink,
    ) -> Result<(), TranslateError> {
        let Some(code) = working.pointer(pointer).and_then(Value::as_str).map(str::to_string) else {
            return Ok(());
        };

        // Rows of the block's own form are tried before the rest.
        let own_form = form_pointer
            .and_then(|form_pointer| working.pointer(form_pointer))
            .and_then(Value::as_str)
            .and_then(|short_name| self.form_caption(pass.source, short_name));
        let candidates = self
            .snapshot
            .fields
            .all_by_local_code(pass.source, &code, &[]);
        let resolved = candidates
            .iter()
            .filter(|row| own_form.is_some_and(|form| row.form_name == form))
            .chain(candidates.iter())
            .find_map(|row| row.local_code(pass.target).map(|target| (*row, target)));
        let Some((row, target_code)) = resolved else {
            return self.unresolved(pointer, &code, pass);
        };
        pass.required_forms.insert(row.form_name.clone());

        if target_code == code {
            return Ok(());
        }
        let rewritten = format!("{code}.{target_code}");
        apply(working, pointer, &code, rewritten, pass, sink)?;

        if let Some(form_pointer) = form_pointer {
            if let Some(form_name) = working.pointer(form_pointer).and_then(Value::as_str) {
                let marked = format!("{form_name}{FORM_PRESENCE_MARKER}");
                let before = form_name.to_string();
                apply(working, form_pointer, &before, marked, pass, sink)?;
            }
        }
        Ok(())
    }

    /// Finds the canonical row behind a source-local code and its target code.
    fn resolve(
        &self,
        reference: &FieldReference<'_>,
        scopes: &[String],
        source: &Environment,
        target: &Environment,
    ) -> Option<(&'a FieldRecord, &'a str)> {
        let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
        self.snapshot
            .fields
            .all_by_local_code(source, reference.code(), &scopes)
            .into_iter()
            .find_map(|row| row.local_code(target).map(|code| (row, code)))
    }

    /// Canonical caption of the form `env` knows by `short_name`.
    fn form_caption(&self, env: &Environment, short_name: &str) -> Option<&'a str> {
        self.snapshot
            .forms
            .iter()
            .find(|row| {
                row.mappings
                    .get(env)
                    .and_then(|mapping| mapping.short_name.as_deref())
                    == Some(short_name)
            })
            .map(|row| row.caption.as_str())
    }

    fn unresolved(
        &self,
        pointer: &str,
        reference: &str,
        pass: &mut Pass<'_>,
    ) -> Result<(), TranslateError> {
        if self.options.strict {
            return Err(TranslateError::Resolution(
                ResolutionError::UnknownReference {
                    environment: pass.source.clone(),
                    reference: reference.to_string(),
                },
            ));
        }
        warn!(
            "event=field_reference module=translate status=skip source={} target={} pointer={}",
            pass.source, pass.target, pointer
        );
        pass.unresolved.push(UnresolvedReference {
            pointer: pointer.to_string(),
            reference: reference.to_string(),
        });
        Ok(())
    }
}

/// Writes one rewrite into the working document and persists it.
fn apply(
    working: &mut Value,
    pointer: &str,
    before: &str,
    after: String,
    pass: &mut Pass<'_>,
    sink: &mut dyn DocumentSink,
) -> Result<(), TranslateError> {
    if let Some(slot) = working.pointer_mut(pointer) {
        *slot = Value::String(after.clone());
    }
    pass.rewrites.push(Rewrite {
        pointer: pointer.to_string(),
        before: before.to_string(),
        after,
    });
    sink.persist(working).map_err(TranslateError::Sink)
}

/// Collects rewrite slots of one top-level block.
fn collect_block(block: &Value, pointer: &str, slots: &mut Vec<Slot>) -> Result<(), String> {
    let name = block
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| "block has no name".to_string())?;
    let data = block
        .get("data")
        .ok_or_else(|| format!("block `{name}` has no data"))?;
    let data_pointer = child(pointer, "data");

    match name {
        SPECIMEN_COLLECTION_BLOCK => collect_specimen_collection(data, &data_pointer, slots),
        DICTIONARY_BLOCK => collect_dictionary(data, &data_pointer, slots),
        other => Err(format!("unknown block `{other}`")),
    }
}

fn collect_specimen_collection(
    data: &Value,
    pointer: &str,
    slots: &mut Vec<Slot>,
) -> Result<(), String> {
    let mut found = Vec::new();

    if let Some(visit_fields) = data.get("visitFields") {
        let fields_pointer = child(&child(pointer, "visitFields"), "fields");
        match visit_fields.get("fields") {
            Some(fields) => collect_nested_fields(fields, &fields_pointer, &mut found)?,
            None => return Err("visitFields has no fields".to_string()),
        }
    }

    if let Some(groups) = data.get("fieldGroups") {
        let groups_pointer = child(pointer, "fieldGroups");
        let groups = groups
            .as_array()
            .ok_or_else(|| "fieldGroups is not a list".to_string())?;
        for (index, group) in groups.iter().enumerate() {
            let group_pointer = child(&groups_pointer, &index.to_string());
            if let Some(rules) = group.get("criteria").and_then(|c| c.get("rules")) {
                let rules_pointer = child(&child(&group_pointer, "criteria"), "rules");
                let rules = rules
                    .as_array()
                    .ok_or_else(|| "criteria rules are not a list".to_string())?;
                for (rule_index, rule) in rules.iter().enumerate() {
                    let rule_pointer = child(&rules_pointer, &rule_index.to_string());
                    push_string(rule, "field", &rule_pointer, &mut found);
                }
            }
            if let Some(fields) = group.get("fields") {
                let fields_pointer = child(&group_pointer, "fields");
                let fields = fields
                    .as_array()
                    .ok_or_else(|| "field group fields are not a list".to_string())?;
                for (field_index, field) in fields.iter().enumerate() {
                    let field_pointer = child(&fields_pointer, &field_index.to_string());
                    push_field_names(field, &field_pointer, &mut found);
                }
            }
        }
    }

    slots.extend(found);
    Ok(())
}

/// Visit-field lists may nest arrays of field objects arbitrarily deep.
fn collect_nested_fields(value: &Value, pointer: &str, found: &mut Vec<Slot>) -> Result<(), String> {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_nested_fields(item, &child(pointer, &index.to_string()), found)?;
            }
            Ok(())
        }
        Value::Object(_) => {
            push_field_names(value, pointer, found);
            Ok(())
        }
        _ => Err("visit field entry is neither a list nor an object".to_string()),
    }
}

fn collect_dictionary(data: &Value, pointer: &str, slots: &mut Vec<Slot>) -> Result<(), String> {
    let fields_pointer = child(pointer, "fields");
    let fields = data
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| "dictionary has no field list".to_string())?;

    let mut found = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        let field_pointer = child(&fields_pointer, &index.to_string());
        push_field_names(field, &field_pointer, &mut found);

        let Some(statics) = field
            .get("listSource")
            .and_then(|source| source.get("queryParams"))
            .and_then(|params| params.get("static"))
        else {
            continue;
        };
        let static_pointer = child(
            &child(&child(&field_pointer, "listSource"), "queryParams"),
            "static",
        );
        if statics.get("controlName").and_then(Value::as_str).is_some() {
            let form_name = statics
                .get("formName")
                .and_then(Value::as_str)
                .map(|_| child(&static_pointer, "formName"));
            found.push(Slot::ControlName {
                pointer: child(&static_pointer, "controlName"),
                form_name,
            });
        }
    }

    slots.extend(found);
    Ok(())
}

fn push_field_names(field: &Value, pointer: &str, found: &mut Vec<Slot>) {
    push_string(field, "name", pointer, found);
    push_string(field, "baseField", pointer, found);
}

fn push_string(object: &Value, key: &str, pointer: &str, found: &mut Vec<Slot>) {
    if object.get(key).and_then(Value::as_str).is_some() {
        found.push(Slot::Reference(child(pointer, key)));
    }
}

/// Appends one escaped token to a JSON pointer.
fn child(pointer: &str, token: &str) -> String {
    format!("{pointer}/{}", token.replace('~', "~0").replace('/', "~1"))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
