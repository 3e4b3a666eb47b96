//! Registry synchronization against live environment listings.
//!
//! # Responsibility
//! - Build the registry from every environment's listings (full sync).
//! - Refresh it from changed forms and vanished entities (incremental).
//! - Export dropdown catalogs and workflow artifacts on the side.
//!
//! # Invariants
//! - Environments are processed one at a time against a working copy; a
//!   failed listing call discards that environment's changes only.
//! - Tables are persisted after each completed environment; workflow
//!   artifacts queued by that environment are written only afterwards.
//! - Full sync never removes rows; incremental drops a row only once every
//!   environment mapping is null.
//! - Callers guarantee a single pass per registry at a time.

use crate::model::environment::Environment;
use crate::model::listing::{FieldDefinition, FormDefinition, FormListing};
use crate::model::registry::{
    CanonicalRecord, FieldKey, FieldMapping, FieldRecord, FieldTable, FormMapping, FormRecord,
    ProtocolKind, ProtocolRecord, RegistrySnapshot, UpsertOutcome, GROUP_WORKFLOW_TITLE,
};
use crate::repo::csv_store::write_dropdown_catalog;
use crate::repo::registry_repo::RegistryStore;
use crate::sync::artifacts::WorkflowArtifacts;
use crate::sync::environment_registry::EnvironmentRegistry;
use crate::sync::environment_spi::{ClientError, EnvironmentClient};
use crate::sync::report::{
    ChangeCounts, EntityFailure, EnvironmentOutcome, SyncError, SyncMode, SyncPartialFailure,
    SyncReport, SyncStage, TableChanges,
};
use indexmap::IndexMap;
use log::{info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

type EnvironmentPass = Result<(), SyncPartialFailure>;

/// Workflow artifact work queued by an environment pass.
enum WorkflowTask {
    Export {
        row: ProtocolRecord,
        kind: ProtocolKind,
        local_id: i64,
    },
    Remove {
        row: ProtocolRecord,
    },
}

/// Keeps a registry store in step with its environments.
pub struct RegistrySynchronizer<'a, S: RegistryStore> {
    store: S,
    clients: &'a EnvironmentRegistry,
    artifacts: Option<Arc<dyn WorkflowArtifacts>>,
}

impl<'a, S: RegistryStore> RegistrySynchronizer<'a, S> {
    pub fn new(store: S, clients: &'a EnvironmentRegistry) -> Self {
        Self {
            store,
            clients,
            artifacts: None,
        }
    }

    /// Attaches a receiver for workflow exports.
    pub fn with_artifacts(mut self, artifacts: Arc<dyn WorkflowArtifacts>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Upserts every listed protocol, form and field; never removes rows.
    pub fn full_sync(&self, environments: &[Environment]) -> Result<SyncReport, SyncError> {
        self.run(SyncMode::Full, environments, |client, working, outcome, tasks| {
            self.full_sync_environment(client, working, outcome, tasks)
        })
    }

    /// Applies live changes since the last pass, nulling vanished mappings
    /// and dropping rows absent everywhere.
    pub fn incremental_update(
        &self,
        environments: &[Environment],
    ) -> Result<SyncReport, SyncError> {
        self.run(
            SyncMode::Incremental,
            environments,
            |client, working, outcome, tasks| {
                self.incremental_environment(client, working, outcome, tasks)
            },
        )
    }

    /// Writes one `<env>_all_dropdown_values.csv` catalog per environment.
    ///
    /// Dropdowns without permissible values are skipped.
    pub fn sync_dropdowns(
        &self,
        environments: &[Environment],
        out_dir: &Path,
    ) -> Result<SyncReport, SyncError> {
        let started_at = Instant::now();
        let clients = self.resolve_clients(environments)?;
        let mut report = SyncReport::new(SyncMode::Dropdowns);
        log_pass_start(&report, environments.len());

        for client in clients {
            let env = client.environment().clone();
            let mut outcome = EnvironmentOutcome::new(env.clone());

            let listings = match client.list_dropdowns() {
                Ok(listings) => listings,
                Err(error) => {
                    let failure = SyncPartialFailure {
                        stage: SyncStage::Dropdowns,
                        error,
                    };
                    log_partial_failure(&report, &env, &failure);
                    outcome.failure = Some(failure);
                    report.environments.push(outcome);
                    continue;
                }
            };

            let mut catalog = IndexMap::new();
            for listing in listings.into_iter().filter(|l| l.pv_count.is_some()) {
                match client.get_dropdown_values(&listing.attribute) {
                    Ok(values) => {
                        catalog.insert(listing.attribute, values);
                    }
                    Err(error) => outcome.entity_failures.push(EntityFailure {
                        entity: "dropdown",
                        key: listing.attribute,
                        message: error.to_string(),
                    }),
                }
            }

            write_dropdown_catalog(out_dir, &env, &catalog)?;
            info!(
                "event=dropdown_catalog module=sync status=ok run_id={} env={} dropdowns={}",
                report.run_id,
                env,
                catalog.len()
            );
            report.environments.push(outcome);
        }

        log_pass_finish(&report, started_at);
        Ok(report)
    }

    fn run<F>(
        &self,
        mode: SyncMode,
        environments: &[Environment],
        mut pass: F,
    ) -> Result<SyncReport, SyncError>
    where
        F: FnMut(
            &dyn EnvironmentClient,
            &mut RegistrySnapshot,
            &mut EnvironmentOutcome,
            &mut Vec<WorkflowTask>,
        ) -> EnvironmentPass,
    {
        let started_at = Instant::now();
        let clients = self.resolve_clients(environments)?;
        let mut report = SyncReport::new(mode);
        log_pass_start(&report, environments.len());

        let mut snapshot = self.store.load_snapshot()?;
        for client in clients {
            let env = client.environment().clone();
            let mut outcome = EnvironmentOutcome::new(env.clone());
            let mut working = snapshot.clone();
            let mut tasks = Vec::new();

            match pass(client.as_ref(), &mut working, &mut outcome, &mut tasks) {
                Ok(()) => {
                    self.persist(&working)?;
                    snapshot = working;
                    self.apply_workflow_tasks(client.as_ref(), tasks, &mut outcome);
                    info!(
                        "event=sync_env module=sync status=ok run_id={} env={} protocols={} forms={} fields={} entity_failures={}",
                        report.run_id,
                        env,
                        snapshot.protocols.len(),
                        snapshot.forms.len(),
                        snapshot.fields.len(),
                        outcome.entity_failures.len()
                    );
                }
                Err(failure) => {
                    log_partial_failure(&report, &env, &failure);
                    if !tasks.is_empty() {
                        info!(
                            "event=workflow_artifacts module=sync status=skip run_id={} env={} queued={}",
                            report.run_id,
                            env,
                            tasks.len()
                        );
                    }
                    outcome.changes = Default::default();
                    outcome.failure = Some(failure);
                }
            }
            report.environments.push(outcome);
        }

        log_pass_finish(&report, started_at);
        Ok(report)
    }

    /// Resolves every requested client before any table is touched.
    fn resolve_clients(
        &self,
        environments: &[Environment],
    ) -> Result<Vec<Arc<dyn EnvironmentClient>>, SyncError> {
        environments
            .iter()
            .map(|env| self.clients.require(env).map_err(SyncError::from))
            .collect()
    }

    fn persist(&self, snapshot: &RegistrySnapshot) -> Result<(), SyncError> {
        self.store.save_protocols(&snapshot.protocols)?;
        self.store.save_forms(&snapshot.forms)?;
        self.store.save_fields(&snapshot.fields)?;
        Ok(())
    }

    fn full_sync_environment(
        &self,
        client: &dyn EnvironmentClient,
        working: &mut RegistrySnapshot,
        outcome: &mut EnvironmentOutcome,
        tasks: &mut Vec<WorkflowTask>,
    ) -> EnvironmentPass {
        let env = client.environment();

        for (kind, live) in list_protocols(client)? {
            for (short_title, title, local_id) in live {
                let key = short_title.clone();
                let result = working.protocols.upsert_mapping(&key, env, local_id, || {
                    ProtocolRecord::new(short_title, title)
                });
                outcome.changes.protocols.record(result);
                self.queue_export(env, working, &key, kind, tasks);
            }
        }

        let forms = client
            .list_forms()
            .map_err(|error| partial(SyncStage::Forms, error))?;
        for form in &forms {
            upsert_form(working, env, form, &mut outcome.changes.forms);
        }
        for form in &forms {
            refresh_fields(client, working, &form.caption, outcome, false);
        }
        Ok(())
    }

    fn incremental_environment(
        &self,
        client: &dyn EnvironmentClient,
        working: &mut RegistrySnapshot,
        outcome: &mut EnvironmentOutcome,
        tasks: &mut Vec<WorkflowTask>,
    ) -> EnvironmentPass {
        let env = client.environment();

        for (kind, live) in list_protocols(client)? {
            let mut seen = HashSet::new();
            for (short_title, title, local_id) in live {
                let key = short_title.clone();
                seen.insert(key.clone());
                let result = working.protocols.upsert_mapping(&key, env, local_id, || {
                    ProtocolRecord::new(short_title, title)
                });
                outcome.changes.protocols.record(result);
                if result != UpsertOutcome::Unchanged {
                    self.queue_export(env, working, &key, kind, tasks);
                }
            }

            for key in working.protocols.mapped_of_kind(env, kind) {
                if seen.contains(&key) {
                    continue;
                }
                working.protocols.clear_mapping(&key, env);
                outcome.changes.protocols.nulled += 1;
                self.queue_remove(working, &key, tasks);
            }
        }

        let forms = client
            .list_forms()
            .map_err(|error| partial(SyncStage::Forms, error))?;
        let mut changed = Vec::new();
        for form in &forms {
            if reconcile_form(working, env, form, &mut outcome.changes) {
                changed.push(form.caption.clone());
            }
        }

        let live: HashSet<&str> = forms.iter().map(|form| form.caption.as_str()).collect();
        for caption in working.forms.keys_mapped_in(env) {
            if live.contains(caption.as_str()) {
                continue;
            }
            working.forms.clear_mapping(&caption, env);
            outcome.changes.forms.nulled += 1;
            outcome.changes.fields.nulled +=
                null_fields_except(&mut working.fields, env, &caption, &HashSet::new());
        }

        for caption in &changed {
            refresh_fields(client, working, caption, outcome, true);
        }

        outcome.changes.protocols.dropped = working.protocols.drop_orphans();
        outcome.changes.forms.dropped = working.forms.drop_orphans();
        outcome.changes.fields.dropped = working.fields.drop_orphans();
        Ok(())
    }

    fn queue_export(
        &self,
        env: &Environment,
        working: &RegistrySnapshot,
        short_title: &str,
        kind: ProtocolKind,
        tasks: &mut Vec<WorkflowTask>,
    ) {
        if self.artifacts.is_none() {
            return;
        }
        let Some(row) = working.protocols.get(short_title) else {
            return;
        };
        let Some(local_id) = row.mapping(env).copied() else {
            return;
        };
        tasks.push(WorkflowTask::Export {
            row: row.clone(),
            kind,
            local_id,
        });
    }

    fn queue_remove(
        &self,
        working: &RegistrySnapshot,
        short_title: &str,
        tasks: &mut Vec<WorkflowTask>,
    ) {
        if self.artifacts.is_none() {
            return;
        }
        if let Some(row) = working.protocols.get(short_title) {
            tasks.push(WorkflowTask::Remove { row: row.clone() });
        }
    }

    /// Writes or removes the workflow artifacts of a committed environment.
    fn apply_workflow_tasks(
        &self,
        client: &dyn EnvironmentClient,
        tasks: Vec<WorkflowTask>,
        outcome: &mut EnvironmentOutcome,
    ) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };
        let env = client.environment();

        for task in tasks {
            match task {
                WorkflowTask::Export {
                    row,
                    kind,
                    local_id,
                } => {
                    let stored = client
                        .get_workflow(kind, local_id)
                        .map_err(|err| err.to_string())
                        .and_then(|workflow| match workflow {
                            Some(document) if !is_empty_workflow(&document) => artifacts
                                .store(env, &row, &document)
                                .map(|()| true)
                                .map_err(|err| err.to_string()),
                            _ => Ok(false),
                        });
                    match stored {
                        Ok(true) => outcome.artifacts_stored += 1,
                        Ok(false) => {}
                        Err(message) => outcome.entity_failures.push(EntityFailure {
                            entity: "workflow",
                            key: row.short_title.clone(),
                            message,
                        }),
                    }
                }
                WorkflowTask::Remove { row } => match artifacts.remove(env, &row) {
                    Ok(true) => outcome.artifacts_removed += 1,
                    Ok(false) => {}
                    Err(err) => outcome.entity_failures.push(EntityFailure {
                        entity: "workflow",
                        key: row.short_title.clone(),
                        message: err.to_string(),
                    }),
                },
            }
        }
    }
}

type ProtocolBatch = Vec<(ProtocolKind, Vec<(String, String, i64)>)>;

/// Lists protocols and groups as `(short title, title, local id)` triples.
fn list_protocols(client: &dyn EnvironmentClient) -> Result<ProtocolBatch, SyncPartialFailure> {
    let protocols: Vec<_> = client
        .list_protocols()
        .map_err(|error| partial(SyncStage::Protocols, error))?
        .into_iter()
        .map(|listing| (listing.short_title, listing.title, listing.id))
        .collect();
    let groups: Vec<_> = client
        .list_protocol_groups()
        .map_err(|error| partial(SyncStage::ProtocolGroups, error))?
        .into_iter()
        .map(|listing| (listing.name, GROUP_WORKFLOW_TITLE.to_string(), listing.id))
        .collect();
    Ok(vec![
        (ProtocolKind::Protocol, protocols),
        (ProtocolKind::Group, groups),
    ])
}

fn partial(stage: SyncStage, error: ClientError) -> SyncPartialFailure {
    SyncPartialFailure { stage, error }
}

fn form_mapping(form: &FormListing) -> FormMapping {
    FormMapping {
        local_id: form.form_id,
        short_name: Some(form.name.clone()),
        last_modified: form.update_record(),
    }
}

fn upsert_form(
    working: &mut RegistrySnapshot,
    env: &Environment,
    form: &FormListing,
    counts: &mut ChangeCounts,
) {
    let result = working
        .forms
        .upsert_mapping(&form.caption, env, form_mapping(form), || {
            FormRecord::new(form.caption.clone())
        });
    counts.record(result);
}

/// Applies one live form listing; returns `true` when its fields need a
/// refresh.
///
/// A caption the registry has never seen but whose local id an existing row
/// carries is a renamed form: the old row and its fields lose this
/// environment and the new caption starts a fresh row.
fn reconcile_form(
    working: &mut RegistrySnapshot,
    env: &Environment,
    form: &FormListing,
    changes: &mut TableChanges,
) -> bool {
    if let Some(row) = working.forms.get(&form.caption) {
        let stored = row.mapping(env);
        let changed = stored.map(|m| m.last_modified) != Some(form.update_record());
        upsert_form(working, env, form, &mut changes.forms);
        return changed;
    }

    let renamed_from = working
        .forms
        .find_by_local_id(env, form.form_id)
        .map(|row| row.caption.clone());
    if let Some(previous) = renamed_from {
        working.forms.clear_mapping(&previous, env);
        changes.forms.nulled += 1;
        changes.fields.nulled +=
            null_fields_except(&mut working.fields, env, &previous, &HashSet::new());
        info!(
            "event=form_renamed module=sync status=ok env={} form_id={}",
            env, form.form_id
        );
    }
    upsert_form(working, env, form, &mut changes.forms);
    true
}

/// Re-fetches one form's definition and upserts its fields.
///
/// With `prune`, fields of that form the definition no longer declares lose
/// this environment. A failed fetch keeps the field rows and clears the
/// stored modification time so the next pass retries the form.
fn refresh_fields(
    client: &dyn EnvironmentClient,
    working: &mut RegistrySnapshot,
    caption: &str,
    outcome: &mut EnvironmentOutcome,
    prune: bool,
) {
    let env = client.environment();
    let Some(local_id) = working
        .forms
        .get(caption)
        .and_then(|row| row.mapping(env))
        .map(|mapping| mapping.local_id)
    else {
        return;
    };

    let definition = match client.get_form_definition(local_id) {
        Ok(definition) => definition,
        Err(error) => {
            warn!(
                "event=form_definition module=sync status=error env={} form_id={} kind={}",
                env,
                local_id,
                error.kind.as_str()
            );
            if let Some(mapping) = working
                .forms
                .get_mut(caption)
                .and_then(|row| row.mappings.get_mut(env))
            {
                mapping.last_modified = None;
            }
            outcome.entity_failures.push(EntityFailure {
                entity: "form_definition",
                key: caption.to_string(),
                message: error.to_string(),
            });
            return;
        }
    };

    let seen = apply_definition(
        &mut working.fields,
        env,
        caption,
        &definition,
        &mut outcome.changes.fields,
    );
    if prune {
        outcome.changes.fields.nulled += null_fields_except(&mut working.fields, env, caption, &seen);
    }
}

/// Upserts every field and subform field of one definition; returns the
/// keys observed.
fn apply_definition(
    fields: &mut FieldTable,
    env: &Environment,
    form_name: &str,
    definition: &FormDefinition,
    counts: &mut ChangeCounts,
) -> HashSet<FieldKey> {
    let mut seen = HashSet::new();
    for field in definition.fields() {
        let key = FieldKey::field(form_name, field.caption.clone());
        let mapping = FieldMapping {
            local_code: field.name.clone(),
            udn: field.udn.clone(),
            subform_udn: None,
            subform_name: None,
        };
        upsert_field(fields, env, &key, mapping, field.is_sub_form(), counts);
        seen.insert(key);

        if field.is_sub_form() {
            for sub_field in field.sub_fields() {
                let key = FieldKey::sub_field(form_name, field.caption.clone(), sub_field.caption.clone());
                upsert_field(fields, env, &key, sub_field_mapping(field, sub_field), true, counts);
                seen.insert(key);
            }
        }
    }
    seen
}

fn sub_field_mapping(subform: &FieldDefinition, sub_field: &FieldDefinition) -> FieldMapping {
    FieldMapping {
        local_code: sub_field.name.clone(),
        udn: sub_field.udn.clone(),
        subform_udn: subform.udn.clone(),
        subform_name: Some(subform.caption.clone()),
    }
}

fn upsert_field(
    fields: &mut FieldTable,
    env: &Environment,
    key: &FieldKey,
    mapping: FieldMapping,
    is_sub_form: bool,
    counts: &mut ChangeCounts,
) {
    let result = fields.upsert_mapping(key, env, mapping, || FieldRecord::from_key(key, is_sub_form));
    counts.record(result);
}

/// Nulls `env` on fields of `form_name` not in `keep`; returns how many.
fn null_fields_except(
    fields: &mut FieldTable,
    env: &Environment,
    form_name: &str,
    keep: &HashSet<FieldKey>,
) -> usize {
    let stale: Vec<FieldKey> = fields
        .fields_of_form(form_name)
        .filter(|row| row.mapping(env).is_some())
        .map(CanonicalRecord::key)
        .filter(|key| !keep.contains(key))
        .collect();
    for key in &stale {
        fields.clear_mapping(key, env);
    }
    stale.len()
}

fn is_empty_workflow(document: &Value) -> bool {
    match document {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn log_pass_start(report: &SyncReport, environments: usize) {
    info!(
        "event=sync_start module=sync status=start run_id={} mode={} environments={}",
        report.run_id,
        report.mode.as_str(),
        environments
    );
}

fn log_partial_failure(report: &SyncReport, env: &Environment, failure: &SyncPartialFailure) {
    warn!(
        "event=sync_env module=sync status=error run_id={} env={} stage={} kind={}",
        report.run_id,
        env,
        failure.stage.as_str(),
        failure.error.kind.as_str()
    );
}

fn log_pass_finish(report: &SyncReport, started_at: Instant) {
    let failed = report
        .environments
        .iter()
        .filter(|outcome| outcome.failure.is_some())
        .count();
    info!(
        "event=sync_finish module=sync status={} run_id={} mode={} environments={} failed={} duration_ms={}",
        if failed == 0 { "ok" } else { "error" },
        report.run_id,
        report.mode.as_str(),
        report.environments.len(),
        failed,
        started_at.elapsed().as_millis()
    );
}

#[cfg(test)]
mod tests {
    use super::{apply_definition, is_empty_workflow, null_fields_except};
    use crate::model::environment::Environment;
    use crate::model::listing::FormDefinition;
    use crate::model::registry::{FieldKey, FieldTable};
    use crate::sync::report::ChangeCounts;
    use serde_json::json;
    use std::collections::HashSet;

    fn definition() -> FormDefinition {
        serde_json::from_value(json!({
            "rows": [
                [{"name": "RC", "caption": "Race", "udn": "race", "type": "listbox"}],
                [{
                    "name": "FH",
                    "caption": "FamilyHistory",
                    "udn": "familyHistory",
                    "type": "subForm",
                    "rows": [[{"name": "REL", "caption": "Relation", "udn": "relation", "type": "text"}]]
                }]
            ]
        }))
        .unwrap()
    }

    #[test]
    fn apply_definition_records_subform_context_on_sub_fields() {
        let test = Environment::parse("test").unwrap();
        let mut fields = FieldTable::new();
        let mut counts = ChangeCounts::default();

        let seen = apply_definition(&mut fields, &test, "Demographics", &definition(), &mut counts);

        assert_eq!(seen.len(), 3);
        assert_eq!(counts.added, 3);
        let relation = fields
            .get(&FieldKey::sub_field("Demographics", "FamilyHistory", "Relation"))
            .unwrap();
        assert!(relation.is_sub_form);
        let mapping = &relation.mappings[&test];
        assert_eq!(mapping.local_code, "REL");
        assert_eq!(mapping.subform_udn.as_deref(), Some("familyHistory"));
        assert_eq!(mapping.subform_name.as_deref(), Some("FamilyHistory"));
    }

    #[test]
    fn null_fields_except_keeps_other_forms() {
        let test = Environment::parse("test").unwrap();
        let mut fields = FieldTable::new();
        let mut counts = ChangeCounts::default();
        apply_definition(&mut fields, &test, "Demographics", &definition(), &mut counts);
        apply_definition(&mut fields, &test, "Consent", &definition(), &mut counts);

        let keep: HashSet<FieldKey> = [FieldKey::field("Demographics", "Race")].into();
        let nulled = null_fields_except(&mut fields, &test, "Demographics", &keep);

        assert_eq!(nulled, 2);
        assert_eq!(fields.keys_mapped_in(&test).len(), 4);
    }

    #[test]
    fn empty_workflow_shapes() {
        assert!(is_empty_workflow(&json!(null)));
        assert!(is_empty_workflow(&json!([])));
        assert!(is_empty_workflow(&json!({})));
        assert!(!is_empty_workflow(&json!([{"name": "dictionary"}])));
    }
}
