mod support;

use crosswalk_core::model::listing::FieldDefinition;
use crosswalk_core::model::registry::{FieldKey, ProtocolKind, GROUP_WORKFLOW_TITLE};
use crosswalk_core::sync::artifacts::WorkflowArchive;
use crosswalk_core::sync::report::SyncStage;
use crosswalk_core::{CsvRegistryStore, RegistryStore, RegistrySynchronizer, SyncError};
use serde_json::json;
use std::sync::Arc;
use support::{csv_store, definition, env, field, form, registry, subform, MockEnvironment};

fn demographics(race: &str, family: &str, relation: &str, condition: &str) -> Vec<FieldDefinition> {
    vec![
        field(race, "Race"),
        subform(
            family,
            "FamilyHistory",
            vec![field(relation, "Relation"), field(condition, "Condition")],
        ),
    ]
}

fn seeded_environments() -> (Arc<MockEnvironment>, Arc<MockEnvironment>) {
    let test = MockEnvironment::new("test");
    {
        let mut state = test.state();
        state.protocol(1, "CP1", "Protocol One");
        state.group(5, "Thoracic");
        state.form(
            form(10, "Demographics", "demo", 100),
            definition(demographics("RC", "FH", "REL", "COND")),
        );
    }
    let prod = MockEnvironment::new("prod");
    {
        let mut state = prod.state();
        state.protocol(101, "CP1", "Protocol One");
        state.form(
            form(20, "Demographics", "demoP", 200),
            definition(demographics("RACE", "FAM", "RELATION", "COND")),
        );
    }
    (test, prod)
}

fn table_bytes(store: &CsvRegistryStore) -> Vec<Vec<u8>> {
    let paths = store.paths();
    [&paths.protocols, &paths.forms, &paths.fields]
        .iter()
        .map(|path| std::fs::read(path).unwrap())
        .collect()
}

#[test]
fn full_sync_builds_registry_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test, prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];

    let first = sync.full_sync(&environments).unwrap();
    assert!(!first.has_failures());
    let bytes = table_bytes(&store);

    let snapshot = store.load_snapshot().unwrap();
    assert_eq!(snapshot.protocols.len(), 2);
    assert_eq!(snapshot.forms.len(), 1);
    assert_eq!(snapshot.fields.len(), 4);
    let group = snapshot.protocols.get("Thoracic").unwrap();
    assert_eq!(group.title, GROUP_WORKFLOW_TITLE);
    let cp1 = snapshot.protocols.get("CP1").unwrap();
    assert_eq!(cp1.local_ids[&env("test")], 1);
    assert_eq!(cp1.local_ids[&env("prod")], 101);
    let relation = snapshot
        .fields
        .get(&FieldKey::sub_field("Demographics", "FamilyHistory", "Relation"))
        .unwrap();
    assert_eq!(relation.local_code(&env("test")), Some("REL"));
    assert_eq!(relation.local_code(&env("prod")), Some("RELATION"));

    let second = sync.full_sync(&environments).unwrap();
    assert!(second.environments.iter().all(|o| o.changes.is_empty()));
    assert_eq!(table_bytes(&store), bytes);
}

#[test]
fn incremental_without_changes_fetches_nothing_and_keeps_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod.clone()]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];

    sync.full_sync(&environments).unwrap();
    let bytes = table_bytes(&store);
    test.state().definition_calls.clear();
    prod.state().definition_calls.clear();

    let report = sync.incremental_update(&environments).unwrap();

    assert!(!report.has_failures());
    assert!(test.state().definition_calls.is_empty());
    assert!(prod.state().definition_calls.is_empty());
    assert_eq!(table_bytes(&store), bytes);
}

#[test]
fn incremental_adds_new_form_for_its_environment_only() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];
    sync.full_sync(&environments).unwrap();

    test.state().form(
        form(11, "Consent", "consent", 300),
        definition(vec![field("SIG", "Signature")]),
    );
    let report = sync.incremental_update(&environments).unwrap();

    let changes = report.outcome(&env("test")).unwrap().changes;
    assert_eq!(changes.forms.added, 1);
    assert_eq!(changes.fields.added, 1);

    let snapshot = store.load_snapshot().unwrap();
    let consent = snapshot.forms.get("Consent").unwrap();
    assert_eq!(consent.mappings[&env("test")].local_id, 11);
    assert!(!consent.mappings.contains_key(&env("prod")));
    let signature = snapshot
        .fields
        .get(&FieldKey::field("Consent", "Signature"))
        .unwrap();
    assert_eq!(signature.local_code(&env("test")), Some("SIG"));
    assert_eq!(signature.local_code(&env("prod")), None);
}

#[test]
fn incremental_nulls_removed_entities_and_drops_rows_absent_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod.clone()]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];
    sync.full_sync(&environments).unwrap();

    prod.state().protocols.clear();
    sync.incremental_update(&environments).unwrap();

    let snapshot = store.load_snapshot().unwrap();
    let cp1 = snapshot.protocols.get("CP1").unwrap();
    assert_eq!(cp1.local_ids.get(&env("test")), Some(&1));
    assert_eq!(cp1.local_ids.get(&env("prod")), None);

    test.state().protocols.clear();
    let report = sync.incremental_update(&environments).unwrap();

    assert_eq!(report.outcome(&env("prod")).unwrap().changes.protocols.dropped, 0);
    let snapshot = store.load_snapshot().unwrap();
    assert!(snapshot.protocols.get("CP1").is_none());
    assert!(snapshot.protocols.get("Thoracic").is_some());
}

#[test]
fn changed_form_nulls_only_the_field_it_no_longer_declares() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];
    sync.full_sync(&environments).unwrap();

    {
        let mut state = test.state();
        state.forms[0].modification_time = Some(150);
        state.definitions.insert(
            10,
            definition(vec![
                field("RC", "Race"),
                subform("FH", "FamilyHistory", vec![field("COND", "Condition")]),
            ]),
        );
    }
    let report = sync.incremental_update(&environments).unwrap();

    assert_eq!(report.outcome(&env("test")).unwrap().changes.fields.nulled, 1);
    let snapshot = store.load_snapshot().unwrap();
    assert_eq!(snapshot.fields.len(), 4);
    let code = |key: FieldKey, name: &str| {
        snapshot
            .fields
            .get(&key)
            .and_then(|row| row.local_code(&env(name)))
            .map(str::to_string)
    };
    let relation = || FieldKey::sub_field("Demographics", "FamilyHistory", "Relation");
    assert_eq!(code(relation(), "test"), None);
    assert_eq!(code(relation(), "prod"), Some("RELATION".to_string()));
    assert_eq!(
        code(FieldKey::sub_field("Demographics", "FamilyHistory", "Condition"), "test"),
        Some("COND".to_string())
    );
    assert_eq!(code(FieldKey::field("Demographics", "Race"), "test"), Some("RC".to_string()));
    assert_eq!(
        code(FieldKey::field("Demographics", "FamilyHistory"), "test"),
        Some("FH".to_string())
    );
    let stored = snapshot.forms.get("Demographics").unwrap();
    assert_eq!(stored.mappings[&env("test")].last_modified, Some(150));
}

#[test]
fn removed_form_nulls_its_fields_in_that_environment() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];
    sync.full_sync(&environments).unwrap();

    test.state().forms.clear();
    let report = sync.incremental_update(&environments).unwrap();

    let changes = report.outcome(&env("test")).unwrap().changes;
    assert_eq!(changes.forms.nulled, 1);
    assert_eq!(changes.fields.nulled, 4);
    let snapshot = store.load_snapshot().unwrap();
    let race = snapshot
        .fields
        .get(&FieldKey::field("Demographics", "Race"))
        .unwrap();
    assert_eq!(race.local_code(&env("test")), None);
    assert_eq!(race.local_code(&env("prod")), Some("RACE"));
}

#[test]
fn renamed_form_forks_a_new_row() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];
    sync.full_sync(&environments).unwrap();

    {
        let mut state = test.state();
        let listing = &mut state.forms[0];
        listing.caption = "Demographic Info".to_string();
        listing.modification_time = Some(150);
    }
    sync.incremental_update(&environments).unwrap();

    let snapshot = store.load_snapshot().unwrap();
    let old = snapshot.forms.get("Demographics").unwrap();
    assert!(!old.mappings.contains_key(&env("test")));
    assert_eq!(old.mappings[&env("prod")].local_id, 20);
    let renamed = snapshot.forms.get("Demographic Info").unwrap();
    assert_eq!(renamed.mappings[&env("test")].local_id, 10);
    assert!(!renamed.mappings.contains_key(&env("prod")));

    let old_race = snapshot
        .fields
        .get(&FieldKey::field("Demographics", "Race"))
        .unwrap();
    assert_eq!(old_race.local_code(&env("test")), None);
    let new_race = snapshot
        .fields
        .get(&FieldKey::field("Demographic Info", "Race"))
        .unwrap();
    assert_eq!(new_race.local_code(&env("test")), Some("RC"));
}

#[test]
fn listing_failure_is_isolated_to_its_environment() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod.clone()]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    sync.full_sync(&[env("test"), env("prod")]).unwrap();

    {
        let mut state = prod.state();
        state.protocol(102, "CP2", "Protocol Two");
        state.fail_forms = true;
    }
    test.state().form(
        form(11, "Consent", "consent", 300),
        definition(vec![field("SIG", "Signature")]),
    );

    let report = sync.incremental_update(&[env("prod"), env("test")]).unwrap();

    let prod_outcome = report.outcome(&env("prod")).unwrap();
    let failure = prod_outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, SyncStage::Forms);
    assert!(prod_outcome.changes.is_empty());
    assert!(report.outcome(&env("test")).unwrap().failure.is_none());

    let snapshot = store.load_snapshot().unwrap();
    assert!(snapshot.protocols.get("CP2").is_none());
    assert!(snapshot.forms.get("Consent").is_some());
}

#[test]
fn failed_definition_fetch_clears_modification_time_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    let clients = registry(&[test.clone(), prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);
    let environments = [env("test"), env("prod")];
    sync.full_sync(&environments).unwrap();

    {
        let mut state = test.state();
        state.forms[0].modification_time = Some(999);
        state.failing_definitions.insert(10);
    }
    let report = sync.incremental_update(&environments).unwrap();

    let outcome = report.outcome(&env("test")).unwrap();
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.entity_failures.len(), 1);
    assert_eq!(outcome.entity_failures[0].entity, "form_definition");
    let snapshot = store.load_snapshot().unwrap();
    let demographics = snapshot.forms.get("Demographics").unwrap();
    assert_eq!(demographics.mappings[&env("test")].last_modified, None);
    assert_eq!(snapshot.fields.len(), 4);

    {
        let mut state = test.state();
        state.failing_definitions.clear();
        state.definition_calls.clear();
    }
    sync.incremental_update(&environments).unwrap();

    assert_eq!(test.state().definition_calls, vec![10]);
    let snapshot = store.load_snapshot().unwrap();
    let demographics = snapshot.forms.get("Demographics").unwrap();
    assert_eq!(demographics.mappings[&env("test")].last_modified, Some(999));
}

#[test]
fn workflows_are_archived_and_removed_with_their_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let workflows = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    {
        let mut state = test.state();
        state.workflows.insert(
            (ProtocolKind::Protocol, 1),
            json!([{"name": "dictionary", "data": {"fields": []}}]),
        );
        state.workflows.insert((ProtocolKind::Group, 5), json!([]));
    }
    let clients = registry(&[test.clone(), prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients)
        .with_artifacts(Arc::new(WorkflowArchive::new(workflows.path())));
    let environments = [env("test"), env("prod")];

    let report = sync.full_sync(&environments).unwrap();

    assert_eq!(report.outcome(&env("test")).unwrap().artifacts_stored, 1);
    let protocol_file = workflows.path().join("test").join("CP1.json");
    assert!(protocol_file.exists());
    assert!(!workflows
        .path()
        .join("test")
        .join("Thoracic Group Workflows.json")
        .exists());

    test.state().protocols.clear();
    let report = sync.incremental_update(&environments).unwrap();

    assert_eq!(report.outcome(&env("test")).unwrap().artifacts_removed, 1);
    assert!(!protocol_file.exists());
}

#[test]
fn rolled_back_environment_leaves_no_workflow_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let workflows = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    {
        let mut state = test.state();
        state.workflows.insert(
            (ProtocolKind::Protocol, 1),
            json!([{"name": "dictionary", "data": {"fields": []}}]),
        );
        state.fail_forms = true;
    }
    let clients = registry(&[test.clone(), prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients)
        .with_artifacts(Arc::new(WorkflowArchive::new(workflows.path())));

    let report = sync.full_sync(&[env("test"), env("prod")]).unwrap();

    let outcome = report.outcome(&env("test")).unwrap();
    assert_eq!(outcome.failure.as_ref().unwrap().stage, SyncStage::Forms);
    assert_eq!(outcome.artifacts_stored, 0);
    assert!(!workflows.path().join("test").join("CP1.json").exists());

    test.state().fail_forms = false;
    let report = sync.full_sync(&[env("test")]).unwrap();

    assert_eq!(report.outcome(&env("test")).unwrap().artifacts_stored, 1);
    assert!(workflows.path().join("test").join("CP1.json").exists());
}

#[test]
fn dropdown_catalog_is_written_per_environment() {
    let out = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let (test, prod) = seeded_environments();
    {
        let mut state = test.state();
        state.dropdowns = serde_json::from_value(json!([
            {"attribute": "gender", "pvCount": 2},
            {"attribute": "unused"}
        ]))
        .unwrap();
        state
            .dropdown_values
            .insert("gender".to_string(), vec!["Male".to_string(), "Female".to_string()]);
    }
    let clients = registry(&[test, prod]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);

    let report = sync.sync_dropdowns(&[env("test")], out.path()).unwrap();

    assert!(!report.has_failures());
    let text = std::fs::read_to_string(out.path().join("test_all_dropdown_values.csv")).unwrap();
    assert_eq!(text.lines().collect::<Vec<_>>(), vec!["gender", "Male", "Female"]);
}

#[test]
fn unknown_environment_is_a_hard_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (test, _prod) = seeded_environments();
    let clients = registry(&[test]);
    let store = csv_store(dir.path(), &["test", "prod"]);
    let sync = RegistrySynchronizer::new(&store, &clients);

    let err = sync.full_sync(&[env("test"), env("prod")]).unwrap_err();

    assert!(matches!(err, SyncError::Environment(_)));
    assert!(!store.paths().protocols.exists());
}
