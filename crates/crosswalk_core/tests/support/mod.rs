#![allow(dead_code)]

use crosswalk_core::model::listing::{
    DropdownListing, FieldDefinition, FormDefinition, FormListing, ProtocolGroupListing,
    ProtocolListing,
};
use crosswalk_core::model::registry::{ProtocolKind, ProtocolRecord};
use crosswalk_core::sync::environment_spi::{ClientError, ClientResult};
use crosswalk_core::{
    CsvRegistryStore, Environment, EnvironmentClient, EnvironmentRegistry, FieldKey, FieldMapping,
    FieldRecord, FormMapping, FormRecord, RegistryPaths, RegistrySnapshot,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub fn env(name: &str) -> Environment {
    Environment::parse(name).unwrap()
}

pub fn csv_store(dir: &Path, environments: &[&str]) -> CsvRegistryStore {
    CsvRegistryStore::new(
        RegistryPaths::in_dir(dir),
        environments.iter().map(|name| env(name)).collect(),
    )
}

pub fn registry(clients: &[Arc<MockEnvironment>]) -> EnvironmentRegistry {
    let mut registry = EnvironmentRegistry::new();
    for client in clients {
        registry.register(client.clone()).unwrap();
    }
    registry
}

pub fn form(form_id: i64, caption: &str, name: &str, modified: i64) -> FormListing {
    FormListing {
        form_id,
        caption: caption.to_string(),
        name: name.to_string(),
        modification_time: Some(modified),
        creation_time: Some(1),
    }
}

pub fn field(name: &str, caption: &str) -> FieldDefinition {
    FieldDefinition {
        name: name.to_string(),
        caption: caption.to_string(),
        udn: Some(caption.to_lowercase()),
        field_type: "text".to_string(),
        rows: None,
    }
}

pub fn subform(name: &str, caption: &str, fields: Vec<FieldDefinition>) -> FieldDefinition {
    FieldDefinition {
        name: name.to_string(),
        caption: caption.to_string(),
        udn: Some(caption.to_lowercase()),
        field_type: "subForm".to_string(),
        rows: Some(vec![fields]),
    }
}

pub fn definition(fields: Vec<FieldDefinition>) -> FormDefinition {
    FormDefinition {
        rows: fields.into_iter().map(|field| vec![field]).collect(),
    }
}

/// Writes one field row with per-environment `(env, code)` mappings.
pub fn map_field(
    snapshot: &mut RegistrySnapshot,
    key: FieldKey,
    is_sub_form: bool,
    codes: &[(&str, &str)],
) {
    for (name, code) in codes {
        let mut mapping = FieldMapping::new(*code);
        mapping.subform_name = key.parent_subform.clone();
        snapshot
            .fields
            .upsert_mapping(&key, &env(name), mapping, || FieldRecord::from_key(&key, is_sub_form));
    }
}

pub fn map_form(snapshot: &mut RegistrySnapshot, caption: &str, forms: &[(&str, i64, &str)]) {
    let key = caption.to_string();
    for (name, local_id, short_name) in forms {
        let mapping = FormMapping {
            local_id: *local_id,
            short_name: Some(short_name.to_string()),
            last_modified: Some(100),
        };
        snapshot
            .forms
            .upsert_mapping(&key, &env(name), mapping, || FormRecord::new(caption));
    }
}

/// Registry shared by codec and translator tests.
///
/// - `Demographics` (test `demo`/10, prod `demoP`/20): Race RC/RACE,
///   Gender GEN/SEX, FamilyHistory subform FH/FAM with Relation REL/RELATION
///   and Condition COND/COND.
/// - `Collection Events`: subform SCE with sub-field User user/collector.
pub fn seeded_snapshot() -> RegistrySnapshot {
    let mut snapshot = RegistrySnapshot::default();
    snapshot.protocols.insert({
        let mut protocol = ProtocolRecord::new("CP1", "Protocol One");
        protocol.local_ids.insert(env("test"), 1);
        protocol.local_ids.insert(env("prod"), 101);
        protocol
    });
    map_form(&mut snapshot, "Demographics", &[("test", 10, "demo"), ("prod", 20, "demoP")]);
    map_form(&mut snapshot, "Collection Events", &[("test", 30, "sce"), ("prod", 40, "sce")]);

    let demographics = "Demographics";
    map_field(&mut snapshot, FieldKey::field(demographics, "Race"), false, &[("test", "RC"), ("prod", "RACE")]);
    map_field(&mut snapshot, FieldKey::field(demographics, "Gender"), false, &[("test", "GEN"), ("prod", "SEX")]);
    map_field(&mut snapshot, FieldKey::field(demographics, "FamilyHistory"), true, &[("test", "FH"), ("prod", "FAM")]);
    map_field(
        &mut snapshot,
        FieldKey::sub_field(demographics, "FamilyHistory", "Relation"),
        true,
        &[("test", "REL"), ("prod", "RELATION")],
    );
    map_field(
        &mut snapshot,
        FieldKey::sub_field(demographics, "FamilyHistory", "Condition"),
        true,
        &[("test", "COND"), ("prod", "COND")],
    );

    map_field(&mut snapshot, FieldKey::field("Collection Events", "SCE"), true, &[("test", "SCE"), ("prod", "SCE")]);
    map_field(
        &mut snapshot,
        FieldKey::sub_field("Collection Events", "SCE", "User"),
        true,
        &[("test", "user"), ("prod", "collector")],
    );
    snapshot
}

/// Listings served by one mock environment.
#[derive(Default)]
pub struct MockState {
    pub protocols: Vec<ProtocolListing>,
    pub groups: Vec<ProtocolGroupListing>,
    pub forms: Vec<FormListing>,
    pub definitions: HashMap<i64, FormDefinition>,
    pub workflows: HashMap<(ProtocolKind, i64), Value>,
    pub dropdowns: Vec<DropdownListing>,
    pub dropdown_values: HashMap<String, Vec<String>>,
    pub fail_forms: bool,
    pub failing_definitions: HashSet<i64>,
    pub definition_calls: Vec<i64>,
}

impl MockState {
    pub fn protocol(&mut self, id: i64, short_title: &str, title: &str) {
        self.protocols.push(ProtocolListing {
            id,
            short_title: short_title.to_string(),
            title: title.to_string(),
        });
    }

    pub fn group(&mut self, id: i64, name: &str) {
        self.groups.push(ProtocolGroupListing {
            id,
            name: name.to_string(),
        });
    }

    pub fn form(&mut self, listing: FormListing, definition: FormDefinition) {
        self.definitions.insert(listing.form_id, definition);
        self.forms.push(listing);
    }
}

/// In-memory environment adapter with mutable listings and failure switches.
pub struct MockEnvironment {
    env: Environment,
    state: Mutex<MockState>,
}

impl MockEnvironment {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            env: env(name),
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl EnvironmentClient for MockEnvironment {
    fn environment(&self) -> &Environment {
        &self.env
    }

    fn list_protocols(&self) -> ClientResult<Vec<ProtocolListing>> {
        Ok(self.state().protocols.clone())
    }

    fn list_protocol_groups(&self) -> ClientResult<Vec<ProtocolGroupListing>> {
        Ok(self.state().groups.clone())
    }

    fn list_forms(&self) -> ClientResult<Vec<FormListing>> {
        let state = self.state();
        if state.fail_forms {
            return Err(ClientError::rejected("list_forms", 401, "token expired"));
        }
        Ok(state.forms.clone())
    }

    fn get_form_definition(&self, form_id: i64) -> ClientResult<FormDefinition> {
        let mut state = self.state();
        state.definition_calls.push(form_id);
        if state.failing_definitions.contains(&form_id) {
            return Err(ClientError::transport("get_form_definition", "timed out"));
        }
        state
            .definitions
            .get(&form_id)
            .cloned()
            .ok_or_else(|| ClientError::rejected("get_form_definition", 404, "no such form"))
    }

    fn get_workflow(&self, kind: ProtocolKind, id: i64) -> ClientResult<Option<Value>> {
        Ok(self.state().workflows.get(&(kind, id)).cloned())
    }

    fn list_dropdowns(&self) -> ClientResult<Vec<DropdownListing>> {
        Ok(self.state().dropdowns.clone())
    }

    fn get_dropdown_values(&self, attribute: &str) -> ClientResult<Vec<String>> {
        Ok(self
            .state()
            .dropdown_values
            .get(attribute)
            .cloned()
            .unwrap_or_default())
    }
}
