//! Spreadsheet-compatible CSV registry store.
//!
//! # Responsibility
//! - Read and write the three registry tables in their published wide
//!   column layout (one column set per environment).
//! - Export per-environment dropdown catalogs.
//!
//! # Invariants
//! - Column order is fixed by the configured environment order.
//! - Null mappings are empty cells; booleans are `True`/`False`.
//! - Writes go through a sibling temp file and a rename, so readers never
//!   see a half-written table.

use crate::model::environment::Environment;
use crate::model::registry::{
    CanonicalRecord, FieldMapping, FieldRecord, FieldTable, FormMapping, FormRecord, FormTable, ProtocolRecord,
    ProtocolTable, RegistryTable,
};
use crate::repo::registry_repo::{RegistryStore, RepoError, RepoResult};
use csv::StringRecord;
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const PROTOCOL_TABLE_FILE: &str = "universalCPs.csv";
pub const FORM_TABLE_FILE: &str = "universalForms.csv";
pub const FIELD_TABLE_FILE: &str = "universalFields.csv";

const PROTOCOL_KEY_COLUMN: &str = "canonicalShortTitle";
const PROTOCOL_TITLE_COLUMN: &str = "canonicalTitle";
const FORM_KEY_COLUMN: &str = "canonicalFormName";
const FIELD_FORM_COLUMN: &str = "canonicalFormName";
const FIELD_IS_SUB_FORM_COLUMN: &str = "isSubForm";
const FIELD_NAME_COLUMN: &str = "canonicalFieldName";
const FIELD_IS_SUB_FIELD_COLUMN: &str = "isSubField";

/// Locations of the three registry tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths {
    pub protocols: PathBuf,
    pub forms: PathBuf,
    pub fields: PathBuf,
}

impl RegistryPaths {
    /// Standard table file names inside one resources directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            protocols: dir.join(PROTOCOL_TABLE_FILE),
            forms: dir.join(FORM_TABLE_FILE),
            fields: dir.join(FIELD_TABLE_FILE),
        }
    }
}

/// CSV-backed registry store.
#[derive(Debug, Clone)]
pub struct CsvRegistryStore {
    paths: RegistryPaths,
    environments: Vec<Environment>,
}

impl CsvRegistryStore {
    pub fn new(paths: RegistryPaths, environments: Vec<Environment>) -> Self {
        Self {
            paths,
            environments,
        }
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    /// Writes header-only tables for every table file that does not exist.
    pub fn ensure_tables(&self) -> RepoResult<()> {
        if !self.paths.protocols.exists() {
            self.save_protocols(&ProtocolTable::new())?;
        }
        if !self.paths.forms.exists() {
            self.save_forms(&FormTable::new())?;
        }
        if !self.paths.fields.exists() {
            self.save_fields(&FieldTable::new())?;
        }
        Ok(())
    }

    pub fn protocol_headers(&self) -> Vec<String> {
        let mut headers = vec![
            PROTOCOL_KEY_COLUMN.to_string(),
            PROTOCOL_TITLE_COLUMN.to_string(),
        ];
        headers.extend(self.environments.iter().map(ToString::to_string));
        headers
    }

    pub fn form_headers(&self) -> Vec<String> {
        let mut headers = vec![FORM_KEY_COLUMN.to_string()];
        for env in &self.environments {
            headers.push(format!("{env}ShortName"));
            headers.push(env.to_string());
            headers.push(format!("{env}UpdateRecord"));
        }
        headers
    }

    pub fn field_headers(&self) -> Vec<String> {
        let mut headers = vec![
            FIELD_FORM_COLUMN.to_string(),
            FIELD_IS_SUB_FORM_COLUMN.to_string(),
            FIELD_NAME_COLUMN.to_string(),
            FIELD_IS_SUB_FIELD_COLUMN.to_string(),
        ];
        headers.extend(self.environments.iter().map(ToString::to_string));
        headers.extend(self.environments.iter().map(|env| format!("{env}UDN")));
        headers.extend(self.environments.iter().map(|env| format!("{env}SubFormUDN")));
        headers.extend(self.environments.iter().map(|env| format!("{env}SubFormName")));
        headers
    }
}

impl RegistryStore for CsvRegistryStore {
    fn load_protocols(&self) -> RepoResult<ProtocolTable> {
        let path = &self.paths.protocols;
        read_table(path, "protocol", |columns, record| {
            let short_title = columns.required(record, PROTOCOL_KEY_COLUMN)?;
            let title = columns.value(record, PROTOCOL_TITLE_COLUMN).unwrap_or_default();
            let mut row = ProtocolRecord::new(short_title, title);
            for env in &self.environments {
                if let Some(raw) = columns.value(record, env.as_str()) {
                    row.local_ids.insert(env.clone(), parse_id(raw, env.as_str())?);
                }
            }
            Ok(row)
        })
    }

    fn save_protocols(&self, table: &ProtocolTable) -> RepoResult<()> {
        let rows = table.iter().map(|row| {
            let mut cells = vec![row.short_title.clone(), row.title.clone()];
            cells.extend(
                self.environments
                    .iter()
                    .map(|env| optional_cell(row.local_ids.get(env).map(i64::to_string))),
            );
            cells
        });
        write_table(&self.paths.protocols, &self.protocol_headers(), rows)
    }

    fn load_forms(&self) -> RepoResult<FormTable> {
        read_table(&self.paths.forms, "form", |columns, record| {
            let mut row = FormRecord::new(columns.required(record, FORM_KEY_COLUMN)?);
            for env in &self.environments {
                let Some(raw_id) = columns.value(record, env.as_str()) else {
                    continue;
                };
                let update_column = format!("{env}UpdateRecord");
                let last_modified = columns
                    .value(record, &update_column)
                    .map(|raw| parse_id(raw, &update_column))
                    .transpose()?;
                row.mappings.insert(
                    env.clone(),
                    FormMapping {
                        local_id: parse_id(raw_id, env.as_str())?,
                        short_name: columns
                            .value(record, &format!("{env}ShortName"))
                            .map(str::to_string),
                        last_modified,
                    },
                );
            }
            Ok(row)
        })
    }

    fn save_forms(&self, table: &FormTable) -> RepoResult<()> {
        let rows = table.iter().map(|row| {
            let mut cells = vec![row.caption.clone()];
            for env in &self.environments {
                let mapping = row.mappings.get(env);
                cells.push(optional_cell(mapping.and_then(|m| m.short_name.clone())));
                cells.push(optional_cell(mapping.map(|m| m.local_id.to_string())));
                cells.push(optional_cell(
                    mapping.and_then(|m| m.last_modified).map(|v| v.to_string()),
                ));
            }
            cells
        });
        write_table(&self.paths.forms, &self.form_headers(), rows)
    }

    fn load_fields(&self) -> RepoResult<FieldTable> {
        read_table(&self.paths.fields, "field", |columns, record| {
            let is_sub_field =
                parse_bool(columns.value(record, FIELD_IS_SUB_FIELD_COLUMN), FIELD_IS_SUB_FIELD_COLUMN)?;
            let mut mappings = BTreeMap::new();
            let mut parent_subform = None;
            for env in &self.environments {
                let subform_name = columns
                    .value(record, &format!("{env}SubFormName"))
                    .map(str::to_string);
                if parent_subform.is_none() && is_sub_field {
                    parent_subform = subform_name.clone();
                }
                let Some(code) = columns.value(record, env.as_str()) else {
                    continue;
                };
                mappings.insert(
                    env.clone(),
                    FieldMapping {
                        local_code: code.to_string(),
                        udn: columns.value(record, &format!("{env}UDN")).map(str::to_string),
                        subform_udn: columns
                            .value(record, &format!("{env}SubFormUDN"))
                            .map(str::to_string),
                        subform_name,
                    },
                );
            }
            Ok(FieldRecord {
                form_name: columns.required(record, FIELD_FORM_COLUMN)?,
                is_sub_form: parse_bool(
                    columns.value(record, FIELD_IS_SUB_FORM_COLUMN),
                    FIELD_IS_SUB_FORM_COLUMN,
                )?,
                field_name: columns.required(record, FIELD_NAME_COLUMN)?,
                is_sub_field,
                parent_subform,
                mappings,
            })
        })
    }

    fn save_fields(&self, table: &FieldTable) -> RepoResult<()> {
        let rows = table.iter().map(|row| {
            let mut cells = vec![
                row.form_name.clone(),
                bool_cell(row.is_sub_form),
                row.field_name.clone(),
                bool_cell(row.is_sub_field),
            ];
            let mapped = |env: &Environment| row.mappings.get(env);
            cells.extend(
                self.environments
                    .iter()
                    .map(|env| optional_cell(mapped(env).map(|m| m.local_code.clone()))),
            );
            cells.extend(
                self.environments
                    .iter()
                    .map(|env| optional_cell(mapped(env).and_then(|m| m.udn.clone()))),
            );
            cells.extend(
                self.environments
                    .iter()
                    .map(|env| optional_cell(mapped(env).and_then(|m| m.subform_udn.clone()))),
            );
            cells.extend(
                self.environments
                    .iter()
                    .map(|env| optional_cell(mapped(env).and_then(|m| m.subform_name.clone()))),
            );
            cells
        });
        write_table(&self.paths.fields, &self.field_headers(), rows)
    }
}

/// Writes `<env>_all_dropdown_values.csv` into `dir`: one column per
/// dropdown attribute, shorter value lists padded with empty cells.
pub fn write_dropdown_catalog(
    dir: &Path,
    env: &Environment,
    catalog: &IndexMap<String, Vec<String>>,
) -> RepoResult<PathBuf> {
    let path = dir.join(format!("{env}_all_dropdown_values.csv"));
    let headers: Vec<String> = catalog.keys().cloned().collect();
    let depth = catalog.values().map(Vec::len).max().unwrap_or(0);
    let rows = (0..depth).map(|index| {
        catalog
            .values()
            .map(|values| values.get(index).cloned().unwrap_or_default())
            .collect::<Vec<_>>()
    });
    write_table(&path, &headers, rows)?;
    Ok(path)
}

struct Columns {
    table: &'static str,
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(table: &'static str, headers: &StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(position, name)| (name.to_string(), position))
            .collect();
        Self { table, index }
    }

    fn ensure(&self, name: &str) -> RepoResult<()> {
        if self.index.contains_key(name) {
            Ok(())
        } else {
            Err(RepoError::MissingColumn {
                table: self.table,
                column: name.to_string(),
            })
        }
    }

    /// Non-empty cell value, `None` for empty cells or absent columns.
    fn value<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.index
            .get(name)
            .and_then(|position| record.get(*position))
            .filter(|value| !value.is_empty())
    }

    fn required(&self, record: &StringRecord, name: &str) -> RepoResult<String> {
        self.ensure(name)?;
        self.value(record, name).map(str::to_string).ok_or_else(|| {
            RepoError::InvalidData(format!("{} table row has empty `{name}`", self.table))
        })
    }
}

fn read_table<R, F>(path: &Path, table: &'static str, mut parse_row: F) -> RepoResult<RegistryTable<R>>
where
    R: CanonicalRecord,
    F: FnMut(&Columns, &StringRecord) -> RepoResult<R>,
{
    if !path.exists() {
        debug!(
            "event=registry_load module=repo status=skip table={} reason=missing_file",
            table
        );
        return Ok(RegistryTable::new());
    }

    let csv_error = |source: csv::Error| RepoError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    let columns = Columns::new(table, reader.headers().map_err(csv_error)?);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        rows.push(parse_row(&columns, &record)?);
    }

    let loaded = RegistryTable::from_records(rows);
    debug!(
        "event=registry_load module=repo status=ok table={} rows={}",
        table,
        loaded.len()
    );
    Ok(loaded)
}

fn write_table(
    path: &Path,
    headers: &[String],
    rows: impl Iterator<Item = Vec<String>>,
) -> RepoResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    let csv_error = |source: csv::Error| RepoError::Csv {
        path: staging.clone(),
        source,
    };

    let mut writer = csv::Writer::from_path(&staging).map_err(csv_error)?;
    writer.write_record(headers).map_err(csv_error)?;
    let mut count = 0usize;
    for row in rows {
        writer.write_record(&row).map_err(csv_error)?;
        count += 1;
    }
    writer.flush().map_err(io_error(&staging))?;
    drop(writer);
    std::fs::rename(&staging, path).map_err(io_error(path))?;

    info!(
        "event=registry_save module=repo status=ok path={} rows={}",
        path.display(),
        count
    );
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RepoError {
    let path = path.to_path_buf();
    move |source| RepoError::Io { path, source }
}

fn optional_cell(value: Option<String>) -> String {
    value.unwrap_or_default()
}

fn bool_cell(value: bool) -> String {
    let text = if value { "True" } else { "False" };
    text.to_string()
}

fn parse_bool(value: Option<&str>, column: &str) -> RepoResult<bool> {
    match value.map(str::trim) {
        None => Ok(false),
        Some(raw) if raw.eq_ignore_ascii_case("true") || raw == "1" => Ok(true),
        Some(raw) if raw.eq_ignore_ascii_case("false") || raw == "0" => Ok(false),
        Some(raw) => Err(RepoError::InvalidData(format!(
            "invalid boolean `{raw}` in column `{column}`"
        ))),
    }
}

/// Parses ids written either as `12` or spreadsheet-style `12.0`.
fn parse_id(value: &str, column: &str) -> RepoResult<i64> {
    let trimmed = value.trim();
    if let Ok(id) = trimmed.parse::<i64>() {
        return Ok(id);
    }
    match trimmed.parse::<f64>() {
        Ok(float) if float.is_finite() && float.fract() == 0.0 => Ok(float as i64),
        _ => Err(RepoError::InvalidData(format!(
            "invalid numeric id `{trimmed}` in column `{column}`"
        ))),
    }
}
